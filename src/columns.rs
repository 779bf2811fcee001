use serde::{Deserialize, Serialize};
use std::fmt;

/// The semantic type of a column as reported by the catalog or inferred by an
/// operation. Drives aggregation type-compatibility checks and interval
/// partition-column selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Int,
    Double,
    Timestamp,
    Duration,
    Id,
    JoinId,
    Bytes,
    #[default]
    Unknown,
}

impl SemanticType {
    /// Whether a numeric aggregation (sum, mean, percentile, ...) can be
    /// applied to a column of this type.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            SemanticType::Int
                | SemanticType::Double
                | SemanticType::Timestamp
                | SemanticType::Duration
        )
    }

    /// Identifier-like types are excluded from interval partition columns.
    pub fn is_identifier(self) -> bool {
        matches!(self, SemanticType::Id | SemanticType::JoinId)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::String => "string",
            SemanticType::Int => "int",
            SemanticType::Double => "double",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Duration => "duration",
            SemanticType::Id => "id",
            SemanticType::JoinId => "join_id",
            SemanticType::Bytes => "bytes",
            SemanticType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// The underlying column a descriptor refers to. `name` must resolve in the
/// immediate upstream schema at the time the descriptor is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    #[serde(default)]
    pub semantic_type: SemanticType,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// A named, typed column reference with an inclusion flag and an optional
/// display alias.
///
/// Descriptors are copied, never mutated in place, whenever a schema is
/// recomputed, so stale references cannot alias live selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub source: SourceColumn,
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Set when a previously-checked column vanished upstream. The entry is
    /// retained, still checked, so the user can observe and fix the break
    /// instead of silently losing the selection.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
}

impl ColumnDescriptor {
    /// A checked descriptor over a bare name with an unknown type.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self::new(SourceColumn::new(name, SemanticType::Unknown))
    }

    /// A checked descriptor over a catalog column.
    pub fn new(source: SourceColumn) -> Self {
        Self {
            source,
            checked: true,
            alias: None,
            missing: false,
        }
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name this column is visible under downstream: the alias when one
    /// is set, the source name otherwise.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.source.name)
    }

    pub fn semantic_type(&self) -> SemanticType {
        self.source.semantic_type
    }

    /// A fresh copy exposing this column under its current display name with
    /// no alias, as seen by a downstream node.
    pub fn as_upstream_of_next(&self) -> Self {
        Self {
            source: SourceColumn::new(self.display_name(), self.source.semantic_type),
            checked: true,
            alias: None,
            missing: false,
        }
    }

    /// A synthetic entry standing in for a checked column that no longer
    /// exists upstream.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            source: SourceColumn::new(name, SemanticType::Unknown),
            checked: true,
            alias: None,
            missing: true,
        }
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.source.name, alias),
            None => write!(f, "{}", self.source.name),
        }
    }
}
