//! Source node kinds: Table, RawQuery, SimpleSlices and TimeRange.

use crate::columns::{ColumnDescriptor, SemanticType, SourceColumn};
use crate::error::NodeIssue;
use serde::{Deserialize, Serialize};

/// A scan of a catalog table. The schema is a copy of the catalog's at the
/// time the node was created (or the document was loaded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableState {
    #[serde(default)]
    pub table_name: String,
    /// The standard-library module that must be included before the table is
    /// queryable, when the catalog reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub columns: Vec<SourceColumn>,
}

impl TableState {
    pub fn final_cols(&self) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .map(|c| ColumnDescriptor::new(c.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), NodeIssue> {
        if self.table_name.trim().is_empty() {
            return Err(NodeIssue::InvalidConfig("table name is empty".to_string()));
        }
        Ok(())
    }
}

/// A raw SQL source. Secondary inputs are referenced inside the text through
/// `$alias` placeholders; `dependency_aliases` is kept index-aligned with the
/// node's secondary input list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawQueryState {
    #[serde(default)]
    pub sql: String,
    /// Column names reported by the last successful execution. Intentionally
    /// empty until the engine has run the text once, and cleared again on
    /// every edit, so a stale schema can never outlive the text it came from.
    #[serde(default)]
    pub executed_columns: Vec<String>,
    #[serde(default)]
    pub dependency_aliases: Vec<String>,
}

impl RawQueryState {
    pub fn final_cols(&self) -> Vec<ColumnDescriptor> {
        self.executed_columns
            .iter()
            .map(ColumnDescriptor::from_name)
            .collect()
    }

    /// Replaces the query text, invalidating the executed schema.
    pub fn set_sql(&mut self, sql: impl Into<String>) {
        self.sql = sql.into();
        self.executed_columns.clear();
    }

    /// Records the column names of a successful execution.
    pub fn set_executed_columns(&mut self, columns: Vec<String>) {
        self.executed_columns = columns;
    }

    pub fn validate(&self) -> Result<(), NodeIssue> {
        if self.sql.trim().is_empty() {
            return Err(NodeIssue::EmptyQuery);
        }
        let statements = split_statements(&self.sql);
        let Some((last, includes)) = statements.split_last() else {
            return Err(NodeIssue::EmptyQuery);
        };
        for stmt in includes {
            if !is_module_include(stmt) {
                return Err(NodeIssue::MalformedStatementSequence);
            }
        }
        let upper = last.trim_start().to_ascii_uppercase();
        if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
            return Err(NodeIssue::MalformedStatementSequence);
        }
        Ok(())
    }
}

/// Splits SQL text into statements on top-level semicolons, respecting
/// single-quoted strings. Empty statements are dropped.
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

fn is_module_include(stmt: &str) -> bool {
    let words: Vec<&str> = stmt.split_whitespace().collect();
    words.len() == 4
        && words[0].eq_ignore_ascii_case("include")
        && words[1].eq_ignore_ascii_case("perfetto")
        && words[2].eq_ignore_ascii_case("module")
}

/// Hard-coded slice source with optional glob filters per name column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimpleSlicesState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_name_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_name_glob: Option<String>,
}

impl SimpleSlicesState {
    pub fn final_cols(&self) -> Vec<ColumnDescriptor> {
        [
            ("id", SemanticType::Id),
            ("ts", SemanticType::Timestamp),
            ("dur", SemanticType::Duration),
            ("slice_name", SemanticType::String),
            ("thread_name", SemanticType::String),
            ("process_name", SemanticType::String),
            ("track_name", SemanticType::String),
        ]
        .into_iter()
        .map(|(name, ty)| ColumnDescriptor::new(SourceColumn::new(name, ty)))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeRangeMode {
    /// A fixed `[ts, ts+dur)` span supplied in the state.
    Static,
    /// Follows the current selection span, falling back to the full trace
    /// bounds when nothing is selected.
    #[default]
    Dynamic,
}

/// A single-row `{id, ts, dur}` source describing a time span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeRangeState {
    #[serde(default)]
    pub mode: TimeRangeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<i64>,
}

impl TimeRangeState {
    pub fn final_cols(&self) -> Vec<ColumnDescriptor> {
        [
            ("id", SemanticType::Id),
            ("ts", SemanticType::Timestamp),
            ("dur", SemanticType::Duration),
        ]
        .into_iter()
        .map(|(name, ty)| ColumnDescriptor::new(SourceColumn::new(name, ty)))
        .collect()
    }

    pub fn validate(&self) -> Result<(), NodeIssue> {
        if self.mode == TimeRangeMode::Static && (self.ts.is_none() || self.dur.is_none()) {
            return Err(NodeIssue::InvalidConfig(
                "a static time range requires both ts and dur".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_query_accepts_includes_then_select() {
        let mut state = RawQueryState::default();
        state.set_sql("INCLUDE PERFETTO MODULE slices.with_context; SELECT * FROM slice");
        assert_eq!(state.validate(), Ok(()));
    }

    #[test]
    fn raw_query_rejects_trailing_statement() {
        let mut state = RawQueryState::default();
        state.set_sql("SELECT 1; SELECT 2");
        assert_eq!(state.validate(), Err(NodeIssue::MalformedStatementSequence));
    }

    #[test]
    fn raw_query_rejects_blank_text() {
        let state = RawQueryState::default();
        assert_eq!(state.validate(), Err(NodeIssue::EmptyQuery));
    }

    #[test]
    fn editing_sql_clears_executed_columns() {
        let mut state = RawQueryState::default();
        state.set_executed_columns(vec!["a".to_string()]);
        state.set_sql("SELECT b FROM t");
        assert!(state.executed_columns.is_empty());
        assert!(state.final_cols().is_empty());
    }

    #[test]
    fn semicolon_inside_string_does_not_split() {
        let stmts = split_statements("SELECT ';' AS c");
        assert_eq!(stmts.len(), 1);
    }
}
