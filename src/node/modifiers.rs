//! Single-input modifier kinds: Filter, Sort, ModifyColumns, LimitOffset and
//! AddColumns.

use super::{InputSchemas, MergeOptions, merge_annotated};
use crate::columns::ColumnDescriptor;
use crate::error::NodeIssue;
use crate::ir::{FilterSpec, SortSpec};
use serde::{Deserialize, Serialize};

/// Row filtering; the output schema is the input schema unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterState {
    #[serde(default)]
    pub predicates: Vec<FilterSpec>,
}

impl FilterState {
    pub fn validate(&self, upstream: &[ColumnDescriptor]) -> Result<(), NodeIssue> {
        for pred in &self.predicates {
            if !upstream.iter().any(|c| c.display_name() == pred.column) {
                return Err(NodeIssue::MissingColumns {
                    column: pred.column.clone(),
                });
            }
            if pred.op.takes_rhs() && pred.rhs.is_empty() {
                return Err(NodeIssue::InvalidConfig(format!(
                    "filter on '{}' needs a comparison value",
                    pred.column
                )));
            }
        }
        Ok(())
    }
}

/// Row ordering; schema-identity like Filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SortState {
    #[serde(default)]
    pub specs: Vec<SortSpec>,
}

impl SortState {
    pub fn validate(&self, upstream: &[ColumnDescriptor]) -> Result<(), NodeIssue> {
        if self.specs.is_empty() {
            return Err(NodeIssue::InvalidConfig(
                "sort needs at least one column".to_string(),
            ));
        }
        for spec in &self.specs {
            if !upstream.iter().any(|c| c.display_name() == spec.column) {
                return Err(NodeIssue::MissingColumns {
                    column: spec.column.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Column selection, rename and reorder. The annotated list is the node's
/// state; checked flags and aliases are user choices preserved across
/// upstream edits by display-name matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModifyColumnsState {
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl ModifyColumnsState {
    pub fn recompute(&mut self, upstream: &[ColumnDescriptor]) -> Vec<ColumnDescriptor> {
        self.columns = merge_annotated(
            &self.columns,
            upstream,
            &MergeOptions {
                default_checked: true,
                preserve_old_order: true,
                retain_annotated: true,
            },
        );
        self.columns.clone()
    }

    pub fn validate(&self) -> Result<(), NodeIssue> {
        if let Some(broken) = self.columns.iter().find(|c| c.missing && c.checked) {
            return Err(NodeIssue::MissingColumns {
                column: broken.source.name.clone(),
            });
        }
        let mut seen: Vec<&str> = Vec::new();
        for col in self.columns.iter().filter(|c| c.checked) {
            let name = col.display_name();
            if seen.contains(&name) {
                return Err(NodeIssue::InvalidConfig(format!(
                    "duplicate output column '{}'",
                    name
                )));
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// `LIMIT`/`OFFSET`; schema-identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LimitOffsetState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl LimitOffsetState {
    pub fn validate(&self) -> Result<(), NodeIssue> {
        if self.offset.is_some() && self.limit.is_none() {
            return Err(NodeIssue::InvalidConfig(
                "OFFSET requires LIMIT to be specified".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pulls extra columns from a secondary "join source" across a key pair,
/// keeping every primary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AddColumnsState {
    #[serde(default)]
    pub left_column: String,
    #[serde(default)]
    pub right_column: String,
    /// Columns of the join source the user has opted into, annotated with
    /// checked flags and aliases.
    #[serde(default)]
    pub extra_columns: Vec<ColumnDescriptor>,
}

impl AddColumnsState {
    pub fn recompute(&mut self, inputs: &InputSchemas<'_>) -> Vec<ColumnDescriptor> {
        let primary = inputs.primary.unwrap_or(&[]);
        let source = inputs.secondary.first().copied().unwrap_or(&[]);
        self.extra_columns = merge_annotated(
            &self.extra_columns,
            source,
            &MergeOptions {
                default_checked: false,
                preserve_old_order: false,
                retain_annotated: false,
            },
        );
        let mut out = primary.to_vec();
        out.extend(
            self.extra_columns
                .iter()
                .filter(|c| c.checked)
                .cloned(),
        );
        out
    }

    pub fn validate(&self, inputs: &InputSchemas<'_>) -> Result<(), NodeIssue> {
        let primary = inputs.primary.unwrap_or(&[]);
        let Some(source) = inputs.secondary.first() else {
            // Without a join source the node degenerates to a passthrough.
            return Ok(());
        };
        if self.left_column.is_empty() || self.right_column.is_empty() {
            return Err(NodeIssue::InvalidConfig(
                "both key columns must be set".to_string(),
            ));
        }
        if !primary.iter().any(|c| c.display_name() == self.left_column) {
            return Err(NodeIssue::MissingColumns {
                column: self.left_column.clone(),
            });
        }
        if !source.iter().any(|c| c.display_name() == self.right_column) {
            return Err(NodeIssue::MissingColumns {
                column: self.right_column.clone(),
            });
        }
        for extra in self.extra_columns.iter().filter(|c| c.checked) {
            let name = extra.display_name();
            if primary.iter().any(|c| c.display_name() == name) {
                return Err(NodeIssue::InvalidConfig(format!(
                    "column '{}' collides with the primary input; alias it",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{SemanticType, SourceColumn};
    use crate::ir::{FilterOp, FilterValue};

    fn cols(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .map(|n| ColumnDescriptor::new(SourceColumn::new(*n, SemanticType::Int)))
            .collect()
    }

    #[test]
    fn filter_flags_unknown_column() {
        let state = FilterState {
            predicates: vec![FilterSpec {
                column: "nope".to_string(),
                op: FilterOp::Eq,
                rhs: vec![FilterValue::Int(1)],
            }],
        };
        assert!(matches!(
            state.validate(&cols(&["a", "b"])),
            Err(NodeIssue::MissingColumns { .. })
        ));
    }

    #[test]
    fn modify_preserves_alias_and_order_across_recompute() {
        let mut state = ModifyColumnsState::default();
        state.recompute(&cols(&["a", "b", "c"]));
        state.columns[1].alias = Some("renamed".to_string());
        state.columns.swap(0, 2);

        let merged = state.recompute(&cols(&["a", "b", "c"]));
        assert_eq!(merged[0].source.name, "c");
        assert_eq!(merged[1].alias.as_deref(), Some("renamed"));
        assert_eq!(merged[2].source.name, "a");
    }

    #[test]
    fn modify_retains_aliased_column_that_vanished() {
        let mut state = ModifyColumnsState::default();
        state.recompute(&cols(&["a", "b"]));
        state.columns[0].alias = Some("kept".to_string());

        let merged = state.recompute(&cols(&["b"]));
        let placeholder = merged.iter().find(|c| c.source.name == "a").unwrap();
        assert!(placeholder.missing);
        assert!(placeholder.checked);
        assert!(matches!(state.validate(), Err(NodeIssue::MissingColumns { .. })));
    }

    #[test]
    fn offset_without_limit_is_invalid() {
        let state = LimitOffsetState {
            limit: None,
            offset: Some(10),
        };
        assert!(state.validate().is_err());
    }
}
