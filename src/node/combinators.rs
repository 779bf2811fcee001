//! Multi-input combinator kinds: Join and Union.

use super::{InputSchemas, MergeOptions, merge_annotated};
use crate::columns::ColumnDescriptor;
use crate::error::NodeIssue;
use crate::ir::{JoinCondition, JoinType};
use serde::{Deserialize, Serialize};

/// Which input a deduplicated join column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

/// A two-sided join. Both sides carry an explicit checked-column list; on top
/// of those, output deduplication drops any unaliased name present on both
/// sides, except the equality key which is emitted once from the left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JoinState {
    #[serde(default)]
    pub join_type: JoinType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<JoinCondition>,
    #[serde(default)]
    pub left_columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub right_columns: Vec<ColumnDescriptor>,
}

impl JoinState {
    pub fn recompute(&mut self, inputs: &InputSchemas<'_>) -> Vec<ColumnDescriptor> {
        let merge_opts = MergeOptions {
            default_checked: true,
            preserve_old_order: false,
            retain_annotated: false,
        };
        let left = inputs.secondary.first().copied().unwrap_or(&[]);
        let right = inputs.secondary.get(1).copied().unwrap_or(&[]);
        self.left_columns = merge_annotated(&self.left_columns, left, &merge_opts);
        self.right_columns = merge_annotated(&self.right_columns, right, &merge_opts);
        self.deduplicated_output()
    }

    /// The equality key name, when both sides join on the same column name.
    fn shared_key_name(&self) -> Option<&str> {
        match &self.condition {
            Some(JoinCondition::Equality {
                left_column,
                right_column,
            }) if left_column == right_column => Some(left_column.as_str()),
            _ => None,
        }
    }

    /// Checked columns from both sides with ambiguous names dropped.
    pub fn deduplicated_output(&self) -> Vec<ColumnDescriptor> {
        self.deduplicated_sided()
            .into_iter()
            .map(|(_, col)| col)
            .collect()
    }

    /// Like [`deduplicated_output`](Self::deduplicated_output), but tagging
    /// each survivor with the side it came from, for qualified projection.
    pub(crate) fn deduplicated_sided(&self) -> Vec<(JoinSide, ColumnDescriptor)> {
        let left: Vec<&ColumnDescriptor> =
            self.left_columns.iter().filter(|c| c.checked).collect();
        let right: Vec<&ColumnDescriptor> =
            self.right_columns.iter().filter(|c| c.checked).collect();
        let key = self.shared_key_name();

        let mut out = Vec::new();
        for col in &left {
            let name = col.display_name();
            let ambiguous = right.iter().any(|o| o.display_name() == name);
            if !ambiguous || key == Some(name) {
                out.push((JoinSide::Left, (*col).clone()));
            }
        }
        for col in &right {
            let name = col.display_name();
            let ambiguous = left.iter().any(|o| o.display_name() == name);
            if !ambiguous {
                out.push((JoinSide::Right, (*col).clone()));
            }
        }
        out
    }

    pub fn validate(&self) -> Result<(), NodeIssue> {
        match &self.condition {
            None => {
                return Err(NodeIssue::InvalidConfig(
                    "join condition is not configured".to_string(),
                ));
            }
            Some(JoinCondition::Equality {
                left_column,
                right_column,
            }) => {
                if left_column.is_empty() || right_column.is_empty() {
                    return Err(NodeIssue::InvalidConfig(
                        "both equality columns must be set".to_string(),
                    ));
                }
                if !self
                    .left_columns
                    .iter()
                    .any(|c| c.source.name == *left_column)
                {
                    return Err(NodeIssue::MissingColumns {
                        column: left_column.clone(),
                    });
                }
                if !self
                    .right_columns
                    .iter()
                    .any(|c| c.source.name == *right_column)
                {
                    return Err(NodeIssue::MissingColumns {
                        column: right_column.clone(),
                    });
                }
            }
            Some(JoinCondition::Freeform {
                left_alias,
                right_alias,
                expression,
            }) => {
                if left_alias.is_empty() || right_alias.is_empty() {
                    return Err(NodeIssue::InvalidConfig(
                        "freeform join aliases must be non-empty".to_string(),
                    ));
                }
                if expression.trim().is_empty() {
                    return Err(NodeIssue::InvalidConfig(
                        "freeform join expression is empty".to_string(),
                    ));
                }
            }
        }
        if self.deduplicated_output().is_empty() {
            return Err(NodeIssue::NoExposableColumns);
        }
        Ok(())
    }
}

/// An n-way union. The output is the intersection of column names across all
/// inputs, ordered by the first input, each entry keeping its own checked
/// flag across recomputation by name match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionState {
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    /// UNION ALL (keep duplicates) vs UNION (distinct rows).
    #[serde(default = "default_true")]
    pub use_union_all: bool,
}

impl Default for UnionState {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            use_union_all: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl UnionState {
    /// Columns of the first input whose names exist in every other input.
    fn common_columns(inputs: &[&[ColumnDescriptor]]) -> Vec<ColumnDescriptor> {
        let Some((first, rest)) = inputs.split_first() else {
            return Vec::new();
        };
        first
            .iter()
            .filter(|col| {
                rest.iter().all(|other| {
                    other
                        .iter()
                        .any(|c| c.display_name() == col.display_name())
                })
            })
            .cloned()
            .collect()
    }

    pub fn recompute(&mut self, inputs: &[&[ColumnDescriptor]]) -> Vec<ColumnDescriptor> {
        let common = Self::common_columns(inputs);
        self.columns = merge_annotated(
            &self.columns,
            &common,
            &MergeOptions {
                default_checked: true,
                preserve_old_order: false,
                retain_annotated: false,
            },
        );
        self.columns.clone()
    }

    pub fn validate(&self, inputs: &[&[ColumnDescriptor]]) -> Result<(), NodeIssue> {
        if inputs.len() >= 2 && Self::common_columns(inputs).is_empty() {
            return Err(NodeIssue::NoCommonColumns);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{SemanticType, SourceColumn};

    fn cols(names: &[&str]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .map(|n| ColumnDescriptor::new(SourceColumn::new(*n, SemanticType::Int)))
            .collect()
    }

    #[test]
    fn equality_join_emits_key_once_and_drops_shared_names() {
        let mut state = JoinState {
            condition: Some(JoinCondition::Equality {
                left_column: "id".to_string(),
                right_column: "id".to_string(),
            }),
            ..JoinState::default()
        };
        let left = cols(&["id", "name", "value"]);
        let right = cols(&["id", "name", "extra"]);
        let out = state.recompute(&InputSchemas {
            primary: None,
            secondary: vec![&left, &right],
        });

        let names: Vec<&str> = out.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["id", "value", "extra"]);
    }

    #[test]
    fn aliasing_rescues_an_ambiguous_column() {
        let mut state = JoinState {
            condition: Some(JoinCondition::Equality {
                left_column: "id".to_string(),
                right_column: "id".to_string(),
            }),
            ..JoinState::default()
        };
        let left = cols(&["id", "name"]);
        let right = cols(&["id", "name"]);
        state.recompute(&InputSchemas {
            primary: None,
            secondary: vec![&left, &right],
        });
        state.right_columns[1].alias = Some("other_name".to_string());

        let out = state.deduplicated_output();
        let names: Vec<&str> = out.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["id", "name", "other_name"]);
    }

    #[test]
    fn union_intersects_by_first_input_order() {
        let mut state = UnionState::default();
        let a = cols(&["a", "b", "c"]);
        let b = cols(&["a", "c", "d"]);
        let out = state.recompute(&[&a, &b]);
        let names: Vec<&str> = out.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn union_with_disjoint_inputs_has_no_common_columns() {
        let state = UnionState::default();
        let a = cols(&["a"]);
        let b = cols(&["b"]);
        assert_eq!(
            state.validate(&[&a[..], &b[..]]),
            Err(NodeIssue::NoCommonColumns)
        );
    }
}
