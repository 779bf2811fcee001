//! Interval-algebra kinds: IntervalIntersect, CreateSlices and FilterDuring.
//!
//! All of these require their interval-shaped inputs to expose `id`, `ts` and
//! `dur` columns.

use super::{InputSchemas, has_interval_columns};
use crate::columns::{ColumnDescriptor, SemanticType, SourceColumn};
use crate::error::NodeIssue;
use crate::ir::SliceBoundarySpec;
use serde::{Deserialize, Serialize};

const RESERVED: [&str; 3] = ["id", "ts", "dur"];

/// Raw interval intersection between a base input and one or more interval
/// inputs, optionally partitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IntervalIntersectState {
    #[serde(default)]
    pub partition_columns: Vec<String>,
}

impl IntervalIntersectState {
    /// The intersection exposes the overlap `ts`/`dur`, any partition
    /// columns, then every side's columns with `id`/`ts`/`dur` disambiguated
    /// by a positional suffix (base is `_0`).
    pub fn recompute(&mut self, inputs: &InputSchemas<'_>) -> Vec<ColumnDescriptor> {
        let base = inputs.primary.unwrap_or(&[]);
        let mut out = vec![
            ColumnDescriptor::new(SourceColumn::new("ts", SemanticType::Timestamp)),
            ColumnDescriptor::new(SourceColumn::new("dur", SemanticType::Duration)),
        ];
        for part in &self.partition_columns {
            let ty = base
                .iter()
                .find(|c| c.display_name() == *part)
                .map(|c| c.semantic_type())
                .unwrap_or(SemanticType::Unknown);
            out.push(ColumnDescriptor::new(SourceColumn::new(part.clone(), ty)));
        }
        out.extend(suffixed_side(base, 0));
        for (i, side) in inputs.secondary.iter().enumerate() {
            out.extend(suffixed_side(side, i + 1));
        }
        out
    }

    pub fn validate(&self, inputs: &InputSchemas<'_>) -> Result<(), NodeIssue> {
        let mut seen: Vec<&str> = Vec::new();
        for part in &self.partition_columns {
            if part.is_empty() {
                return Err(NodeIssue::InvalidConfig(
                    "partition column cannot be empty".to_string(),
                ));
            }
            if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(part)) {
                return Err(NodeIssue::InvalidConfig(format!(
                    "partition column '{}' is reserved",
                    part
                )));
            }
            if seen.contains(&part.as_str()) {
                return Err(NodeIssue::InvalidConfig(format!(
                    "partition column '{}' is duplicated",
                    part
                )));
            }
            seen.push(part);
        }
        check_interval_schema(inputs.primary.unwrap_or(&[]))?;
        for side in &inputs.secondary {
            check_interval_schema(side)?;
        }
        Ok(())
    }
}

fn suffixed_side(cols: &[ColumnDescriptor], index: usize) -> Vec<ColumnDescriptor> {
    cols.iter()
        .map(|c| {
            let name = c.display_name();
            if RESERVED.contains(&name) {
                ColumnDescriptor::new(SourceColumn::new(
                    format!("{}_{}", name, index),
                    c.semantic_type(),
                ))
            } else {
                c.as_upstream_of_next()
            }
        })
        .collect()
}

fn check_interval_schema(cols: &[ColumnDescriptor]) -> Result<(), NodeIssue> {
    if let Some(absent) = has_interval_columns(cols) {
        return Err(NodeIssue::MissingColumns {
            column: absent.to_string(),
        });
    }
    Ok(())
}

/// Synthesizes `{ts, dur}` slices by pairing a "starts" boundary input with
/// an "ends" boundary input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CreateSlicesState {
    #[serde(default)]
    pub starts: SliceBoundarySpec,
    #[serde(default)]
    pub ends: SliceBoundarySpec,
}

impl CreateSlicesState {
    pub fn final_cols(&self) -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new(SourceColumn::new("ts", SemanticType::Timestamp)),
            ColumnDescriptor::new(SourceColumn::new("dur", SemanticType::Duration)),
        ]
    }

    pub fn validate(&self, inputs: &[&[ColumnDescriptor]]) -> Result<(), NodeIssue> {
        for (spec, side) in [
            (&self.starts, inputs.first()),
            (&self.ends, inputs.get(1)),
        ] {
            let Some(cols) = side else { continue };
            if !cols.iter().any(|c| c.display_name() == spec.ts_column) {
                return Err(NodeIssue::MissingColumns {
                    column: spec.ts_column.clone(),
                });
            }
            if spec.add_duration && !cols.iter().any(|c| c.display_name() == "dur") {
                return Err(NodeIssue::MissingColumns {
                    column: "dur".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Filters the primary input's rows down to the spans covered by the
/// secondary "interval" inputs, preserving all primary columns with `ts`/`dur`
/// replaced by the intersected overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilterDuringState {
    /// When enabled, output rows are clipped to the intervals and the schema
    /// places `ts, dur` first, as the engine's interval-clipping contract
    /// requires.
    #[serde(default)]
    pub clip_to_intervals: bool,
    #[serde(default)]
    pub drop_negative_primary: bool,
    #[serde(default)]
    pub drop_negative_intervals: bool,
    /// Limit overlap matching to rows agreeing on the common partitionable
    /// columns of all inputs.
    #[serde(default)]
    pub partition_by_common_columns: bool,
    /// Cache of partitionable columns, refreshed on every propagation pass.
    #[serde(default)]
    pub partition_columns: Vec<String>,
}

impl FilterDuringState {
    pub fn recompute(&mut self, inputs: &InputSchemas<'_>) -> Vec<ColumnDescriptor> {
        let primary = inputs.primary.unwrap_or(&[]);
        self.partition_columns = common_partition_columns(primary, &inputs.secondary);

        let mut out = primary.to_vec();
        if self.clip_to_intervals {
            // ts, dur first; the rest keeps its order.
            out.sort_by_key(|c| match c.display_name() {
                "ts" => 0,
                "dur" => 1,
                _ => 2,
            });
        }
        out
    }

    /// The partition columns actually applied during compilation.
    pub fn effective_partition_columns(&self) -> &[String] {
        if self.partition_by_common_columns {
            &self.partition_columns
        } else {
            &[]
        }
    }

    pub fn validate(&self, inputs: &InputSchemas<'_>) -> Result<(), NodeIssue> {
        check_interval_schema(inputs.primary.unwrap_or(&[]))?;
        for side in &inputs.secondary {
            check_interval_schema(side)?;
        }
        Ok(())
    }
}

/// Columns usable for partitioned overlap matching: present in the primary
/// and every interval input, not reserved, not identifier-typed, and not
/// string/bytes-typed.
fn common_partition_columns(
    primary: &[ColumnDescriptor],
    intervals: &[&[ColumnDescriptor]],
) -> Vec<String> {
    primary
        .iter()
        .filter(|c| {
            let name = c.display_name();
            let ty = c.semantic_type();
            !RESERVED.contains(&name)
                && !ty.is_identifier()
                && !matches!(ty, SemanticType::String | SemanticType::Bytes)
                && ty != SemanticType::Unknown
                && intervals
                    .iter()
                    .all(|side| side.iter().any(|o| o.display_name() == name))
        })
        .map(|c| c.display_name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_cols(extra: &[(&str, SemanticType)]) -> Vec<ColumnDescriptor> {
        let mut cols = vec![
            ColumnDescriptor::new(SourceColumn::new("id", SemanticType::Id)),
            ColumnDescriptor::new(SourceColumn::new("ts", SemanticType::Timestamp)),
            ColumnDescriptor::new(SourceColumn::new("dur", SemanticType::Duration)),
        ];
        for (name, ty) in extra {
            cols.push(ColumnDescriptor::new(SourceColumn::new(*name, *ty)));
        }
        cols
    }

    #[test]
    fn filter_during_requires_interval_schema() {
        let state = FilterDuringState::default();
        let primary = vec![ColumnDescriptor::from_name("value")];
        let side = interval_cols(&[]);
        let result = state.validate(&InputSchemas {
            primary: Some(&primary),
            secondary: vec![&side],
        });
        assert!(matches!(result, Err(NodeIssue::MissingColumns { .. })));
    }

    #[test]
    fn clip_mode_puts_ts_dur_first() {
        let mut state = FilterDuringState {
            clip_to_intervals: true,
            ..FilterDuringState::default()
        };
        let primary = interval_cols(&[("cpu", SemanticType::Int)]);
        let side = interval_cols(&[]);
        let out = state.recompute(&InputSchemas {
            primary: Some(&primary),
            secondary: vec![&side],
        });
        let names: Vec<&str> = out.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["ts", "dur", "id", "cpu"]);
    }

    #[test]
    fn partition_candidates_exclude_identifiers_and_strings() {
        let mut state = FilterDuringState {
            partition_by_common_columns: true,
            ..FilterDuringState::default()
        };
        let primary = interval_cols(&[
            ("cpu", SemanticType::Int),
            ("name", SemanticType::String),
            ("utid", SemanticType::JoinId),
        ]);
        let side = interval_cols(&[("cpu", SemanticType::Int), ("name", SemanticType::String)]);
        state.recompute(&InputSchemas {
            primary: Some(&primary),
            secondary: vec![&side],
        });
        assert_eq!(state.effective_partition_columns(), ["cpu".to_string()]);
    }

    #[test]
    fn reserved_partition_column_is_rejected() {
        let state = IntervalIntersectState {
            partition_columns: vec!["ts".to_string()],
        };
        let base = interval_cols(&[]);
        let result = state.validate(&InputSchemas {
            primary: Some(&base),
            secondary: vec![],
        });
        assert!(matches!(result, Err(NodeIssue::InvalidConfig(_))));
    }
}
