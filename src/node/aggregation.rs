//! The Aggregation node kind: GROUP BY columns plus aggregate entries.

use super::{MergeOptions, merge_annotated};
use crate::columns::{ColumnDescriptor, SemanticType, SourceColumn};
use crate::error::NodeIssue;
use crate::ir::AggregateOp;
use serde::{Deserialize, Serialize};

/// One aggregate in the node's configuration. `result_name` falls back to a
/// derived `{op}_{column}` placeholder when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationEntry {
    pub op: AggregateOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

impl AggregationEntry {
    pub fn new(op: AggregateOp, column: Option<&str>) -> Self {
        Self {
            op,
            column: column.map(str::to_string),
            result_name: None,
            percentile: None,
        }
    }

    /// The output column name: explicit, or derived from the op and column.
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.result_name {
            return name.clone();
        }
        match &self.column {
            Some(column) => format!("{}_{}", self.op.short_name(), column),
            None => self.op.short_name().to_string(),
        }
    }

    /// An entry is valid iff its op needs no column, or its column exists
    /// upstream and is type-compatible; percentile-family ops additionally
    /// require `0 <= percentile <= 100`.
    pub fn is_valid(&self, upstream: &[ColumnDescriptor]) -> bool {
        if self.op == AggregateOp::Percentile {
            match self.percentile {
                Some(p) if (0.0..=100.0).contains(&p) => {}
                _ => return false,
            }
        }
        if !self.op.requires_column() {
            return true;
        }
        let Some(column) = &self.column else {
            return false;
        };
        let Some(found) = upstream.iter().find(|c| c.display_name() == column) else {
            return false;
        };
        if self.op.requires_numeric_column() && !found.semantic_type().is_numeric() {
            // Columns of unknown type (raw query outputs) are given the
            // benefit of the doubt; the engine will report a real error.
            return found.semantic_type() == SemanticType::Unknown;
        }
        true
    }

    /// The semantic type of the aggregate's output column.
    pub fn result_type(&self, upstream: &[ColumnDescriptor]) -> SemanticType {
        match self.op {
            AggregateOp::CountAll | AggregateOp::Count | AggregateOp::CountDistinct => {
                SemanticType::Int
            }
            AggregateOp::Sum | AggregateOp::Min | AggregateOp::Max => self
                .column
                .as_deref()
                .and_then(|name| upstream.iter().find(|c| c.display_name() == name))
                .map(|c| c.semantic_type())
                .unwrap_or(SemanticType::Unknown),
            AggregateOp::Mean
            | AggregateOp::Median
            | AggregateOp::DurationWeightedMean
            | AggregateOp::Percentile => SemanticType::Double,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AggregationState {
    /// Upstream columns annotated with "include in GROUP BY" checked flags.
    /// Rebuilt against the upstream schema on every propagation pass; entries
    /// follow upstream order and new columns arrive unchecked.
    #[serde(default)]
    pub group_by_columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub aggregations: Vec<AggregationEntry>,
}

impl AggregationState {
    pub fn recompute(&mut self, upstream: &[ColumnDescriptor]) -> Vec<ColumnDescriptor> {
        self.group_by_columns = merge_annotated(
            &self.group_by_columns,
            upstream,
            &MergeOptions {
                default_checked: false,
                preserve_old_order: false,
                retain_annotated: false,
            },
        );

        let mut out: Vec<ColumnDescriptor> = self
            .group_by_columns
            .iter()
            .filter(|c| c.checked)
            .cloned()
            .collect();
        for entry in self.aggregations.iter().filter(|a| a.is_valid(upstream)) {
            out.push(ColumnDescriptor::new(SourceColumn::new(
                entry.effective_name(),
                entry.result_type(upstream),
            )));
        }
        out
    }

    pub fn validate(&self, upstream: &[ColumnDescriptor]) -> Result<(), NodeIssue> {
        let any_group_by = self.group_by_columns.iter().any(|c| c.checked);
        let any_valid_aggregate = self.aggregations.iter().any(|a| a.is_valid(upstream));
        if !any_group_by && !any_valid_aggregate {
            return Err(NodeIssue::InvalidConfig(
                "check a GROUP BY column or add a valid aggregation".to_string(),
            ));
        }
        // A configured-but-broken aggregate is an error even when another
        // entry would keep the node viable.
        for entry in &self.aggregations {
            if !entry.is_valid(upstream) {
                if let Some(column) = &entry.column {
                    if !upstream.iter().any(|c| c.display_name() == *column) {
                        return Err(NodeIssue::MissingColumns {
                            column: column.clone(),
                        });
                    }
                }
                return Err(NodeIssue::InvalidConfig(format!(
                    "aggregation '{}' is not valid for its column",
                    entry.effective_name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new(SourceColumn::new("name", SemanticType::String)),
            ColumnDescriptor::new(SourceColumn::new("dur", SemanticType::Duration)),
        ]
    }

    #[test]
    fn percentile_bounds_are_inclusive() {
        let mut entry = AggregationEntry::new(AggregateOp::Percentile, Some("dur"));
        entry.percentile = Some(100.0);
        assert!(entry.is_valid(&upstream()));
        entry.percentile = Some(100.0001);
        assert!(!entry.is_valid(&upstream()));
        entry.percentile = Some(-0.0001);
        assert!(!entry.is_valid(&upstream()));
    }

    #[test]
    fn count_all_needs_no_column() {
        let entry = AggregationEntry::new(AggregateOp::CountAll, None);
        assert!(entry.is_valid(&upstream()));
        assert_eq!(entry.effective_name(), "count");
    }

    #[test]
    fn numeric_op_rejects_string_column() {
        let entry = AggregationEntry::new(AggregateOp::Sum, Some("name"));
        assert!(!entry.is_valid(&upstream()));
    }

    #[test]
    fn derived_name_and_result_type() {
        let entry = AggregationEntry::new(AggregateOp::Sum, Some("dur"));
        assert_eq!(entry.effective_name(), "sum_dur");
        assert_eq!(entry.result_type(&upstream()), SemanticType::Duration);

        let mean = AggregationEntry::new(AggregateOp::Mean, Some("dur"));
        assert_eq!(mean.result_type(&upstream()), SemanticType::Double);
    }
}
