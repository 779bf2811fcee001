//! The structured-query intermediate representation.
//!
//! A [`StructuredQuery`] is the serializable, engine-agnostic tree a validated
//! query node compiles to. Every tree node carries the id of the query node it
//! was lowered from, so execution results can be attributed back to the graph.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod sqlgen;

/// One compiled query operation, tagged with the originating node's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub id: String,
    #[serde(flatten)]
    pub op: IrOp,
}

impl StructuredQuery {
    pub fn new(id: impl Into<String>, op: IrOp) -> Self {
        Self { id: id.into(), op }
    }
}

/// The closed set of query operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrOp {
    TableScan {
        table_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
    },
    RawSql {
        sql: String,
        /// Column names reported by the last successful execution. Empty
        /// until the engine has run the text once; cleared on every edit.
        column_names: Vec<String>,
        dependencies: Vec<SqlDependency>,
    },
    Filter {
        input: Box<StructuredQuery>,
        predicates: Vec<FilterSpec>,
    },
    GroupBy {
        input: Box<StructuredQuery>,
        group_by: Vec<String>,
        aggregates: Vec<AggregateSpec>,
        /// Always populated explicitly so column order is deterministic
        /// regardless of what the engine would infer.
        select_columns: Vec<SelectColumn>,
    },
    Join {
        left: Box<StructuredQuery>,
        right: Box<StructuredQuery>,
        join_type: JoinType,
        condition: JoinCondition,
    },
    Union {
        inputs: Vec<StructuredQuery>,
        use_union_all: bool,
    },
    Sort {
        input: Box<StructuredQuery>,
        specs: Vec<SortSpec>,
    },
    SelectColumns {
        input: Box<StructuredQuery>,
        columns: Vec<SelectColumn>,
    },
    Limit {
        input: Box<StructuredQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
    },
    IntervalIntersect {
        base: Box<StructuredQuery>,
        intervals: Vec<StructuredQuery>,
        partition_columns: Vec<String>,
    },
    CreateSlices {
        starts: Box<StructuredQuery>,
        ends: Box<StructuredQuery>,
        starts_boundary: SliceBoundarySpec,
        ends_boundary: SliceBoundarySpec,
    },
    /// Marks the wrapped query's rows as intervals the engine should clip
    /// against. The wrapped query exposes `ts, dur` as its first two columns.
    FilterToIntervals {
        input: Box<StructuredQuery>,
    },
    /// Reference to a shared query registered separately with the renderer,
    /// resolved by id instead of embedding the subtree again.
    InnerQueryRef {
        referenced_id: String,
    },
}

/// A named dependency of a raw-SQL query, referenced inside the text through
/// a `$alias` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlDependency {
    pub alias: String,
    pub query: StructuredQuery,
}

/// How a slice boundary timestamp is derived from a boundary query's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceBoundarySpec {
    pub ts_column: String,
    /// When set, the boundary is `ts_column + dur` rather than the bare
    /// timestamp.
    #[serde(default)]
    pub add_duration: bool,
}

impl Default for SliceBoundarySpec {
    fn default() -> Self {
        Self {
            ts_column: "ts".to_string(),
            add_duration: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Glob,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    /// Whether the operator takes a right-hand side at all.
    pub fn takes_rhs(self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Glob => "GLOB",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Double(f64),
    String(String),
}

/// One predicate; multiple right-hand values are OR-ed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub rhs: Vec<FilterValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// `COUNT(*)`; the only op that needs no column.
    CountAll,
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Mean,
    Median,
    DurationWeightedMean,
    Percentile,
}

impl AggregateOp {
    pub fn requires_column(self) -> bool {
        !matches!(self, AggregateOp::CountAll)
    }

    pub fn requires_numeric_column(self) -> bool {
        matches!(
            self,
            AggregateOp::Sum
                | AggregateOp::Mean
                | AggregateOp::Median
                | AggregateOp::DurationWeightedMean
                | AggregateOp::Percentile
        )
    }

    /// Short name used when deriving a result column name.
    pub fn short_name(self) -> &'static str {
        match self {
            AggregateOp::CountAll | AggregateOp::Count => "count",
            AggregateOp::CountDistinct => "count_distinct",
            AggregateOp::Sum => "sum",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Mean => "mean",
            AggregateOp::Median => "median",
            AggregateOp::DurationWeightedMean => "dur_weighted_mean",
            AggregateOp::Percentile => "percentile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub op: AggregateOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub result_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

/// One projected column: a name or expression plus an optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectColumn {
    pub expr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SelectColumn {
    pub fn name(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: None,
        }
    }

    pub fn aliased(expr: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }

    /// The name the column is visible under in the projected output.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.expr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinCondition {
    Equality {
        left_column: String,
        right_column: String,
    },
    Freeform {
        left_alias: String,
        right_alias: String,
        expression: String,
    },
}
