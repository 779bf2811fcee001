//! Rendering a structured-query tree to SQL text.
//!
//! Every query id becomes one CTE (prefix `sq_`), deduplicated by id so
//! fan-out renders each subtree once. Shared queries are registered with the
//! renderer and resolved through [`IrOp::InnerQueryRef`]; raw SQL references
//! its dependencies through `$alias` placeholders. Module requirements are
//! collected and emitted as `INCLUDE PERFETTO MODULE` statements up front.

use super::{
    AggregateSpec, FilterSpec, FilterValue, IrOp, JoinCondition, SelectColumn, SliceBoundarySpec,
    SortDirection, StructuredQuery,
};
use ahash::AHashMap;
use itertools::Itertools;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlGenError {
    #[error("Shared query '{id}' is not registered with the renderer")]
    SharedQueryNotFound { id: String },

    #[error("Cycle detected in shared query references involving '{id}'")]
    SharedQueryCycle { id: String },

    #[error("Aggregate '{result_name}' needs a column")]
    MissingAggregateColumn { result_name: String },

    #[error("Aggregate '{result_name}' needs a percentile")]
    MissingPercentile { result_name: String },

    #[error("OFFSET requires LIMIT to be specified")]
    OffsetWithoutLimit,

    #[error("ORDER BY must specify at least one ordering spec")]
    EmptyOrderBy,

    #[error("Union must have at least one input")]
    EmptyUnion,
}

/// Renders IR trees to SQL text, resolving shared-query references.
#[derive(Debug, Default)]
pub struct SqlRenderer {
    shared: AHashMap<String, StructuredQuery>,
}

impl SqlRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query other trees may reference by id.
    pub fn register_shared(&mut self, query: StructuredQuery) {
        self.shared.insert(query.id.clone(), query);
    }

    /// Renders the full SQL text for one query tree.
    pub fn render(&self, query: &StructuredQuery) -> Result<String, SqlGenError> {
        let mut ctx = Ctx {
            shared: &self.shared,
            ctes: Vec::new(),
            by_id: AHashMap::new(),
            in_progress: Vec::new(),
            modules: BTreeSet::new(),
        };
        let root = ctx.render_op(query)?;

        let mut sql = String::new();
        for module in &ctx.modules {
            sql.push_str("INCLUDE PERFETTO MODULE ");
            sql.push_str(module);
            sql.push_str(";\n");
        }
        if !ctx.ctes.is_empty() {
            sql.push_str("WITH ");
            sql.push_str(
                &ctx.ctes
                    .iter()
                    .map(|(name, body)| format!("{} AS (\n{}\n)", name, body))
                    .join(",\n"),
            );
            sql.push('\n');
        }
        sql.push_str(&root);
        Ok(sql)
    }
}

struct Ctx<'a> {
    shared: &'a AHashMap<String, StructuredQuery>,
    /// `(name, body)` pairs in definition order.
    ctes: Vec<(String, String)>,
    by_id: AHashMap<String, String>,
    /// Shared ids currently being rendered, for cycle detection.
    in_progress: Vec<String>,
    modules: BTreeSet<String>,
}

impl Ctx<'_> {
    /// The CTE name a subtree is (or becomes) available under.
    fn table_for(&mut self, query: &StructuredQuery) -> Result<String, SqlGenError> {
        if let Some(name) = self.by_id.get(&query.id) {
            return Ok(name.clone());
        }
        let name = cte_name(&query.id);
        // Reserve the name before recursing so fan-out within the subtree
        // resolves to it.
        self.by_id.insert(query.id.clone(), name.clone());
        let body = self.render_op(query)?;
        self.ctes.push((name.clone(), body));
        Ok(name)
    }

    fn resolve_shared(&mut self, id: &str) -> Result<String, SqlGenError> {
        if self.in_progress.iter().any(|p| p == id) {
            return Err(SqlGenError::SharedQueryCycle { id: id.to_string() });
        }
        if let Some(name) = self.by_id.get(id) {
            return Ok(name.clone());
        }
        let query = self
            .shared
            .get(id)
            .cloned()
            .ok_or_else(|| SqlGenError::SharedQueryNotFound { id: id.to_string() })?;
        self.in_progress.push(id.to_string());
        let name = self.table_for(&query);
        self.in_progress.pop();
        name
    }

    fn render_op(&mut self, query: &StructuredQuery) -> Result<String, SqlGenError> {
        match &query.op {
            IrOp::TableScan { table_name, module } => {
                if let Some(module) = module {
                    self.modules.insert(module.clone());
                }
                Ok(format!("SELECT * FROM {}", table_name))
            }
            IrOp::RawSql {
                sql, dependencies, ..
            } => {
                let mut text = sql.clone();
                for dep in dependencies {
                    let table = self.table_for(&dep.query)?;
                    text = text.replace(&format!("${}", dep.alias), &table);
                }
                Ok(text)
            }
            IrOp::Filter { input, predicates } => {
                let table = self.table_for(input)?;
                if predicates.is_empty() {
                    return Ok(format!("SELECT * FROM {}", table));
                }
                let clauses = predicates.iter().map(render_predicate).join(" AND ");
                Ok(format!("SELECT * FROM {} WHERE {}", table, clauses))
            }
            IrOp::GroupBy {
                input,
                group_by,
                aggregates,
                select_columns,
            } => {
                let table = self.table_for(input)?;
                let projection = select_columns
                    .iter()
                    .map(|col| {
                        match aggregates.iter().find(|a| a.result_name == *col.expr) {
                            Some(agg) => {
                                Ok(format!("{} AS {}", aggregate_expr(agg)?, agg.result_name))
                            }
                            None => Ok(render_select_column(col)),
                        }
                    })
                    .collect::<Result<Vec<_>, SqlGenError>>()?
                    .join(", ");
                let mut sql = format!("SELECT {} FROM {}", projection, table);
                if !group_by.is_empty() {
                    sql.push_str(" GROUP BY ");
                    sql.push_str(&group_by.join(", "));
                }
                Ok(sql)
            }
            IrOp::Join {
                left,
                right,
                join_type,
                condition,
            } => {
                // A bare join without a projection wrapper.
                self.render_join(left, right, *join_type, condition, "*")
            }
            IrOp::Union {
                inputs,
                use_union_all,
            } => {
                if inputs.is_empty() {
                    return Err(SqlGenError::EmptyUnion);
                }
                let keyword = if *use_union_all { "UNION ALL" } else { "UNION" };
                let mut parts = Vec::with_capacity(inputs.len());
                for input in inputs {
                    parts.push(format!("SELECT * FROM {}", self.table_for(input)?));
                }
                Ok(parts.join(&format!("\n{}\n", keyword)))
            }
            IrOp::Sort { input, specs } => {
                if specs.is_empty() {
                    return Err(SqlGenError::EmptyOrderBy);
                }
                let table = self.table_for(input)?;
                let order = specs
                    .iter()
                    .map(|s| {
                        let dir = match s.direction {
                            SortDirection::Asc => "ASC",
                            SortDirection::Desc => "DESC",
                        };
                        format!("{} {}", s.column, dir)
                    })
                    .join(", ");
                Ok(format!("SELECT * FROM {} ORDER BY {}", table, order))
            }
            IrOp::SelectColumns { input, columns } => {
                // A projection directly over a join renders as one statement
                // so side-qualified expressions stay in scope.
                if let IrOp::Join {
                    left,
                    right,
                    join_type,
                    condition,
                } = &input.op
                {
                    let projection = columns.iter().map(render_select_column).join(", ");
                    return self.render_join(left, right, *join_type, condition, &projection);
                }
                let table = self.table_for(input)?;
                let projection = columns.iter().map(render_select_column).join(", ");
                Ok(format!("SELECT {} FROM {}", projection, table))
            }
            IrOp::Limit {
                input,
                limit,
                offset,
            } => {
                let table = self.table_for(input)?;
                let mut sql = format!("SELECT * FROM {}", table);
                match (limit, offset) {
                    (None, Some(_)) => return Err(SqlGenError::OffsetWithoutLimit),
                    (Some(limit), offset) => {
                        sql.push_str(&format!(" LIMIT {}", limit));
                        if let Some(offset) = offset {
                            sql.push_str(&format!(" OFFSET {}", offset));
                        }
                    }
                    (None, None) => {}
                }
                Ok(sql)
            }
            IrOp::IntervalIntersect {
                base,
                intervals,
                partition_columns,
            } => self.render_interval_intersect(base, intervals, partition_columns),
            IrOp::CreateSlices {
                starts,
                ends,
                starts_boundary,
                ends_boundary,
            } => self.render_create_slices(starts, ends, starts_boundary, ends_boundary),
            // Interval clipping is the engine's job; textually it is the
            // wrapped query.
            IrOp::FilterToIntervals { input } => {
                let table = self.table_for(input)?;
                Ok(format!("SELECT * FROM {}", table))
            }
            IrOp::InnerQueryRef { referenced_id } => {
                let table = self.resolve_shared(referenced_id)?;
                Ok(format!("SELECT * FROM {}", table))
            }
        }
    }

    fn render_join(
        &mut self,
        left: &StructuredQuery,
        right: &StructuredQuery,
        join_type: super::JoinType,
        condition: &JoinCondition,
        projection: &str,
    ) -> Result<String, SqlGenError> {
        let left_table = self.table_for(left)?;
        let right_table = self.table_for(right)?;
        let (left_alias, right_alias, on) = match condition {
            JoinCondition::Equality {
                left_column,
                right_column,
            } => (
                "lhs".to_string(),
                "rhs".to_string(),
                format!("lhs.{} = rhs.{}", left_column, right_column),
            ),
            JoinCondition::Freeform {
                left_alias,
                right_alias,
                expression,
            } => (left_alias.clone(), right_alias.clone(), expression.clone()),
        };
        Ok(format!(
            "SELECT {} FROM {} AS {} {} JOIN {} AS {} ON {}",
            projection, left_table, left_alias, join_type, right_table, right_alias, on
        ))
    }

    /// The engine's interval-intersection macro. Output columns: the overlap
    /// `ts`/`dur`, partition columns, then each side's columns with
    /// `id`/`ts`/`dur` suffixed positionally (base is `_0`).
    fn render_interval_intersect(
        &mut self,
        base: &StructuredQuery,
        intervals: &[StructuredQuery],
        partition_columns: &[String],
    ) -> Result<String, SqlGenError> {
        self.modules.insert("intervals.intersect".to_string());
        let base_table = self.table_for(base)?;
        let mut interval_tables = Vec::with_capacity(intervals.len());
        for interval in intervals {
            interval_tables.push(self.table_for(interval)?);
        }

        let mut sql = "SELECT ii.ts, ii.dur".to_string();
        for col in partition_columns {
            sql.push_str(&format!(", ii.{}", col));
        }
        sql.push_str(", base_0.id AS id_0, base_0.ts AS ts_0, base_0.dur AS dur_0, base_0.*");
        for (i, _) in interval_tables.iter().enumerate() {
            let n = i + 1;
            sql.push_str(&format!(
                ", source_{n}.id AS id_{n}, source_{n}.ts AS ts_{n}, source_{n}.dur AS dur_{n}, source_{n}.*"
            ));
        }

        sql.push_str(&format!("\nFROM _interval_intersect!(({}", base_table));
        for table in &interval_tables {
            sql.push_str(&format!(", {}", table));
        }
        sql.push_str(&format!("), ({})) ii", partition_columns.join(", ")));
        sql.push_str(&format!(
            "\nJOIN {} AS base_0 ON ii.id_0 = base_0.id",
            base_table
        ));
        for (i, table) in interval_tables.iter().enumerate() {
            let n = i + 1;
            sql.push_str(&format!(
                "\nJOIN {table} AS source_{n} ON ii.id_{n} = source_{n}.id"
            ));
        }
        Ok(sql)
    }

    /// Pairs each start boundary with the first end boundary after it.
    fn render_create_slices(
        &mut self,
        starts: &StructuredQuery,
        ends: &StructuredQuery,
        starts_boundary: &SliceBoundarySpec,
        ends_boundary: &SliceBoundarySpec,
    ) -> Result<String, SqlGenError> {
        let starts_table = self.table_for(starts)?;
        let ends_table = self.table_for(ends)?;
        let start_expr = boundary_expr("s", starts_boundary);
        let end_expr = boundary_expr("e", ends_boundary);
        Ok(format!(
            "SELECT start_ts AS ts, end_ts - start_ts AS dur\n\
             FROM (SELECT {start} AS start_ts, \
             (SELECT MIN({end}) FROM {ends} AS e WHERE {end} > {start}) AS end_ts \
             FROM {starts} AS s)\n\
             WHERE end_ts IS NOT NULL",
            start = start_expr,
            end = end_expr,
            starts = starts_table,
            ends = ends_table,
        ))
    }
}

fn cte_name(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sq_{}", sanitized)
}

fn boundary_expr(alias: &str, spec: &SliceBoundarySpec) -> String {
    if spec.add_duration {
        format!("{a}.{c} + {a}.dur", a = alias, c = spec.ts_column)
    } else {
        format!("{}.{}", alias, spec.ts_column)
    }
}

fn render_select_column(col: &SelectColumn) -> String {
    match &col.alias {
        Some(alias) => format!("{} AS {}", col.expr, alias),
        None => col.expr.clone(),
    }
}

fn render_predicate(spec: &FilterSpec) -> String {
    if !spec.op.takes_rhs() {
        return format!("{} {}", spec.column, spec.op);
    }
    let clauses: Vec<String> = spec
        .rhs
        .iter()
        .map(|value| format!("{} {} {}", spec.column, spec.op, render_value(value)))
        .collect();
    if clauses.len() == 1 {
        clauses.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", clauses.join(" OR "))
    }
}

fn render_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Int(v) => v.to_string(),
        FilterValue::Double(v) => v.to_string(),
        FilterValue::String(v) => format!("'{}'", v.replace('\'', "''")),
    }
}

fn aggregate_expr(agg: &AggregateSpec) -> Result<String, SqlGenError> {
    use super::AggregateOp;
    if agg.op == AggregateOp::CountAll {
        return Ok("COUNT(*)".to_string());
    }
    let column = agg
        .column
        .as_deref()
        .ok_or_else(|| SqlGenError::MissingAggregateColumn {
            result_name: agg.result_name.clone(),
        })?;
    Ok(match agg.op {
        AggregateOp::CountAll => "COUNT(*)".to_string(),
        AggregateOp::Count => format!("COUNT({})", column),
        AggregateOp::CountDistinct => format!("COUNT(DISTINCT {})", column),
        AggregateOp::Sum => format!("SUM({})", column),
        AggregateOp::Min => format!("MIN({})", column),
        AggregateOp::Max => format!("MAX({})", column),
        AggregateOp::Mean => format!("AVG({})", column),
        AggregateOp::Median => format!("PERCENTILE({}, 50)", column),
        AggregateOp::Percentile => {
            let p = agg.percentile.ok_or_else(|| SqlGenError::MissingPercentile {
                result_name: agg.result_name.clone(),
            })?;
            format!("PERCENTILE({}, {})", column, p)
        }
        AggregateOp::DurationWeightedMean => format!(
            "SUM(cast_double!({col} * dur)) / cast_double!(SUM(dur))",
            col = column
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SortSpec;

    fn scan(id: &str, table: &str) -> StructuredQuery {
        StructuredQuery::new(
            id,
            IrOp::TableScan {
                table_name: table.to_string(),
                module: None,
            },
        )
    }

    #[test]
    fn plain_scan_renders_without_ctes() {
        let renderer = SqlRenderer::new();
        let sql = renderer.render(&scan("n0", "slice")).unwrap();
        assert_eq!(sql, "SELECT * FROM slice");
    }

    #[test]
    fn module_includes_come_first() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n0",
            IrOp::TableScan {
                table_name: "memory_snapshot".to_string(),
                module: Some("android.memory".to_string()),
            },
        );
        let sql = renderer.render(&ir).unwrap();
        assert!(sql.starts_with("INCLUDE PERFETTO MODULE android.memory;\n"));
    }

    #[test]
    fn fan_out_renders_the_shared_subtree_once() {
        let renderer = SqlRenderer::new();
        let shared = scan("src", "slice");
        let union = StructuredQuery::new(
            "u",
            IrOp::Union {
                inputs: vec![
                    StructuredQuery::new(
                        "a",
                        IrOp::Filter {
                            input: Box::new(shared.clone()),
                            predicates: vec![],
                        },
                    ),
                    StructuredQuery::new(
                        "b",
                        IrOp::Filter {
                            input: Box::new(shared),
                            predicates: vec![],
                        },
                    ),
                ],
                use_union_all: true,
            },
        );
        let sql = renderer.render(&union).unwrap();
        assert_eq!(sql.matches("sq_src AS (").count(), 1);
        assert!(sql.contains("UNION ALL"));
    }

    #[test]
    fn raw_sql_placeholders_resolve_to_cte_names() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n1",
            IrOp::RawSql {
                sql: "SELECT * FROM $base WHERE dur > 0".to_string(),
                column_names: vec![],
                dependencies: vec![crate::ir::SqlDependency {
                    alias: "base".to_string(),
                    query: scan("n0", "slice"),
                }],
            },
        );
        let sql = renderer.render(&ir).unwrap();
        assert!(sql.contains("FROM sq_n0 WHERE dur > 0"));
        assert!(!sql.contains('$'));
    }

    #[test]
    fn group_by_spells_aggregates() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n1",
            IrOp::GroupBy {
                input: Box::new(scan("n0", "slice")),
                group_by: vec!["name".to_string()],
                aggregates: vec![AggregateSpec {
                    op: crate::ir::AggregateOp::Sum,
                    column: Some("dur".to_string()),
                    result_name: "total_dur".to_string(),
                    percentile: None,
                }],
                select_columns: vec![
                    SelectColumn::name("name"),
                    SelectColumn::name("total_dur"),
                ],
            },
        );
        let sql = renderer.render(&ir).unwrap();
        assert!(sql.contains("SELECT name, SUM(dur) AS total_dur FROM sq_n0 GROUP BY name"));
    }

    #[test]
    fn sort_and_limit_assemble_in_order() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n2",
            IrOp::Limit {
                input: Box::new(StructuredQuery::new(
                    "n1",
                    IrOp::Sort {
                        input: Box::new(scan("n0", "slice")),
                        specs: vec![SortSpec {
                            column: "dur".to_string(),
                            direction: crate::ir::SortDirection::Desc,
                        }],
                    },
                )),
                limit: Some(10),
                offset: Some(5),
            },
        );
        let sql = renderer.render(&ir).unwrap();
        assert!(sql.contains("ORDER BY dur DESC"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 5"));
    }

    #[test]
    fn unregistered_shared_reference_is_an_error() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n0",
            IrOp::InnerQueryRef {
                referenced_id: "nope".to_string(),
            },
        );
        assert_eq!(
            renderer.render(&ir),
            Err(SqlGenError::SharedQueryNotFound {
                id: "nope".to_string()
            })
        );
    }

    #[test]
    fn interval_intersect_uses_the_macro() {
        let renderer = SqlRenderer::new();
        let ir = StructuredQuery::new(
            "n2",
            IrOp::IntervalIntersect {
                base: Box::new(scan("n0", "slice")),
                intervals: vec![scan("n1", "spans")],
                partition_columns: vec!["cpu".to_string()],
            },
        );
        let sql = renderer.render(&ir).unwrap();
        assert!(sql.contains("INCLUDE PERFETTO MODULE intervals.intersect;"));
        assert!(sql.contains("_interval_intersect!((sq_n0, sq_n1), (cpu)) ii"));
        assert!(sql.contains("base_0.id AS id_0"));
        assert!(sql.contains("source_1.id AS id_1"));
    }
}
