use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spanlens_core::config::Config;
use spanlens_core::filter::{FilterField, FilterFields};
use spanlens_core::time::{Granularity, time_intervals};
use spanlens_core::{Result, SpanlensError};
use tracing::{debug, warn};

use crate::catalog::MetricCatalog;
use crate::combine::{self, GROUP_ALL, MetricPoint, MetricValue, NULL_VALUE, format_number};
use crate::definition::{Dimension, Expression, MetricDefinition, MetricKind, MetricType, Operator};
use crate::rewrite::rewrite_special_fields;
use crate::span_filter::{SpanEnv, SpanFilter};

/// Column carrying the bucket start (epoch ms) in time-series rows.
pub const TIME_BUCKET: &str = "time_bucket";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub alias: String,
    pub expression: Expression,
}

/// What a repository is asked to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQueryParam {
    pub workspace_id: String,
    pub aggregations: Vec<Aggregation>,
    pub filter: FilterFields,
    pub group_by: Vec<Dimension>,
    /// Set for time-series queries only.
    pub granularity: Option<Granularity>,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Rows keyed by column: `time_bucket`, the group-by aliases and one column per
/// aggregation alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricQueryResult {
    pub rows: Vec<BTreeMap<String, Value>>,
}

/// Storage that executes rendered metric expressions.
pub trait MetricRepository: Send + Sync {
    fn query(&self, param: &MetricQueryParam) -> Result<MetricQueryResult>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetricsRequest {
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub metric_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterFields>,
    /// Extra grouping columns, each aliased by its field name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drill_down_fields: Vec<FilterField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetricsResponse {
    pub metrics: BTreeMap<String, MetricValue>,
}

struct Plan<'a> {
    env: SpanEnv,
    granularity: Granularity,
    start_ms: i64,
    end_ms: i64,
    filter: Option<&'a FilterFields>,
    drill_down: Vec<Dimension>,
}

pub struct MetricsService<R, F> {
    catalog: Arc<MetricCatalog>,
    repository: R,
    span_filter: F,
    config: Config,
}

impl<R, F> MetricsService<R, F>
where
    R: MetricRepository,
    F: SpanFilter,
{
    pub fn new(catalog: Arc<MetricCatalog>, repository: R, span_filter: F, config: Config) -> Self {
        Self {
            catalog,
            repository,
            span_filter,
            config,
        }
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// Empty name lists and disabled workspaces short-circuit to an empty response before
    /// anything else is checked.
    pub fn query_metrics(&self, req: &QueryMetricsRequest) -> Result<QueryMetricsResponse> {
        if req.metric_names.is_empty() {
            return Ok(QueryMetricsResponse::default());
        }
        if self.config.is_workspace_disabled(&req.workspace_id) {
            debug!(workspace_id = %req.workspace_id, "metrics disabled for workspace");
            return Ok(QueryMetricsResponse::default());
        }
        if req.start_ms > req.end_ms {
            return Err(SpanlensError::InvalidArgument(format!(
                "start {} is after end {}",
                req.start_ms, req.end_ms
            )));
        }
        let range = req.end_ms.checked_sub(req.start_ms).ok_or_else(|| {
            SpanlensError::InvalidArgument(format!(
                "time range {}..{} is out of bounds",
                req.start_ms, req.end_ms
            ))
        })?;
        let max_range = i64::try_from(self.config.max_time_range.as_millis()).unwrap_or(i64::MAX);
        if range > max_range {
            return Err(SpanlensError::InvalidArgument(format!(
                "time range exceeds {}",
                humantime::format_duration(self.config.max_time_range)
            )));
        }
        if let Some(field) = req.drill_down_fields.iter().find(|f| f.field_name.is_empty()) {
            return Err(SpanlensError::InvalidArgument(format!(
                "drill-down field needs a name: {field:?}"
            )));
        }
        let defs = req
            .metric_names
            .iter()
            .map(|name| {
                self.catalog
                    .get(name)
                    .ok_or_else(|| SpanlensError::Metric(format!("unknown metric: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = match &req.filter {
            Some(f) => {
                f.validate()?;
                let mut f = f.clone();
                rewrite_special_fields(&mut f)?;
                Some(f)
            }
            None => None,
        };
        let plan = Plan {
            env: SpanEnv {
                workspace_id: req.workspace_id.clone(),
                platform: req.platform.clone(),
            },
            granularity: req.granularity.unwrap_or(self.config.default_granularity),
            start_ms: req.start_ms,
            end_ms: req.end_ms,
            filter: filter.as_ref(),
            drill_down: req
                .drill_down_fields
                .iter()
                .map(|f| Dimension::field(f.clone(), f.field_name.clone()))
                .collect(),
        };

        let metrics = if defs.iter().any(|d| d.kind() == MetricKind::Composite) {
            let [def] = defs.as_slice() else {
                return Err(SpanlensError::InvalidArgument(
                    "a composite metric must be queried alone".to_string(),
                ));
            };
            match self.query_composite(def, &plan)? {
                Some(value) => BTreeMap::from([(def.name().to_string(), value)]),
                None => BTreeMap::new(),
            }
        } else {
            self.query_direct(&defs, &plan)?
        };
        Ok(QueryMetricsResponse { metrics })
    }

    fn query_composite(&self, def: &MetricDefinition, plan: &Plan<'_>) -> Result<Option<MetricValue>> {
        let mut values = Vec::with_capacity(def.metrics().len());
        for sub in def.metrics() {
            let mut result = self.query_direct(&[sub], plan)?;
            match result.remove(sub.name()) {
                Some(value) => values.push((sub.name().to_string(), value)),
                None => return Ok(None),
            }
        }
        let value = match (def.operator(), values.as_slice()) {
            (Some(Operator::Divide), [(_, numerator), (_, denominator)]) => {
                combine::divide(numerator, denominator)
            }
            (Some(Operator::Pie), _) => combine::pie(&values),
            _ => {
                return Err(SpanlensError::Metric(format!(
                    "metric {} cannot be combined",
                    def.name()
                )));
            }
        };
        Ok(Some(value))
    }

    fn query_direct(
        &self,
        defs: &[&MetricDefinition],
        plan: &Plan<'_>,
    ) -> Result<BTreeMap<String, MetricValue>> {
        let Some(first) = defs.first() else {
            return Ok(BTreeMap::new());
        };
        let where_fields = first.where_clause(&self.span_filter, &plan.env)?;
        for def in &defs[1..] {
            if def.metric_type() != first.metric_type()
                || def.group_by() != first.group_by()
                || def.where_clause(&self.span_filter, &plan.env)? != where_fields
            {
                return Err(SpanlensError::InvalidArgument(format!(
                    "metrics {} and {} cannot be queried together",
                    first.name(),
                    def.name()
                )));
            }
        }
        let Some(filter) = self.build_filter(&plan.env, where_fields, plan.filter)? else {
            debug!(workspace_id = %plan.env.workspace_id, "no span scope, skipping query");
            return Ok(BTreeMap::new());
        };
        let aggregations = defs
            .iter()
            .map(|d| {
                d.expression(plan.granularity)
                    .map(|expression| Aggregation {
                        alias: d.name().to_string(),
                        expression,
                    })
                    .ok_or_else(|| {
                        SpanlensError::Metric(format!("metric {} has no expression", d.name()))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let metric_type = first.metric_type();
        let mut group_by = first.group_by().to_vec();
        group_by.extend(plan.drill_down.iter().cloned());
        let param = MetricQueryParam {
            workspace_id: plan.env.workspace_id.clone(),
            aggregations,
            filter,
            group_by,
            granularity: (metric_type == MetricType::TimeSeries).then_some(plan.granularity),
            start_ms: plan.start_ms,
            end_ms: plan.end_ms,
        };
        let result = self.repository.query(&param)?;
        debug!(
            metrics = defs.len(),
            rows = result.rows.len(),
            "metric query finished"
        );

        let mut out = BTreeMap::new();
        for def in defs {
            let value = match metric_type {
                MetricType::TimeSeries => {
                    format_time_series(def, &param.group_by, &result.rows, plan)
                }
                MetricType::Summary => format_summary(def, &result.rows),
                MetricType::Pie => {
                    format_pie(def, &param.group_by, &result.rows, self.config.max_group_values)
                }
            };
            out.insert(def.name().to_string(), value);
        }
        Ok(out)
    }

    /// `And[Sub(basic ++ where), Sub(request filter)]`, or `None` when the span
    /// filter has nothing to scope by.
    fn build_filter(
        &self,
        env: &SpanEnv,
        where_fields: Vec<FilterField>,
        request: Option<&FilterFields>,
    ) -> Result<Option<FilterFields>> {
        let basic = self.span_filter.basic_spans(env)?;
        if basic.fields.is_empty() && !basic.force_query {
            return Ok(None);
        }
        let mut scoped = basic.fields;
        scoped.extend(where_fields);
        let mut parts = vec![FilterField::nested(FilterFields::and(scoped))];
        if let Some(request) = request.filter(|f| !f.is_empty()) {
            parts.push(FilterField::nested(request.clone()));
        }
        Ok(Some(FilterFields::and(parts)))
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n.as_f64().map_or_else(|| NULL_VALUE.to_string(), format_number),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) => format_number(v),
            Err(_) => {
                warn!(value = %s, "non-numeric metric value");
                NULL_VALUE.to_string()
            }
        },
        Some(Value::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
        _ => NULL_VALUE.to_string(),
    }
}

fn label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn group_key(row: &BTreeMap<String, Value>, group_by: &[Dimension]) -> String {
    if group_by.is_empty() {
        return GROUP_ALL.to_string();
    }
    let labels: BTreeMap<&str, String> = group_by
        .iter()
        .map(|d| (d.alias.as_str(), label(row.get(&d.alias))))
        .collect();
    serde_json::to_string(&labels).unwrap_or_else(|_| GROUP_ALL.to_string())
}

fn bucket(row: &BTreeMap<String, Value>) -> Option<i64> {
    match row.get(TIME_BUCKET)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn format_time_series(
    def: &MetricDefinition,
    group_by: &[Dimension],
    rows: &[BTreeMap<String, Value>],
    plan: &Plan<'_>,
) -> MetricValue {
    let mut groups: BTreeMap<String, BTreeMap<i64, String>> = BTreeMap::new();
    for row in rows {
        let Some(ts) = bucket(row) else {
            warn!(metric = def.name(), "row without time bucket");
            continue;
        };
        groups
            .entry(group_key(row, group_by))
            .or_default()
            .insert(ts, cell(row.get(def.name())));
    }
    if groups.is_empty() && group_by.is_empty() {
        groups.insert(GROUP_ALL.to_string(), BTreeMap::new());
    }
    let intervals = time_intervals(plan.start_ms, plan.end_ms, plan.granularity);
    let fill = def.fill().value();
    let time_series = groups
        .into_iter()
        .map(|(group, mut points)| {
            for ts in &intervals {
                points.entry(*ts).or_insert_with(|| fill.to_string());
            }
            let series = points
                .into_iter()
                .map(|(ts, value)| MetricPoint::new(ts.to_string(), value))
                .collect();
            (group, series)
        })
        .collect();
    MetricValue {
        time_series,
        ..MetricValue::default()
    }
}

fn format_summary(def: &MetricDefinition, rows: &[BTreeMap<String, Value>]) -> MetricValue {
    let value = rows
        .first()
        .map(|row| cell(row.get(def.name())))
        .unwrap_or_else(|| def.fill().value().to_string());
    MetricValue::summary(value)
}

fn format_pie(
    def: &MetricDefinition,
    group_by: &[Dimension],
    rows: &[BTreeMap<String, Value>],
    limit: usize,
) -> MetricValue {
    let mut pie = BTreeMap::new();
    for row in rows {
        if pie.len() >= limit {
            debug!(metric = def.name(), limit, "pie truncated");
            break;
        }
        pie.insert(group_key(row, group_by), cell(row.get(def.name())));
    }
    MetricValue {
        pie,
        ..MetricValue::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cells_normalise_numbers() {
        assert_eq!(cell(Some(&json!(3))), "3");
        assert_eq!(cell(Some(&json!(0.25))), "0.25");
        assert_eq!(cell(Some(&json!("NaN"))), NULL_VALUE);
        assert_eq!(cell(Some(&json!("inf"))), NULL_VALUE);
        assert_eq!(cell(Some(&json!("12.5"))), "12.5");
        assert_eq!(cell(Some(&json!(null))), NULL_VALUE);
        assert_eq!(cell(None), NULL_VALUE);
    }

    #[test]
    fn group_keys() {
        let row: BTreeMap<String, Value> =
            BTreeMap::from([("model_name".to_string(), json!("gpt-4o"))]);
        assert_eq!(group_key(&row, &[]), GROUP_ALL);
        let dim = Dimension::field(
            FilterField::column("model_name", spanlens_core::filter::FieldType::String),
            "model_name",
        );
        assert_eq!(group_key(&row, &[dim]), r#"{"model_name":"gpt-4o"}"#);
    }
}
