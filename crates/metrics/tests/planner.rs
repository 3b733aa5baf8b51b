use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use spanlens_core::config::Config;
use spanlens_core::filter::{FieldType, FilterField, FilterFields, QueryType};
use spanlens_core::model::span::Span;
use spanlens_core::time::Granularity;
use spanlens_core::{Result, SpanlensError};
use spanlens_metrics::query::{MetricQueryParam, MetricQueryResult, TIME_BUCKET};
use spanlens_metrics::{
    MetricCatalog, MetricRepository, MetricsService, PlatformSpanFilter, QueryMetricsRequest,
};

type Row = BTreeMap<String, Value>;

/// Answers with canned rows keyed by the first aggregation alias and records every query.
#[derive(Clone, Default)]
struct FakeRepository {
    rows: Arc<HashMap<String, Vec<Row>>>,
    seen: Arc<Mutex<Vec<MetricQueryParam>>>,
}

impl FakeRepository {
    fn with_rows(rows: Vec<(&str, Vec<Value>)>) -> Self {
        let rows = rows
            .into_iter()
            .map(|(alias, values)| {
                let parsed = values
                    .into_iter()
                    .map(|v| serde_json::from_value::<Row>(v).unwrap())
                    .collect();
                (alias.to_string(), parsed)
            })
            .collect();
        Self {
            rows: Arc::new(rows),
            seen: Arc::default(),
        }
    }

    fn queries(&self) -> Vec<MetricQueryParam> {
        self.seen.lock().unwrap().clone()
    }
}

impl MetricRepository for FakeRepository {
    fn query(&self, param: &MetricQueryParam) -> Result<MetricQueryResult> {
        self.seen.lock().unwrap().push(param.clone());
        let alias = param
            .aggregations
            .first()
            .map(|a| a.alias.clone())
            .ok_or_else(|| SpanlensError::Repository("no aggregations".to_string()))?;
        Ok(MetricQueryResult {
            rows: self.rows.get(&alias).cloned().unwrap_or_default(),
        })
    }
}

fn service(repo: FakeRepository, config: Config) -> MetricsService<FakeRepository, PlatformSpanFilter> {
    let catalog = Arc::new(MetricCatalog::builtin().unwrap());
    MetricsService::new(catalog, repo, PlatformSpanFilter, config)
}

fn request(names: &[&str]) -> QueryMetricsRequest {
    QueryMetricsRequest {
        workspace_id: "ws-1".to_string(),
        metric_names: names.iter().map(|n| n.to_string()).collect(),
        granularity: Some(Granularity::Minute),
        start_ms: 0,
        end_ms: 180_000,
        ..QueryMetricsRequest::default()
    }
}

#[test]
fn summary_query_scopes_by_workspace_and_root_spans() -> anyhow::Result<()> {
    let repo = FakeRepository::with_rows(vec![(
        "general_total_count",
        vec![json!({"general_total_count": 42})],
    )]);
    let svc = service(repo.clone(), Config::default());
    let resp = svc.query_metrics(&request(&["general_total_count"]))?;
    assert_eq!(
        resp.metrics["general_total_count"].summary.as_deref(),
        Some("42")
    );

    let queries = repo.queries();
    assert_eq!(queries.len(), 1);
    let param = &queries[0];
    assert_eq!(param.granularity, None);
    assert_eq!(
        param.aggregations[0].expression.render()?,
        "count()"
    );

    let root = Span {
        space_id: "ws-1".into(),
        parent_id: "0".into(),
        ..Span::default()
    };
    let child = Span {
        parent_id: "r".into(),
        ..root.clone()
    };
    let elsewhere = Span {
        space_id: "ws-2".into(),
        ..root.clone()
    };
    assert!(param.filter.satisfied(&root));
    assert!(!param.filter.satisfied(&child));
    assert!(!param.filter.satisfied(&elsewhere));
    Ok(())
}

#[test]
fn time_series_buckets_are_filled() {
    let repo = FakeRepository::with_rows(vec![(
        "model_total_count_by_time",
        vec![json!({TIME_BUCKET: 60_000, "model_total_count_by_time": 5})],
    )]);
    let svc = service(repo.clone(), Config::default());
    let resp = svc
        .query_metrics(&request(&["model_total_count_by_time"]))
        .unwrap();
    let points = &resp.metrics["model_total_count_by_time"].time_series["all"];
    let got: Vec<(&str, &str)> = points
        .iter()
        .map(|p| (p.timestamp.as_str(), p.value.as_str()))
        .collect();
    assert_eq!(
        got,
        vec![("0", "0"), ("60000", "5"), ("120000", "0"), ("180000", "0")]
    );
    assert_eq!(repo.queries()[0].granularity, Some(Granularity::Minute));
}

#[test]
fn latency_series_fill_with_null() {
    let repo = FakeRepository::with_rows(vec![(
        "model_duration_avg",
        vec![json!({TIME_BUCKET: "0", "model_duration_avg": "NaN"})],
    )]);
    let svc = service(repo, Config::default());
    let mut req = request(&["model_duration_avg", "model_duration_pct99"]);
    req.end_ms = 60_000;
    let resp = svc.query_metrics(&req).unwrap();
    let avg = &resp.metrics["model_duration_avg"].time_series["all"];
    assert_eq!(avg[0].value, "null");
    assert_eq!(avg[1].value, "null");
    assert!(resp.metrics.contains_key("model_duration_pct99"));
}

#[test]
fn composite_summary_divides_sub_metrics() {
    let repo = FakeRepository::with_rows(vec![
        (
            "general_model_duration_sum",
            vec![json!({"general_model_duration_sum": 7000})],
        ),
        ("general_model_count", vec![json!({"general_model_count": 4})]),
    ]);
    let svc = service(repo.clone(), Config::default());
    let resp = svc
        .query_metrics(&request(&["general_model_latency_avg"]))
        .unwrap();
    assert_eq!(
        resp.metrics["general_model_latency_avg"].summary.as_deref(),
        Some("1750")
    );
    assert_eq!(repo.queries().len(), 2);
}

#[test]
fn composite_series_divides_pointwise() {
    let repo = FakeRepository::with_rows(vec![
        (
            "agent_execution_step_count",
            vec![
                json!({TIME_BUCKET: 0, "agent_execution_step_count": 9}),
                json!({TIME_BUCKET: 60_000, "agent_execution_step_count": 4}),
            ],
        ),
        (
            "agent_run_count",
            vec![json!({TIME_BUCKET: 0, "agent_run_count": 3})],
        ),
    ]);
    let svc = service(repo, Config::default());
    let mut req = request(&["agent_step_avg"]);
    req.end_ms = 60_000;
    let resp = svc.query_metrics(&req).unwrap();
    let points = &resp.metrics["agent_step_avg"].time_series["all"];
    assert_eq!(points[0].value, "3");
    // no runs in the second bucket
    assert_eq!(points[1].value, "null");
}

#[test]
fn pie_is_keyed_by_group_values() {
    let repo = FakeRepository::with_rows(vec![(
        "model_total_count_pie",
        vec![
            json!({"model_name": "gpt-4o", "model_total_count_pie": 7}),
            json!({"model_name": "gpt-4o-mini", "model_total_count_pie": 2}),
        ],
    )]);
    let svc = service(repo, Config::default());
    let resp = svc
        .query_metrics(&request(&["model_total_count_pie"]))
        .unwrap();
    let pie = &resp.metrics["model_total_count_pie"].pie;
    assert_eq!(pie[r#"{"model_name":"gpt-4o"}"#], "7");
    assert_eq!(pie[r#"{"model_name":"gpt-4o-mini"}"#], "2");
}

#[test]
fn pie_respects_group_limit() {
    let repo = FakeRepository::with_rows(vec![(
        "tool_total_count_pie",
        vec![
            json!({"tool_name": "search", "tool_total_count_pie": 7}),
            json!({"tool_name": "fetch", "tool_total_count_pie": 2}),
        ],
    )]);
    let config = Config {
        max_group_values: 1,
        ..Config::default()
    };
    let svc = service(repo, config);
    let resp = svc.query_metrics(&request(&["tool_total_count_pie"])).unwrap();
    assert_eq!(resp.metrics["tool_total_count_pie"].pie.len(), 1);
}

#[test]
fn request_filter_is_rewritten_and_nested() {
    let repo = FakeRepository::default();
    let svc = service(repo.clone(), Config::default());
    let mut req = request(&["model_total_count"]);
    req.filter = Some(FilterFields::and(vec![
        FilterField::leaf("status", FieldType::String, QueryType::In, ["error"]),
        FilterField::leaf("duration", FieldType::Long, QueryType::Gt, ["1000"]),
    ]));
    svc.query_metrics(&req).unwrap();

    let param = &repo.queries()[0];
    assert_eq!(param.filter.filter_fields.len(), 2);
    let user = param.filter.filter_fields[1].sub_filter.as_ref().unwrap();
    assert_eq!(user.filter_fields[0].field_name, "status_code");
    assert_eq!(user.filter_fields[0].query_type, Some(QueryType::NotIn));
    assert_eq!(user.filter_fields[1].values, vec!["1000000"]);

    let slow_failure = Span {
        space_id: "ws-1".into(),
        span_type: "model".into(),
        status_code: 500,
        duration: 2_000_000,
        ..Span::default()
    };
    let fast_failure = Span {
        duration: 500_000,
        ..slow_failure.clone()
    };
    assert!(param.filter.satisfied(&slow_failure));
    assert!(!param.filter.satisfied(&fast_failure));
}

#[test]
fn summary_without_rows_uses_fill_value() {
    let repo = FakeRepository::default();
    let svc = service(repo.clone(), Config::default());
    let resp = svc
        .query_metrics(&request(&["general_total_count", "general_fail_ratio"]))
        .unwrap();
    assert_eq!(resp.metrics["general_total_count"].summary.as_deref(), Some("0"));
    assert_eq!(resp.metrics["general_fail_ratio"].summary.as_deref(), Some("null"));
    // both share root scope, so a single query serves them
    assert_eq!(repo.queries()[0].aggregations.len(), 2);
}

#[test]
fn rejects_bad_requests() {
    let svc = service(FakeRepository::default(), Config::default());
    assert!(svc.query_metrics(&request(&["no_such_metric"])).is_err());

    let mut inverted = request(&["general_total_count"]);
    inverted.start_ms = 10;
    inverted.end_ms = 5;
    assert!(svc.query_metrics(&inverted).is_err());

    let mut too_long = request(&["general_total_count"]);
    too_long.end_ms = 31 * 86_400_000;
    assert!(svc.query_metrics(&too_long).is_err());

    let mut unbounded = request(&["general_total_count"]);
    unbounded.start_ms = i64::MIN;
    unbounded.end_ms = 1;
    assert!(matches!(
        svc.query_metrics(&unbounded),
        Err(SpanlensError::InvalidArgument(_))
    ));

    let mut unnamed = request(&["model_total_count_by_time"]);
    unnamed.drill_down_fields = vec![FilterField::default()];
    assert!(svc.query_metrics(&unnamed).is_err());

    let mixed_types = request(&["model_total_count", "model_total_count_by_time"]);
    assert!(svc.query_metrics(&mixed_types).is_err());

    let mixed_scope = request(&["model_total_count", "tool_total_count"]);
    assert!(svc.query_metrics(&mixed_scope).is_err());

    let composite_with_other = request(&["agent_step_avg", "model_total_count"]);
    assert!(svc.query_metrics(&composite_with_other).is_err());
}

#[test]
fn drill_down_fields_extend_grouping() {
    let repo = FakeRepository::with_rows(vec![
        (
            "model_total_count_by_time",
            vec![
                json!({TIME_BUCKET: 0, "user_id": "u1", "model_total_count_by_time": 3}),
                json!({TIME_BUCKET: 60_000, "user_id": "u2", "model_total_count_by_time": 1}),
            ],
        ),
        (
            "model_total_count_pie",
            vec![json!({"model_name": "gpt-4o", "user_id": "u1", "model_total_count_pie": 4})],
        ),
    ]);
    let svc = service(repo.clone(), Config::default());
    let user = FilterField::column("user_id", FieldType::String);

    let mut req = request(&["model_total_count_by_time"]);
    req.end_ms = 60_000;
    req.drill_down_fields = vec![user.clone()];
    let resp = svc.query_metrics(&req).unwrap();
    let series = &resp.metrics["model_total_count_by_time"].time_series;
    let u1: Vec<&str> = series[r#"{"user_id":"u1"}"#]
        .iter()
        .map(|p| p.value.as_str())
        .collect();
    assert_eq!(u1, vec!["3", "0"]);
    assert_eq!(series[r#"{"user_id":"u2"}"#][1].value, "1");
    assert!(!series.contains_key("all"));

    let mut req = request(&["model_total_count_pie"]);
    req.drill_down_fields = vec![user];
    let resp = svc.query_metrics(&req).unwrap();
    assert_eq!(
        resp.metrics["model_total_count_pie"].pie[r#"{"model_name":"gpt-4o","user_id":"u1"}"#],
        "4"
    );

    let queries = repo.queries();
    let aliases: Vec<&str> = queries[1].group_by.iter().map(|d| d.alias.as_str()).collect();
    assert_eq!(aliases, vec!["model_name", "user_id"]);
}

#[test]
fn empty_name_list_returns_nothing() {
    let repo = FakeRepository::default();
    let svc = service(repo.clone(), Config::default());
    let resp = svc.query_metrics(&request(&[])).unwrap();
    assert!(resp.metrics.is_empty());
    assert!(repo.queries().is_empty());
}

#[test]
fn disabled_workspace_is_checked_before_names() {
    let config = Config {
        disabled_workspaces: vec!["ws-1".to_string()],
        ..Config::default()
    };
    let svc = service(FakeRepository::default(), config);
    let resp = svc.query_metrics(&request(&["no_such_metric"])).unwrap();
    assert!(resp.metrics.is_empty());
}

#[test]
fn disabled_or_unscoped_workspaces_return_nothing() {
    let repo = FakeRepository::default();
    let config = Config {
        disabled_workspaces: vec!["ws-1".to_string()],
        ..Config::default()
    };
    let svc = service(repo.clone(), config);
    let resp = svc.query_metrics(&request(&["general_total_count"])).unwrap();
    assert!(resp.metrics.is_empty());

    let svc = service(repo.clone(), Config::default());
    let mut anonymous = request(&["general_total_count"]);
    anonymous.workspace_id.clear();
    let resp = svc.query_metrics(&anonymous).unwrap();
    assert!(resp.metrics.is_empty());
    assert!(repo.queries().is_empty());
}
