use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{TimeZone, Utc};
use spanlens_core::filter::{FieldType, FilterField, FilterFields, QueryType};
use spanlens_core::model::span::{Span, TAG_ERROR, TAG_INPUT_TOKENS, TAG_MODEL_NAME, TAG_OUTPUT_TOKENS};

const MS: i64 = 1000;

fn span(trace_id: &str, id: &str, parent: &str, span_type: &str, offset_ms: i64, duration_ms: i64) -> Span {
    let base = Utc
        .with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
        .single()
        .map(|t| t.timestamp_micros())
        .unwrap_or_default();
    Span {
        trace_id: trace_id.to_string(),
        span_id: id.to_string(),
        parent_id: parent.to_string(),
        span_type: span_type.to_string(),
        span_name: format!("{id}-name"),
        start_time: base + offset_ms * MS,
        duration: duration_ms * MS,
        space_id: "ws-1".to_string(),
        ..Span::default()
    }
}

/// An agent run with a nested sub-agent:
/// `r(agent) -> p1(parser) -> m1(model)`, `r -> t1(tool, 500)`,
/// `r -> a1(agent) -> o2(remote) -> m2(model, 400)`, `a1 -> t2(tool)`.
pub fn sample_agent_trace(trace_id: &str) -> Vec<Span> {
    let mut t1 = span(trace_id, "t1", "r", "tool", 200, 1000).with_tag(TAG_ERROR, "tool failed");
    t1.status_code = 500;
    let mut m2 = span(trace_id, "m2", "o2", "model", 400, 1500)
        .with_tag(TAG_MODEL_NAME, "gpt-4o-mini")
        .with_tag(TAG_INPUT_TOKENS, 100_i64)
        .with_tag(TAG_OUTPUT_TOKENS, 60_i64);
    m2.status_code = 400;
    vec![
        span(trace_id, "r", "0", "agent", 0, 3000),
        span(trace_id, "p1", "r", "parser", 100, 2100),
        span(trace_id, "m1", "p1", "model", 110, 2000)
            .with_tag(TAG_MODEL_NAME, "gpt-4o")
            .with_tag(TAG_INPUT_TOKENS, 50_i64)
            .with_tag(TAG_OUTPUT_TOKENS, 20_i64),
        t1,
        span(trace_id, "a1", "r", "agent", 300, 3000),
        span(trace_id, "o2", "a1", "remote", 350, 1600),
        m2,
        span(trace_id, "t2", "a1", "tool", 500, 2000),
    ]
}

/// Model spans that failed or took longer than `slow_ms`.
pub fn slow_or_failed_models(slow_ms: i64) -> FilterFields {
    let problems = FilterFields::or(vec![
        FilterField::leaf("status_code", FieldType::Long, QueryType::NotIn, ["0"]),
        FilterField::leaf("duration", FieldType::Long, QueryType::Gt, [(slow_ms * MS).to_string()]),
    ]);
    let mut filter = FilterFields::model_spans();
    filter.filter_fields.push(FilterField::nested(problems));
    filter
}

pub fn write_json<T: serde::Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(value).context("serialize fixture")?;
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
