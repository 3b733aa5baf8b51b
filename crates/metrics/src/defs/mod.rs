//! Built-in metric families.

pub mod agent;
pub mod consts;
pub mod general;
pub mod model;
pub mod service;
pub mod tool;

use spanlens_core::filter::{FieldType, FilterField, QueryType};
use spanlens_core::model::span::{
    FIELD_DURATION, FIELD_SPAN_NAME, FIELD_STATUS_CODE, TAG_INPUT_TOKENS, TAG_LATENCY_FIRST_RESP,
    TAG_MODEL_NAME, TAG_OUTPUT_TOKENS,
};
use spanlens_core::time::Granularity;

use crate::definition::{Dimension, Expression, MetricDefinition};

/// Every built-in definition, before wrapper expansion.
pub fn builtin_definitions() -> Vec<MetricDefinition> {
    let mut defs = Vec::new();
    defs.extend(general::definitions());
    defs.extend(model::definitions());
    defs.extend(tool::definitions());
    defs.extend(service::definitions());
    defs.extend(agent::definitions());
    defs.extend(consts::definitions());
    defs
}

pub(crate) fn long(name: &str) -> FilterField {
    FilterField::column(name, FieldType::Long)
}

pub(crate) fn status_code() -> FilterField {
    long(FIELD_STATUS_CODE)
}

pub(crate) fn duration() -> FilterField {
    long(FIELD_DURATION)
}

pub(crate) fn input_tokens() -> FilterField {
    long(TAG_INPUT_TOKENS)
}

pub(crate) fn output_tokens() -> FilterField {
    long(TAG_OUTPUT_TOKENS)
}

pub(crate) fn first_resp() -> FilterField {
    long(TAG_LATENCY_FIRST_RESP)
}

pub(crate) fn failed() -> FilterField {
    FilterField::leaf(FIELD_STATUS_CODE, FieldType::Long, QueryType::NotIn, ["0"])
}

pub(crate) fn positive(field: &str) -> FilterField {
    FilterField::leaf(field, FieldType::Long, QueryType::Gt, ["0"])
}

pub(crate) fn by_model_name() -> Dimension {
    Dimension::field(
        FilterField::column(TAG_MODEL_NAME, FieldType::String).custom(),
        TAG_MODEL_NAME,
    )
}

pub(crate) fn by_tool_name() -> Dimension {
    Dimension::field(
        FilterField::column(FIELD_SPAN_NAME, FieldType::String),
        "tool_name",
    )
}

pub(crate) fn by_status_code() -> Dimension {
    Dimension::field(status_code(), FIELD_STATUS_CODE)
}

pub(crate) fn count(_: Granularity) -> Expression {
    Expression::new("count()", vec![])
}

pub(crate) fn success_count(_: Granularity) -> Expression {
    Expression::new("countIf(1, %s = 0)", vec![status_code()])
}

pub(crate) fn fail_count(_: Granularity) -> Expression {
    Expression::new("countIf(1, %s != 0)", vec![status_code()])
}

pub(crate) fn success_ratio(_: Granularity) -> Expression {
    Expression::new("countIf(1, %s = 0) / count()", vec![status_code()])
}

pub(crate) fn fail_ratio(_: Granularity) -> Expression {
    Expression::new("countIf(1, %s != 0) / count()", vec![status_code()])
}

pub(crate) fn duration_ms(_: Granularity) -> Expression {
    Expression::new("%s/1000", vec![duration()])
}

pub(crate) fn duration_sum_ms(_: Granularity) -> Expression {
    Expression::new("sum(%s) / 1000", vec![duration()])
}

pub(crate) fn total_tokens(_: Granularity) -> Expression {
    Expression::new("sum(%s + %s)", vec![input_tokens(), output_tokens()])
}

pub(crate) fn per_minute(granularity: Granularity) -> i64 {
    granularity.seconds() / 60
}
