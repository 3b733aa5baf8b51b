use spanlens_core::filter::{FieldType, FilterField, QueryType};
use spanlens_core::model::span::{
    FIELD_SPAN_TYPE, SPAN_TYPE_LLM_CALL, SPAN_TYPE_MODEL, SPAN_TYPE_TOOL, TAG_MESSAGE_ID,
    TAG_USER_ID,
};
use spanlens_core::time::Granularity;

use super::model::{qpm_all, qpm_fail, qpm_success, qps_all, qps_fail, qps_success};
use super::{count, duration_ms, fail_count, success_count, success_ratio};
use crate::definition::{AggrType, Expression, Fill, MetricDefinition, MetricType, SpanScope};
use crate::wrapper::Wrapper;

pub const SERVICE_TRACE_COUNT: &str = "service_trace_count";
pub const SERVICE_TRACE_ERROR_COUNT: &str = "service_trace_error_count";
pub const SERVICE_TRACE_SUCCESS_COUNT: &str = "service_trace_success_count";
pub const SERVICE_SPAN_COUNT: &str = "service_span_count";
pub const SERVICE_SPAN_ERROR_COUNT: &str = "service_span_error_count";
pub const SERVICE_SPAN_SUCCESS_COUNT: &str = "service_span_success_count";
pub const SERVICE_USER_COUNT: &str = "service_user_count";
pub const SERVICE_MESSAGE_COUNT: &str = "service_message_count";
pub const SERVICE_QPS_ALL: &str = "service_qps_all";
pub const SERVICE_QPS_SUCCESS: &str = "service_qps_success";
pub const SERVICE_QPS_FAIL: &str = "service_qps_fail";
pub const SERVICE_QPM_ALL: &str = "service_qpm_all";
pub const SERVICE_QPM_SUCCESS: &str = "service_qpm_success";
pub const SERVICE_QPM_FAIL: &str = "service_qpm_fail";
pub const SERVICE_DURATION: &str = "service_duration";
pub const SERVICE_SUCCESS_RATIO: &str = "service_success_ratio";
pub const SERVICE_EXECUTION_STEP_COUNT: &str = "service_execution_step_count";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![
        counter(SERVICE_TRACE_COUNT, SpanScope::Root, count),
        counter(SERVICE_TRACE_ERROR_COUNT, SpanScope::Root, fail_count),
        counter(SERVICE_TRACE_SUCCESS_COUNT, SpanScope::Root, success_count),
        counter(SERVICE_SPAN_COUNT, SpanScope::All, count),
        counter(SERVICE_SPAN_ERROR_COUNT, SpanScope::All, fail_count),
        counter(SERVICE_SPAN_SUCCESS_COUNT, SpanScope::All, success_count),
        counter(SERVICE_USER_COUNT, SpanScope::All, uniq_users),
        counter(SERVICE_MESSAGE_COUNT, SpanScope::All, uniq_messages),
        rate(SERVICE_QPS_ALL, qps_all),
        rate(SERVICE_QPS_SUCCESS, qps_success),
        rate(SERVICE_QPS_FAIL, qps_fail),
        rate(SERVICE_QPM_ALL, qpm_all),
        rate(SERVICE_QPM_SUCCESS, qpm_success),
        rate(SERVICE_QPM_FAIL, qpm_fail),
        MetricDefinition::direct(SERVICE_DURATION, MetricType::TimeSeries, SpanScope::Root, duration_ms)
            .with_fill(Fill::Null)
            .with_wrappers(Wrapper::DISTRIBUTION),
        counter(SERVICE_SUCCESS_RATIO, SpanScope::Root, success_ratio).with_fill(Fill::Null),
        counter(SERVICE_EXECUTION_STEP_COUNT, SpanScope::All, count).with_where(execution_steps()),
    ]
}

fn counter(
    name: &str,
    scope: SpanScope,
    expression: fn(Granularity) -> Expression,
) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::Summary, scope, expression)
        .with_o_expression(AggrType::Sum)
        .with_wrappers(Wrapper::SELF_AND_SERIES)
}

fn rate(name: &str, expression: fn(Granularity) -> Expression) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::TimeSeries, SpanScope::Root, expression)
        .with_o_expression(AggrType::Avg)
}

/// Model and tool invocations; the units an agent run is measured in.
pub(crate) fn execution_steps() -> FilterField {
    FilterField::leaf(
        FIELD_SPAN_TYPE,
        FieldType::String,
        QueryType::In,
        [SPAN_TYPE_MODEL, SPAN_TYPE_LLM_CALL, SPAN_TYPE_TOOL],
    )
}

fn uniq_users(_: Granularity) -> Expression {
    Expression::new("uniq(%s)", vec![FilterField::column(TAG_USER_ID, FieldType::String)])
}

fn uniq_messages(_: Granularity) -> Expression {
    Expression::new("uniq(%s)", vec![FilterField::column(TAG_MESSAGE_ID, FieldType::String)])
}
