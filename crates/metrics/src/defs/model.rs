use spanlens_core::model::span::{
    FIELD_DURATION, TAG_LATENCY_FIRST_RESP, TAG_MODEL_SYSTEM_TOKENS, TAG_MODEL_TOOL_CHOICE_TOKENS,
    TAG_OUTPUT_TOKENS,
};
use spanlens_core::time::Granularity;

use super::{
    by_model_name, by_status_code, count, duration, duration_ms, fail_count, failed, first_resp,
    input_tokens, long, output_tokens, per_minute, positive, status_code, success_count,
    success_ratio, total_tokens,
};
use crate::definition::{AggrType, Expression, Fill, MetricDefinition, MetricType, SpanScope};
use crate::wrapper::Wrapper;

pub const MODEL_TOKEN_COUNT: &str = "model_token_count";
pub const MODEL_TOKEN_COUNT_PIE: &str = "model_token_count_pie";
pub const MODEL_INPUT_TOKEN_COUNT: &str = "model_input_token_count";
pub const MODEL_OUTPUT_TOKEN_COUNT: &str = "model_output_token_count";
pub const MODEL_SYSTEM_TOKEN_COUNT: &str = "model_system_token_count";
pub const MODEL_TOOL_CHOICE_TOKEN_COUNT: &str = "model_tool_choice_token_count";
pub const MODEL_QPS_ALL: &str = "model_qps_all";
pub const MODEL_QPS_SUCCESS: &str = "model_qps_success";
pub const MODEL_QPS_FAIL: &str = "model_qps_fail";
pub const MODEL_QPM_ALL: &str = "model_qpm_all";
pub const MODEL_QPM_SUCCESS: &str = "model_qpm_success";
pub const MODEL_QPM_FAIL: &str = "model_qpm_fail";
pub const MODEL_SUCCESS_RATIO: &str = "model_success_ratio";
pub const MODEL_TPS: &str = "model_tps";
pub const MODEL_TPM: &str = "model_tpm";
pub const MODEL_DURATION: &str = "model_duration";
pub const MODEL_TTFT: &str = "model_ttft";
pub const MODEL_TPOT: &str = "model_tpot";
pub const MODEL_TOTAL_COUNT: &str = "model_total_count";
pub const MODEL_TOTAL_COUNT_PIE: &str = "model_total_count_pie";
pub const MODEL_TOTAL_ERROR_COUNT: &str = "model_total_error_count";
pub const MODEL_TOTAL_SUCCESS_COUNT: &str = "model_total_success_count";
pub const MODEL_ERROR_CODE_PIE: &str = "model_error_code_pie";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![
        counter(MODEL_TOKEN_COUNT, total_tokens),
        MetricDefinition::direct(MODEL_TOKEN_COUNT_PIE, MetricType::Pie, SpanScope::Llm, total_tokens)
            .with_group_by(by_model_name()),
        counter(MODEL_INPUT_TOKEN_COUNT, input_token_sum),
        counter(MODEL_OUTPUT_TOKEN_COUNT, output_token_sum),
        counter(MODEL_SYSTEM_TOKEN_COUNT, system_token_sum),
        counter(MODEL_TOOL_CHOICE_TOKEN_COUNT, tool_choice_token_sum),
        rate(MODEL_QPS_ALL, qps_all),
        rate(MODEL_QPS_SUCCESS, qps_success),
        rate(MODEL_QPS_FAIL, qps_fail),
        rate(MODEL_QPM_ALL, qpm_all),
        rate(MODEL_QPM_SUCCESS, qpm_success),
        rate(MODEL_QPM_FAIL, qpm_fail),
        counter(MODEL_SUCCESS_RATIO, success_ratio).with_fill(Fill::Null),
        per_span(MODEL_TPS, tps).with_where(positive(FIELD_DURATION)),
        per_span(MODEL_TPM, tpm).with_where(positive(FIELD_DURATION)),
        per_span(MODEL_DURATION, duration_ms),
        per_span(MODEL_TTFT, ttft).with_where(positive(TAG_LATENCY_FIRST_RESP)),
        per_span(MODEL_TPOT, tpot)
            .with_where(positive(TAG_LATENCY_FIRST_RESP))
            .with_where(positive(TAG_OUTPUT_TOKENS)),
        counter(MODEL_TOTAL_COUNT, count),
        MetricDefinition::direct(MODEL_TOTAL_COUNT_PIE, MetricType::Pie, SpanScope::Llm, count)
            .with_group_by(by_model_name()),
        counter(MODEL_TOTAL_ERROR_COUNT, fail_count),
        counter(MODEL_TOTAL_SUCCESS_COUNT, success_count),
        MetricDefinition::direct(MODEL_ERROR_CODE_PIE, MetricType::Pie, SpanScope::Llm, count)
            .with_where(failed())
            .with_group_by(by_status_code()),
    ]
}

fn counter(name: &str, expression: fn(Granularity) -> Expression) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::Summary, SpanScope::Llm, expression)
        .with_o_expression(AggrType::Sum)
        .with_wrappers(Wrapper::SELF_AND_SERIES)
}

fn rate(name: &str, expression: fn(Granularity) -> Expression) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::TimeSeries, SpanScope::Llm, expression)
        .with_o_expression(AggrType::Avg)
}

fn per_span(name: &str, expression: fn(Granularity) -> Expression) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::TimeSeries, SpanScope::Llm, expression)
        .with_fill(Fill::Null)
        .with_wrappers(Wrapper::DISTRIBUTION)
}

fn input_token_sum(_: Granularity) -> Expression {
    Expression::new("sum(%s)", vec![input_tokens()])
}

fn output_token_sum(_: Granularity) -> Expression {
    Expression::new("sum(%s)", vec![output_tokens()])
}

fn system_token_sum(_: Granularity) -> Expression {
    Expression::new("sum(%s)", vec![long(TAG_MODEL_SYSTEM_TOKENS)])
}

fn tool_choice_token_sum(_: Granularity) -> Expression {
    Expression::new("sum(%s)", vec![long(TAG_MODEL_TOOL_CHOICE_TOKENS)])
}

fn tps(_: Granularity) -> Expression {
    Expression::new(
        "(%s+%s)/(%s / 1000000)",
        vec![input_tokens(), output_tokens(), duration()],
    )
}

fn tpm(_: Granularity) -> Expression {
    Expression::new(
        "(%s+%s)/(%s / 60000000)",
        vec![input_tokens(), output_tokens(), duration()],
    )
}

fn ttft(_: Granularity) -> Expression {
    Expression::new("%s/1000", vec![first_resp()])
}

fn tpot(_: Granularity) -> Expression {
    Expression::new(
        "(%s-%s)/(1000*%s)",
        vec![duration(), first_resp(), output_tokens()],
    )
}

pub(crate) fn qps_all(g: Granularity) -> Expression {
    Expression::new(format!("count()/{}", g.seconds()), vec![])
}

pub(crate) fn qps_success(g: Granularity) -> Expression {
    Expression::new(format!("countIf(1, %s = 0)/{}", g.seconds()), vec![status_code()])
}

pub(crate) fn qps_fail(g: Granularity) -> Expression {
    Expression::new(format!("countIf(1, %s != 0)/{}", g.seconds()), vec![status_code()])
}

pub(crate) fn qpm_all(g: Granularity) -> Expression {
    Expression::new(format!("count()/{}", per_minute(g)), vec![])
}

pub(crate) fn qpm_success(g: Granularity) -> Expression {
    Expression::new(format!("countIf(1, %s = 0)/{}", per_minute(g)), vec![status_code()])
}

pub(crate) fn qpm_fail(g: Granularity) -> Expression {
    Expression::new(format!("countIf(1, %s != 0)/{}", per_minute(g)), vec![status_code()])
}
