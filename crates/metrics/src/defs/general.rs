use super::{count, duration_sum_ms, fail_ratio, total_tokens};
use crate::definition::{AggrType, Fill, MetricDefinition, MetricType, Operator, SpanScope};

pub const GENERAL_TOTAL_COUNT: &str = "general_total_count";
pub const GENERAL_FAIL_RATIO: &str = "general_fail_ratio";
pub const GENERAL_MODEL_FAIL_RATIO: &str = "general_model_fail_ratio";
pub const GENERAL_MODEL_LATENCY_AVG: &str = "general_model_latency_avg";
pub const GENERAL_MODEL_TOTAL_TOKENS: &str = "general_model_total_tokens";
pub const GENERAL_TOOL_TOTAL_COUNT: &str = "general_tool_total_count";
pub const GENERAL_TOOL_FAIL_RATIO: &str = "general_tool_fail_ratio";
pub const GENERAL_TOOL_LATENCY_AVG: &str = "general_tool_latency_avg";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::direct(GENERAL_TOTAL_COUNT, MetricType::Summary, SpanScope::Root, count)
            .with_o_expression(AggrType::Sum),
        MetricDefinition::direct(GENERAL_FAIL_RATIO, MetricType::Summary, SpanScope::Root, fail_ratio)
            .with_fill(Fill::Null),
        MetricDefinition::direct(
            GENERAL_MODEL_FAIL_RATIO,
            MetricType::Summary,
            SpanScope::Llm,
            fail_ratio,
        )
        .with_fill(Fill::Null),
        latency_avg(GENERAL_MODEL_LATENCY_AVG, "general_model", SpanScope::Llm),
        MetricDefinition::direct(
            GENERAL_MODEL_TOTAL_TOKENS,
            MetricType::Summary,
            SpanScope::Llm,
            total_tokens,
        )
        .with_o_expression(AggrType::Sum),
        MetricDefinition::direct(GENERAL_TOOL_TOTAL_COUNT, MetricType::Summary, SpanScope::Tool, count)
            .with_o_expression(AggrType::Sum),
        MetricDefinition::direct(
            GENERAL_TOOL_FAIL_RATIO,
            MetricType::Summary,
            SpanScope::Tool,
            fail_ratio,
        )
        .with_fill(Fill::Null),
        latency_avg(GENERAL_TOOL_LATENCY_AVG, "general_tool", SpanScope::Tool),
    ]
}

/// Summed latency in milliseconds over the span count, both summed offline.
fn latency_avg(name: &str, prefix: &str, scope: SpanScope) -> MetricDefinition {
    let total = MetricDefinition::direct(
        format!("{prefix}_duration_sum"),
        MetricType::Summary,
        scope,
        duration_sum_ms,
    )
    .with_o_expression(AggrType::Sum);
    let calls = MetricDefinition::direct(format!("{prefix}_count"), MetricType::Summary, scope, count)
        .with_o_expression(AggrType::Sum);
    MetricDefinition::composite(name, MetricType::Summary, Operator::Divide, vec![total, calls])
        .with_o_expression(AggrType::Avg)
}
