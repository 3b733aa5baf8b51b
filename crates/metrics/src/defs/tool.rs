use spanlens_core::time::Granularity;

use super::{
    by_status_code, by_tool_name, count, duration_ms, fail_count, failed, success_count,
    success_ratio,
};
use crate::definition::{AggrType, Expression, Fill, MetricDefinition, MetricType, SpanScope};
use crate::wrapper::Wrapper;

pub const TOOL_TOTAL_COUNT: &str = "tool_total_count";
pub const TOOL_TOTAL_COUNT_PIE: &str = "tool_total_count_pie";
pub const TOOL_TOTAL_ERROR_COUNT: &str = "tool_total_error_count";
pub const TOOL_TOTAL_SUCCESS_COUNT: &str = "tool_total_success_count";
pub const TOOL_DURATION: &str = "tool_duration";
pub const TOOL_SUCCESS_RATIO: &str = "tool_success_ratio";
pub const TOOL_ERROR_CODE_PIE: &str = "tool_error_code_pie";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![
        counter(TOOL_TOTAL_COUNT, count),
        MetricDefinition::direct(TOOL_TOTAL_COUNT_PIE, MetricType::Pie, SpanScope::Tool, count)
            .with_group_by(by_tool_name()),
        counter(TOOL_TOTAL_ERROR_COUNT, fail_count),
        counter(TOOL_TOTAL_SUCCESS_COUNT, success_count),
        MetricDefinition::direct(TOOL_DURATION, MetricType::TimeSeries, SpanScope::Tool, duration_ms)
            .with_fill(Fill::Null)
            .with_wrappers(Wrapper::DISTRIBUTION),
        counter(TOOL_SUCCESS_RATIO, success_ratio).with_fill(Fill::Null),
        MetricDefinition::direct(TOOL_ERROR_CODE_PIE, MetricType::Pie, SpanScope::Tool, count)
            .with_where(failed())
            .with_group_by(by_status_code()),
    ]
}

fn counter(name: &str, expression: fn(Granularity) -> Expression) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::Summary, SpanScope::Tool, expression)
        .with_o_expression(AggrType::Sum)
        .with_wrappers(Wrapper::SELF_AND_SERIES)
}
