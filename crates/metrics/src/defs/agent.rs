use super::count;
use super::service::execution_steps;
use crate::definition::{AggrType, MetricDefinition, MetricType, Operator, SpanScope};

pub const AGENT_STEP_AVG: &str = "agent_step_avg";
pub const AGENT_MODEL_STEP_AVG: &str = "agent_model_step_avg";
pub const AGENT_TOOL_STEP_AVG: &str = "agent_tool_step_avg";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![
        per_run(
            AGENT_STEP_AVG,
            step_count("agent_execution_step_count", SpanScope::All).with_where(execution_steps()),
        ),
        per_run(
            AGENT_MODEL_STEP_AVG,
            step_count("agent_model_step_count", SpanScope::Llm),
        ),
        per_run(
            AGENT_TOOL_STEP_AVG,
            step_count("agent_tool_step_count", SpanScope::Tool),
        ),
    ]
}

fn step_count(name: &str, scope: SpanScope) -> MetricDefinition {
    MetricDefinition::direct(name, MetricType::TimeSeries, scope, count)
        .with_o_expression(AggrType::Sum)
}

/// Steps per agent run, bucketed over time.
fn per_run(name: &str, steps: MetricDefinition) -> MetricDefinition {
    let runs = step_count("agent_run_count", SpanScope::Root);
    MetricDefinition::composite(name, MetricType::TimeSeries, Operator::Divide, vec![steps, runs])
        .with_o_expression(AggrType::Sum)
}
