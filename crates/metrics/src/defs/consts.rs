use spanlens_core::time::Granularity;

use crate::definition::{Expression, MetricDefinition, MetricType, SpanScope};

pub const CONST_MINUTE: &str = "const_minute";

pub fn definitions() -> Vec<MetricDefinition> {
    vec![MetricDefinition::direct(
        CONST_MINUTE,
        MetricType::Summary,
        SpanScope::Unscoped,
        one,
    )]
}

fn one(_: Granularity) -> Expression {
    Expression::new("1", vec![])
}
