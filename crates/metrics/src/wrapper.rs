use serde::{Deserialize, Serialize};

use crate::definition::{AggrType, Expression, MetricDefinition, MetricType, OExpression};

/// Derives a variant of a base metric: a different aggregation over the same
/// per-span expression, or the same expression under another presentation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wrapper {
    Avg,
    Min,
    Max,
    Pct50,
    Pct90,
    Pct99,
    /// Keeps the base name and expression, presented as the given type.
    Identity(MetricType),
    TimeSeries,
}

impl Wrapper {
    /// avg, min, max and the three percentiles.
    pub const DISTRIBUTION: [Wrapper; 6] = [
        Self::Avg,
        Self::Min,
        Self::Max,
        Self::Pct50,
        Self::Pct90,
        Self::Pct99,
    ];

    /// The base metric as a summary plus its `_by_time` series.
    pub const SELF_AND_SERIES: [Wrapper; 2] = [Self::Identity(MetricType::Summary), Self::TimeSeries];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Avg => "_avg",
            Self::Min => "_min",
            Self::Max => "_max",
            Self::Pct50 => "_pct50",
            Self::Pct90 => "_pct90",
            Self::Pct99 => "_pct99",
            Self::Identity(_) => "",
            Self::TimeSeries => "_by_time",
        }
    }

    pub fn metric_type(self, base: MetricType) -> MetricType {
        match self {
            Self::Identity(t) => t,
            Self::TimeSeries => MetricType::TimeSeries,
            _ => base,
        }
    }

    pub fn apply(self, expr: Expression) -> Expression {
        let outer = match self {
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Pct50 => "quantile(0.5)",
            Self::Pct90 => "quantile(0.9)",
            Self::Pct99 => "quantile(0.99)",
            Self::Identity(_) | Self::TimeSeries => return expr,
        };
        Expression {
            expression: format!("{outer}({})", expr.expression),
            fields: expr.fields,
        }
    }

    pub fn o_expression(self, base: Option<&OExpression>) -> OExpression {
        let aggr_type = match self {
            Self::Min => AggrType::Min,
            Self::Max => AggrType::Max,
            Self::Avg | Self::Pct50 | Self::Pct90 | Self::Pct99 => AggrType::Avg,
            Self::Identity(_) | Self::TimeSeries => {
                return base.cloned().unwrap_or(OExpression::new(AggrType::Sum));
            }
        };
        OExpression::new(aggr_type)
    }

    pub fn wrap(self, base: &MetricDefinition) -> MetricDefinition {
        MetricDefinition::wrapped(base, self)
    }
}
