use std::fmt;

use serde::{Deserialize, Serialize};
use spanlens_core::filter::FilterField;
use spanlens_core::time::Granularity;
use spanlens_core::{Result, SpanlensError};

use crate::span_filter::{SpanEnv, SpanFilter};
use crate::wrapper::Wrapper;

pub const PLACEHOLDER: &str = "%s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    TimeSeries,
    Summary,
    Pie,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimeSeries => "time_series",
            Self::Summary => "summary",
            Self::Pie => "pie",
        })
    }
}

/// Where the raw aggregation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    Warehouse,
    InProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Direct,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggrType {
    Sum,
    Avg,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Divide,
    Pie,
}

/// Value written into time buckets the repository returned nothing for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
    #[default]
    Zero,
    Null,
}

impl Fill {
    pub fn value(self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Null => "null",
        }
    }
}

/// Selection predicate family a metric draws its spans from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanScope {
    Root,
    Llm,
    Tool,
    All,
    Unscoped,
}

/// An expression template. Each `%s` is replaced, in order, by the name of the
/// matching entry in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub expression: String,
    pub fields: Vec<FilterField>,
}

impl Expression {
    pub fn new(expression: impl Into<String>, fields: Vec<FilterField>) -> Self {
        Self {
            expression: expression.into(),
            fields,
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.expression.matches(PLACEHOLDER).count()
    }

    pub fn render(&self) -> Result<String> {
        if self.placeholder_count() != self.fields.len() {
            return Err(SpanlensError::Metric(format!(
                "expression {:?} has {} placeholders for {} fields",
                self.expression,
                self.placeholder_count(),
                self.fields.len()
            )));
        }
        let mut out = String::with_capacity(self.expression.len());
        let mut rest = self.expression.as_str();
        for field in &self.fields {
            if let Some((head, tail)) = rest.split_once(PLACEHOLDER) {
                out.push_str(head);
                out.push_str(&field.field_name);
                rest = tail;
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FilterField>,
    pub alias: String,
}

impl Dimension {
    pub fn field(field: FilterField, alias: impl Into<String>) -> Self {
        Self {
            expression: None,
            field: Some(field),
            alias: alias.into(),
        }
    }
}

/// Offline pre-aggregation hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OExpression {
    pub aggr_type: AggrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
}

impl OExpression {
    pub fn new(aggr_type: AggrType) -> Self {
        Self {
            aggr_type,
            metric_name: None,
        }
    }
}

pub type ExpressionFn = fn(Granularity) -> Expression;

#[derive(Debug, Clone)]
enum Body {
    Template(ExpressionFn),
    Wrapped {
        base: Box<MetricDefinition>,
        wrapper: Wrapper,
    },
    Composite {
        operator: Operator,
        metrics: Vec<MetricDefinition>,
    },
}

/// One catalog entry. Direct definitions render an expression for the warehouse;
/// composite ones are evaluated in process from two sub-metrics.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    name: String,
    metric_type: MetricType,
    scope: SpanScope,
    extra_where: Vec<FilterField>,
    group_by: Vec<Dimension>,
    wrappers: Vec<Wrapper>,
    o_expression: Option<OExpression>,
    fill: Fill,
    body: Body,
}

impl MetricDefinition {
    pub fn direct(
        name: impl Into<String>,
        metric_type: MetricType,
        scope: SpanScope,
        expression: ExpressionFn,
    ) -> Self {
        Self {
            name: name.into(),
            metric_type,
            scope,
            extra_where: Vec::new(),
            group_by: Vec::new(),
            wrappers: Vec::new(),
            o_expression: None,
            fill: Fill::Zero,
            body: Body::Template(expression),
        }
    }

    pub fn composite(
        name: impl Into<String>,
        metric_type: MetricType,
        operator: Operator,
        metrics: Vec<MetricDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            metric_type,
            scope: SpanScope::Unscoped,
            extra_where: Vec::new(),
            group_by: Vec::new(),
            wrappers: Vec::new(),
            o_expression: None,
            fill: Fill::Null,
            body: Body::Composite { operator, metrics },
        }
    }

    pub(crate) fn wrapped(base: &MetricDefinition, wrapper: Wrapper) -> Self {
        let mut inner = base.clone();
        inner.wrappers.clear();
        Self {
            name: format!("{}{}", base.name, wrapper.suffix()),
            metric_type: wrapper.metric_type(base.metric_type),
            scope: base.scope,
            extra_where: base.extra_where.clone(),
            group_by: base.group_by.clone(),
            wrappers: Vec::new(),
            o_expression: Some(wrapper.o_expression(base.o_expression.as_ref())),
            fill: base.fill,
            body: Body::Wrapped {
                base: Box::new(inner),
                wrapper,
            },
        }
    }

    pub fn with_where(mut self, field: FilterField) -> Self {
        self.extra_where.push(field);
        self
    }

    pub fn with_group_by(mut self, dimension: Dimension) -> Self {
        self.group_by.push(dimension);
        self
    }

    pub fn with_wrappers(mut self, wrappers: impl IntoIterator<Item = Wrapper>) -> Self {
        self.wrappers.extend(wrappers);
        self
    }

    pub fn with_o_expression(mut self, aggr_type: AggrType) -> Self {
        self.o_expression = Some(OExpression::new(aggr_type));
        self
    }

    pub fn with_fill(mut self, fill: Fill) -> Self {
        self.fill = fill;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn kind(&self) -> MetricKind {
        match self.body {
            Body::Composite { .. } => MetricKind::Composite,
            Body::Template(_) | Body::Wrapped { .. } => MetricKind::Direct,
        }
    }

    pub fn source(&self) -> MetricSource {
        match self.kind() {
            MetricKind::Direct => MetricSource::Warehouse,
            MetricKind::Composite => MetricSource::InProcess,
        }
    }

    pub fn scope(&self) -> SpanScope {
        self.scope
    }

    pub fn fill(&self) -> Fill {
        self.fill
    }

    /// `None` for composite definitions, which have no self-contained expression.
    pub fn expression(&self, granularity: Granularity) -> Option<Expression> {
        match &self.body {
            Body::Template(render) => Some(render(granularity)),
            Body::Wrapped { base, wrapper } => base
                .expression(granularity)
                .map(|expr| wrapper.apply(expr)),
            Body::Composite { .. } => None,
        }
    }

    /// Structural predicate for this metric merged with its own extra constraints.
    pub fn where_clause(&self, filter: &dyn SpanFilter, env: &SpanEnv) -> Result<Vec<FilterField>> {
        let mut fields = match self.scope {
            SpanScope::Root => filter.root_spans(env)?,
            SpanScope::Llm => filter.llm_spans(env)?,
            SpanScope::Tool => filter.tool_spans(env)?,
            SpanScope::All => filter.all_spans(env)?,
            SpanScope::Unscoped => Vec::new(),
        };
        fields.extend(self.extra_where.iter().cloned());
        Ok(fields)
    }

    pub fn group_by(&self) -> &[Dimension] {
        &self.group_by
    }

    pub fn wrappers(&self) -> &[Wrapper] {
        &self.wrappers
    }

    pub fn is_wrappable(&self) -> bool {
        !self.wrappers.is_empty()
    }

    /// The wrapper that produced this definition, if any.
    pub fn wrapper(&self) -> Option<Wrapper> {
        match &self.body {
            Body::Wrapped { wrapper, .. } => Some(*wrapper),
            _ => None,
        }
    }

    /// Sub-metrics of a composite definition, empty otherwise.
    pub fn metrics(&self) -> &[MetricDefinition] {
        match &self.body {
            Body::Composite { metrics, .. } => metrics,
            _ => &[],
        }
    }

    pub fn operator(&self) -> Option<Operator> {
        match &self.body {
            Body::Composite { operator, .. } => Some(*operator),
            _ => None,
        }
    }

    pub fn o_expression(&self) -> Option<&OExpression> {
        self.o_expression.as_ref()
    }

    /// The definitions this entry contributes to a catalog: its wrapped variants when it
    /// is wrappable, otherwise itself.
    pub fn expand(&self) -> Vec<MetricDefinition> {
        if self.wrappers.is_empty() {
            return vec![self.clone()];
        }
        self.wrappers.iter().map(|w| w.wrap(self)).collect()
    }
}

#[cfg(test)]
mod tests {
    use spanlens_core::filter::FieldType;

    use super::*;
    use crate::span_filter::PlatformSpanFilter;

    fn ratio(_: Granularity) -> Expression {
        Expression::new(
            "countIf(1, %s != 0) / count()",
            vec![FilterField::column("status_code", FieldType::Long)],
        )
    }

    #[test]
    fn render_substitutes_fields_in_order() {
        let expr = Expression::new(
            "(%s-%s)/(1000*%s)",
            vec![
                FilterField::column("duration", FieldType::Long),
                FilterField::column("latency_first_resp", FieldType::Long),
                FilterField::column("output_tokens", FieldType::Long),
            ],
        );
        assert_eq!(
            expr.render().unwrap(),
            "(duration-latency_first_resp)/(1000*output_tokens)"
        );
    }

    #[test]
    fn render_rejects_mismatched_placeholders() {
        let expr = Expression::new("sum(%s)", vec![]);
        assert!(expr.render().is_err());
    }

    #[test]
    fn direct_definition_accessors() {
        let def = MetricDefinition::direct("fail_ratio", MetricType::Summary, SpanScope::Llm, ratio)
            .with_fill(Fill::Null);
        assert_eq!(def.kind(), MetricKind::Direct);
        assert_eq!(def.source(), MetricSource::Warehouse);
        assert_eq!(def.fill().value(), "null");
        assert!(def.metrics().is_empty());
        assert!(def.operator().is_none());
        assert_eq!(def.expand().len(), 1);
        assert_eq!(
            def.expression(Granularity::Minute).unwrap().render().unwrap(),
            "countIf(1, status_code != 0) / count()"
        );
    }

    #[test]
    fn where_clause_appends_extra_constraints() {
        let extra = FilterField::leaf(
            "status_code",
            FieldType::Long,
            spanlens_core::filter::QueryType::NotIn,
            ["0"],
        );
        let def = MetricDefinition::direct("errors", MetricType::Pie, SpanScope::Tool, ratio)
            .with_where(extra.clone());
        let fields = def
            .where_clause(&PlatformSpanFilter, &SpanEnv::default())
            .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field_name, "span_type");
        assert_eq!(fields[1], extra);
    }

    #[test]
    fn composite_has_no_expression() {
        let sub = MetricDefinition::direct("a", MetricType::Summary, SpanScope::All, ratio);
        let def = MetricDefinition::composite(
            "a_over_b",
            MetricType::Summary,
            Operator::Divide,
            vec![sub.clone(), sub],
        );
        assert_eq!(def.kind(), MetricKind::Composite);
        assert_eq!(def.source(), MetricSource::InProcess);
        assert_eq!(def.operator(), Some(Operator::Divide));
        assert_eq!(def.metrics().len(), 2);
        assert!(def.expression(Granularity::Hour).is_none());
    }
}
