use chrono::{DateTime, SecondsFormat, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use spanlens_core::filter::FilterFields;
use spanlens_core::model::span::Span;
use spanlens_core::time::Granularity;
use spanlens_core::trajectory::{AgentStep, MetricsInfo, Step, Trajectory};
use spanlens_metrics::definition::{
    Fill, MetricKind, MetricSource, MetricType, OExpression, SpanScope,
};
use spanlens_metrics::{MetricDefinition, SpanEnv, SpanFilter, Wrapper};

#[derive(Debug, Serialize)]
pub struct MetricListItem<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub kind: MetricKind,
    pub source: MetricSource,
}

impl<'a> From<&'a MetricDefinition> for MetricListItem<'a> {
    fn from(def: &'a MetricDefinition) -> Self {
        Self {
            name: def.name(),
            metric_type: def.metric_type(),
            kind: def.kind(),
            source: def.source(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub kind: MetricKind,
    pub source: MetricSource,
    pub scope: SpanScope,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub fields: Vec<String>,
    #[serde(rename = "where")]
    pub where_filter: FilterFields,
    pub group_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<Wrapper>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub o_expression: Option<OExpression>,
    pub fill: Fill,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_metrics: Vec<MetricDescription>,
}

impl MetricDescription {
    pub fn build(
        def: &MetricDefinition,
        granularity: Granularity,
        span_filter: &dyn SpanFilter,
        env: &SpanEnv,
    ) -> anyhow::Result<Self> {
        let expr = def.expression(granularity);
        let rendered = expr.as_ref().map(|e| e.render()).transpose()?;
        let mut scoped = span_filter.basic_spans(env)?.fields;
        scoped.extend(def.where_clause(span_filter, env)?);
        let sub_metrics = def
            .metrics()
            .iter()
            .map(|sub| Self::build(sub, granularity, span_filter, env))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            name: def.name().to_string(),
            metric_type: def.metric_type(),
            kind: def.kind(),
            source: def.source(),
            scope: def.scope(),
            granularity,
            template: expr.as_ref().map(|e| e.expression.clone()),
            expression: rendered,
            fields: expr
                .map(|e| e.fields.into_iter().map(|f| f.field_name).collect())
                .unwrap_or_default(),
            where_filter: FilterFields::and(scoped),
            group_by: def.group_by().iter().map(|d| d.alias.clone()).collect(),
            wrapper: def.wrapper(),
            o_expression: def.o_expression().cloned(),
            fill: def.fill(),
            sub_metrics,
        })
    }
}

pub fn print_metrics_list_human(items: &[MetricListItem<'_>]) {
    for item in items {
        let kind = match item.kind {
            MetricKind::Direct => "direct".green().to_string(),
            MetricKind::Composite => "composite".yellow().to_string(),
        };
        println!("{} type={} kind={}", item.name.cyan(), item.metric_type, kind);
    }
    println!("-- {} metrics --", items.len());
}

pub fn print_metric_description_human(d: &MetricDescription) {
    print_description(d, 0);
}

fn print_description(d: &MetricDescription, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}METRIC {} type={} kind={:?} scope={:?} granularity={}",
        d.name.cyan(),
        d.metric_type,
        d.kind,
        d.scope,
        d.granularity
    );
    if let Some(expression) = &d.expression {
        println!("{indent}expression={expression}");
    }
    if !d.fields.is_empty() {
        println!("{indent}fields={}", d.fields.join(","));
    }
    println!("{indent}where={}", describe_filter(&d.where_filter));
    if !d.group_by.is_empty() {
        println!("{indent}group_by={}", d.group_by.join(","));
    }
    if let Some(w) = d.wrapper {
        println!("{indent}wrapper={w:?}");
    }
    if let Some(o) = &d.o_expression {
        println!("{indent}offline={:?}", o.aggr_type);
    }
    println!("{indent}fill={}", d.fill.value());
    for sub in &d.sub_metrics {
        print_description(sub, depth + 1);
    }
}

fn describe_filter(filter: &FilterFields) -> String {
    if filter.is_empty() {
        return "-".to_string();
    }
    filter
        .filter_fields
        .iter()
        .map(|f| {
            format!(
                "{} {} [{}]",
                f.field_name,
                f.query_type.as_ref().map(|q| q.as_str()).unwrap_or("?"),
                f.values.join(",")
            )
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

pub fn print_matches_human(matched: &[&Span], total: usize) {
    for span in matched {
        let status = if span.status_code == 0 {
            "ok".green().to_string()
        } else {
            span.status_code.red().to_string()
        };
        println!(
            "{} type={} name=\"{}\" duration={}ms status={}",
            span.span_id.cyan(),
            span.span_type,
            span.span_name,
            span.duration / 1000,
            status
        );
    }
    println!("-- {} of {} spans matched --", matched.len(), total);
}

pub fn print_trajectory_human(t: &Trajectory) {
    println!(
        "TRAJECTORY {} agents={}",
        t.id.as_deref().unwrap_or("-"),
        t.agent_steps.len()
    );
    if let Some(root) = &t.root_step {
        println!(
            "root={} name=\"{}\"",
            root.id.as_deref().unwrap_or("-"),
            root.name.as_deref().unwrap_or("")
        );
        if let Some(info) = &root.metrics_info {
            print_metrics_info(info, "  ");
        }
    }
    for agent in &t.agent_steps {
        print_agent(agent);
    }
}

fn print_agent(agent: &AgentStep) {
    let duration = agent
        .basic_info
        .as_ref()
        .map(|b| b.duration.as_str())
        .unwrap_or("-");
    println!(
        "AGENT {} name=\"{}\" parent={} duration={}ms steps={}",
        agent.id.as_deref().unwrap_or("-").cyan(),
        agent.name.as_deref().unwrap_or(""),
        agent.parent_id.as_deref().unwrap_or("-"),
        duration,
        agent.steps.len()
    );
    for step in &agent.steps {
        print_step(step);
    }
    if let Some(info) = &agent.metrics_info {
        print_metrics_info(info, "  ");
    }
}

fn print_step(step: &Step) {
    let step_type = step.step_type.as_deref().unwrap_or("-");
    let label = match step_type {
        "model" => step_type.magenta().to_string(),
        "tool" => step_type.blue().to_string(),
        "agent" => step_type.yellow().to_string(),
        _ => step_type.bright_black().to_string(),
    };
    let (duration, error) = match &step.basic_info {
        Some(b) => (
            b.duration.as_str(),
            b.error
                .as_ref()
                .map(|e| format!(" error={} {}", e.code, e.msg).red().to_string())
                .unwrap_or_default(),
        ),
        None => ("-", String::new()),
    };
    println!(
        "  {} {} \"{}\" {}ms{}",
        label,
        step.id.as_deref().unwrap_or("-"),
        step.name.as_deref().unwrap_or(""),
        duration,
        error
    );
}

fn print_metrics_info(info: &MetricsInfo, indent: &str) {
    let mut parts = Vec::new();
    if let Some(v) = &info.llm_duration {
        parts.push(format!("llm_duration={v}ms"));
    }
    if let Some(v) = &info.tool_duration {
        parts.push(format!("tool_duration={v}ms"));
    }
    if let Some(v) = info.model_error_rate {
        parts.push(format!("model_error_rate={v}"));
    }
    if let Some(v) = info.tool_error_rate {
        parts.push(format!("tool_error_rate={v}"));
    }
    if let Some(v) = info.tool_step_proportion {
        parts.push(format!("tool_step_proportion={v}"));
    }
    if let Some(v) = info.input_tokens {
        parts.push(format!("input_tokens={v}"));
    }
    if let Some(v) = info.output_tokens {
        parts.push(format!("output_tokens={v}"));
    }
    println!("{indent}{}", parts.join(" "));
}

pub fn print_intervals_human(starts: &[i64], granularity: Granularity) {
    for ms in starts {
        let ts = DateTime::<Utc>::from_timestamp_millis(*ms)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| ms.to_string());
        println!("{ts} {ms}");
    }
    println!("-- {} buckets of {} --", starts.len(), granularity);
}
