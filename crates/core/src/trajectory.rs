//! Reconstruction of one trace's flat span list into an agent-centric execution tree.
//!
//! Every agent span (plus the trace root) becomes an [`AgentStep`]. Its steps are found
//! by walking each direct child branch twice: once collecting the "other" spans along the
//! branch until an agent span is reached, and once picking the first agent/model/tool
//! span of every sub-branch. Latency, error and token figures are then rolled up per
//! agent and, deduplicated by step id, for the root.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::span::{
    SPAN_TYPE_AGENT, SPAN_TYPE_MODEL, SPAN_TYPE_TOOL, Span, TAG_ERROR,
    TAG_INPUT_CACHED_TOKENS, TAG_INPUT_CREATION_CACHED_TOKENS, TAG_INPUT_TOKENS,
    TAG_LATENCY_FIRST_RESP, TAG_OUTPUT_TOKENS, TAG_REASONING_TOKENS,
};
use crate::time::micros_to_millis;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_step: Option<RootStep>,
    #[serde(default)]
    pub agent_steps: Vec<AgentStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_info: Option<BasicInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_info: Option<MetricsInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_info: Option<BasicInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_info: Option<MetricsInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_info: Option<BasicInfo>,
}

impl Step {
    fn is(&self, step_type: &str) -> bool {
        self.step_type.as_deref() == Some(step_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Milliseconds.
    pub latency_first_resp: String,
    pub reasoning_tokens: i64,
    pub input_read_cached_tokens: i64,
    pub input_creation_cached_tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    /// Epoch milliseconds.
    pub started_at: String,
    /// Milliseconds.
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub code: i32,
    pub msg: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_duration: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_errors: BTreeMap<i32, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_errors: BTreeMap<i32, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_error_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_step_proportion: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
}

impl Trajectory {
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds the trajectory of one trace. Returns `None` for an empty span list.
pub fn build_trajectory_from_spans(spans: &[Span]) -> Option<Trajectory> {
    if spans.is_empty() {
        return None;
    }

    let tree = SpanTree::new(spans);
    let root = spans.iter().find(|s| s.is_root());

    let mut agent_spans: Vec<&Span> = root.into_iter().collect();
    agent_spans.extend(spans.iter().filter(|s| {
        s.span_type == SPAN_TYPE_AGENT && root.is_none_or(|r| r.span_id != s.span_id)
    }));

    let id = root.or(agent_spans.first().copied()).map(|s| s.trace_id.clone());

    let mut agent_steps: Vec<AgentStep> = agent_spans
        .iter()
        .map(|span| AgentStep {
            id: Some(span.span_id.clone()),
            parent_id: Some(span.parent_id.clone()),
            name: Some(span.span_name.clone()),
            input: Some(span.input.clone()),
            output: Some(span.output.clone()),
            steps: tree.agent_steps(span),
            basic_info: Some(basic_info(span)),
            ..AgentStep::default()
        })
        .collect();

    let root_step = root.map(|span| RootStep {
        id: Some(span.span_id.clone()),
        name: Some(span.span_name.clone()),
        input: Some(span.input.clone()),
        output: Some(span.output.clone()),
        basic_info: Some(basic_info(span)),
        metrics_info: root_metrics_info(&agent_steps),
        ..RootStep::default()
    });

    for agent in &mut agent_steps {
        agent.metrics_info = metrics_info(agent.steps.iter());
    }

    tracing::debug!(
        spans = spans.len(),
        agents = agent_steps.len(),
        has_root = root_step.is_some(),
        "trajectory built"
    );

    Some(Trajectory {
        id,
        root_step,
        agent_steps,
    })
}

/// Parent -> children index over the spans, deduplicated by span id (the last span with a
/// given id wins). With one parent per id, no walk from an agent can revisit a span.
struct SpanTree<'a> {
    children: HashMap<&'a str, Vec<&'a Span>>,
}

impl<'a> SpanTree<'a> {
    fn new(spans: &'a [Span]) -> Self {
        let by_id: HashMap<&str, (usize, &Span)> = spans
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.span_id.as_str(), (pos, s)))
            .collect();
        let mut indexed: Vec<(usize, &Span)> = by_id.into_values().collect();
        // earliest first, input order on ties
        indexed.sort_by_key(|(pos, s)| (s.start_time, *pos));

        let mut children: HashMap<&str, Vec<&Span>> = HashMap::new();
        for (_, span) in indexed {
            if span.parent_id != span.span_id {
                children.entry(span.parent_id.as_str()).or_default().push(span);
            }
        }
        Self { children }
    }

    fn children(&self, parent: &Span) -> &[&'a Span] {
        self.children
            .get(parent.span_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn agent_steps(&self, agent: &Span) -> Vec<Step> {
        let mut steps = Vec::new();
        for child in self.children(agent) {
            self.collect_other_steps(child, &mut steps);
            self.collect_first_typed_steps(child, &mut steps);
        }
        steps
    }

    fn collect_other_steps(&self, span: &Span, out: &mut Vec<Step>) {
        let step_type = step_type(span);
        if step_type == SPAN_TYPE_AGENT {
            return;
        }
        if step_type != SPAN_TYPE_MODEL && step_type != SPAN_TYPE_TOOL {
            out.push(build_step(span));
        }
        for child in self.children(span) {
            self.collect_other_steps(child, out);
        }
    }

    fn collect_first_typed_steps(&self, span: &Span, out: &mut Vec<Step>) {
        let step_type = step_type(span);
        if matches!(step_type, SPAN_TYPE_AGENT | SPAN_TYPE_MODEL | SPAN_TYPE_TOOL) {
            out.push(build_step(span));
            return;
        }
        for child in self.children(span) {
            self.collect_first_typed_steps(child, out);
        }
    }
}

/// Agent, model and tool keep their type; an unrecognised root is reported as a tool,
/// anything else keeps its literal span type.
pub fn step_type(span: &Span) -> &str {
    match span.span_type.as_str() {
        t @ (SPAN_TYPE_AGENT | SPAN_TYPE_MODEL | SPAN_TYPE_TOOL) => t,
        _ if span.is_root() => SPAN_TYPE_TOOL,
        other => other,
    }
}

fn build_step(span: &Span) -> Step {
    let step_type = step_type(span);
    let model_info = (step_type == SPAN_TYPE_MODEL).then(|| model_info(span));
    Step {
        id: Some(span.span_id.clone()),
        parent_id: Some(span.parent_id.clone()),
        step_type: Some(step_type.to_string()),
        name: Some(span.span_name.clone()),
        input: Some(span.input.clone()),
        output: Some(span.output.clone()),
        model_info,
        basic_info: Some(basic_info(span)),
        ..Step::default()
    }
}

pub fn basic_info(span: &Span) -> BasicInfo {
    let error = (span.status_code != 0).then(|| StepError {
        code: span.status_code,
        msg: span.string_tag(TAG_ERROR).unwrap_or_default().to_string(),
    });
    BasicInfo {
        started_at: micros_to_millis(span.start_time).to_string(),
        duration: micros_to_millis(span.duration).to_string(),
        error,
    }
}

pub fn model_info(span: &Span) -> ModelInfo {
    let tag = |name| span.long_tag(name).unwrap_or_default();
    ModelInfo {
        input_tokens: tag(TAG_INPUT_TOKENS),
        output_tokens: tag(TAG_OUTPUT_TOKENS),
        latency_first_resp: span
            .long_tag(TAG_LATENCY_FIRST_RESP)
            .map(|v| micros_to_millis(v).to_string())
            .unwrap_or_default(),
        reasoning_tokens: tag(TAG_REASONING_TOKENS),
        input_read_cached_tokens: tag(TAG_INPUT_CACHED_TOKENS),
        input_creation_cached_tokens: tag(TAG_INPUT_CREATION_CACHED_TOKENS),
    }
}

fn root_metrics_info(agent_steps: &[AgentStep]) -> Option<MetricsInfo> {
    let mut seen = HashSet::new();
    let unique = agent_steps
        .iter()
        .flat_map(|a| a.steps.iter())
        .filter(|s| s.id.as_ref().is_some_and(|id| seen.insert(id.clone())));
    metrics_info(unique)
}

/// Rolls up model and tool steps. `None` when there are neither.
pub fn metrics_info<'a>(steps: impl Iterator<Item = &'a Step>) -> Option<MetricsInfo> {
    let mut model = Rollup::default();
    let mut tool = Rollup::default();
    let mut input_tokens = 0;
    let mut output_tokens = 0;

    for step in steps {
        if step.is(SPAN_TYPE_MODEL) {
            model.add(step);
            if let Some(info) = &step.model_info {
                input_tokens += info.input_tokens;
                output_tokens += info.output_tokens;
            }
        } else if step.is(SPAN_TYPE_TOOL) {
            tool.add(step);
        }
    }

    if model.count == 0 && tool.count == 0 {
        return None;
    }

    let total = model.count + tool.count;
    Some(MetricsInfo {
        llm_duration: model.duration_string(),
        tool_duration: tool.duration_string(),
        tool_error_rate: tool.error_rate(),
        model_error_rate: model.error_rate(),
        tool_step_proportion: Some(tool.count as f64 / total as f64),
        input_tokens: (model.count > 0).then_some(input_tokens),
        output_tokens: (model.count > 0).then_some(output_tokens),
        tool_errors: tool.errors,
        model_errors: model.errors,
    })
}

#[derive(Default)]
struct Rollup {
    count: usize,
    failed: usize,
    duration_ms: i64,
    errors: BTreeMap<i32, Vec<String>>,
}

impl Rollup {
    fn add(&mut self, step: &Step) {
        self.count += 1;
        let Some(info) = &step.basic_info else {
            return;
        };
        if let Ok(ms) = info.duration.parse::<i64>() {
            self.duration_ms += ms;
        }
        if let Some(err) = &info.error {
            self.failed += 1;
            if let Some(id) = &step.id {
                self.errors.entry(err.code).or_default().push(id.clone());
            }
        }
    }

    fn duration_string(&self) -> Option<String> {
        (self.duration_ms > 0).then(|| self.duration_ms.to_string())
    }

    fn error_rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.failed as f64 / self.count as f64)
    }
}
