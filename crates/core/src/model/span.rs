use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::filter::FilterFields;

pub const SPAN_TYPE_AGENT: &str = "agent";
pub const SPAN_TYPE_MODEL: &str = "model";
pub const SPAN_TYPE_TOOL: &str = "tool";
pub const SPAN_TYPE_LLM_CALL: &str = "LLMCall";

pub const FIELD_START_TIME: &str = "start_time";
pub const FIELD_SPAN_ID: &str = "span_id";
pub const FIELD_PARENT_ID: &str = "parent_id";
pub const FIELD_TRACE_ID: &str = "trace_id";
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_CALL_TYPE: &str = "call_type";
pub const FIELD_PSM: &str = "psm";
pub const FIELD_LOG_ID: &str = "logid";
pub const FIELD_SPACE_ID: &str = "space_id";
pub const FIELD_SPAN_TYPE: &str = "span_type";
pub const FIELD_SPAN_NAME: &str = "span_name";
pub const FIELD_METHOD: &str = "method";
pub const FIELD_STATUS_CODE: &str = "status_code";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_INPUT: &str = "input";
pub const FIELD_OUTPUT: &str = "output";
pub const FIELD_OBJECT_STORAGE: &str = "object_storage";

// Tags written by instrumented model and agent spans.
pub const TAG_ERROR: &str = "error";
pub const TAG_MODEL_NAME: &str = "model_name";
pub const TAG_INPUT_TOKENS: &str = "input_tokens";
pub const TAG_OUTPUT_TOKENS: &str = "output_tokens";
pub const TAG_REASONING_TOKENS: &str = "reasoning_tokens";
pub const TAG_INPUT_CACHED_TOKENS: &str = "input_cached_tokens";
pub const TAG_INPUT_CREATION_CACHED_TOKENS: &str = "input_creation_cached_tokens";
pub const TAG_LATENCY_FIRST_RESP: &str = "latency_first_resp";
pub const TAG_LATENCY_FIRST_TOKEN_RESP: &str = "latency_first_token_resp";
pub const TAG_START_TIME_FIRST_RESP: &str = "start_time_first_resp";
pub const TAG_START_TIME_FIRST_TOKEN_RESP: &str = "start_time_first_token_resp";
pub const TAG_REASONING_DURATION: &str = "reasoning_duration";
pub const TAG_MODEL_SYSTEM_TOKENS: &str = "model_system_tokens";
pub const TAG_MODEL_TOOL_CHOICE_TOKENS: &str = "model_tool_choice_tokens";
pub const TAG_USER_ID: &str = "user_id";
pub const TAG_MESSAGE_ID: &str = "message_id";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Attribute namespace. System tags are written by the platform, custom tags by the
/// instrumented application; a lookup never crosses from one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    System,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Bytes(String),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Borrowed view of a resolved span field, as seen by the filter engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl<'a> From<&'a TagValue> for FieldValue<'a> {
    fn from(value: &'a TagValue) -> Self {
        match value {
            TagValue::String(s) | TagValue::Bytes(s) => Self::Str(s),
            TagValue::Long(v) => Self::Long(*v),
            TagValue::Double(v) => Self::Double(*v),
            TagValue::Bool(v) => Self::Bool(*v),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AttributesRepr", into = "AttributesRepr")]
pub struct Attributes {
    entries: BTreeMap<(Namespace, String), TagValue>,
}

impl Attributes {
    pub fn get(&self, namespace: Namespace, name: &str) -> Option<&TagValue> {
        self.entries.get(&(namespace, name.to_string()))
    }

    pub fn insert(
        &mut self,
        namespace: Namespace,
        name: impl Into<String>,
        value: impl Into<TagValue>,
    ) -> Option<TagValue> {
        self.entries.insert((namespace, name.into()), value.into())
    }

    pub fn iter(&self, namespace: Namespace) -> impl Iterator<Item = (&str, &TagValue)> {
        self.entries
            .iter()
            .filter(move |((ns, _), _)| *ns == namespace)
            .map(|((_, name), value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AttributesRepr {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    system: BTreeMap<String, TagValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    custom: BTreeMap<String, TagValue>,
}

impl From<AttributesRepr> for Attributes {
    fn from(repr: AttributesRepr) -> Self {
        let system = repr
            .system
            .into_iter()
            .map(|(k, v)| ((Namespace::System, k), v));
        let custom = repr
            .custom
            .into_iter()
            .map(|(k, v)| ((Namespace::Custom, k), v));
        Self {
            entries: system.chain(custom).collect(),
        }
    }
}

impl From<Attributes> for AttributesRepr {
    fn from(attrs: Attributes) -> Self {
        let mut repr = AttributesRepr::default();
        for ((namespace, name), value) in attrs.entries {
            match namespace {
                Namespace::System => repr.system.insert(name, value),
                Namespace::Custom => repr.custom.insert(name, value),
            };
        }
        repr
    }
}

/// One recorded unit of execution. Times are microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub span_type: String,
    pub span_name: String,
    pub start_time: i64,
    pub duration: i64,
    pub status_code: i32,
    pub input: String,
    pub output: String,
    pub call_type: String,
    pub psm: String,
    pub log_id: String,
    pub space_id: String,
    pub method: String,
    pub object_storage: String,
    pub attributes: Attributes,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty() || self.parent_id == "0"
    }

    pub fn status(&self) -> &'static str {
        if self.status_code == 0 {
            STATUS_SUCCESS
        } else {
            STATUS_ERROR
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.attributes.insert(Namespace::Custom, name, value);
        self
    }

    pub fn with_system_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.attributes.insert(Namespace::System, name, value);
        self
    }

    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.attributes.get(Namespace::Custom, name)
    }

    pub fn system_tag(&self, name: &str) -> Option<&TagValue> {
        self.attributes.get(Namespace::System, name)
    }

    pub fn long_tag(&self, name: &str) -> Option<i64> {
        match self.tag(name) {
            Some(TagValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string_tag(&self, name: &str) -> Option<&str> {
        match self.tag(name) {
            Some(TagValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Resolves `name` the way filters see it: system lookups read only system tags,
    /// custom lookups only custom tags, and plain lookups try the well-known span
    /// fields before falling back to custom tags.
    pub fn field_value(&self, name: &str, is_system: bool, is_custom: bool) -> Option<FieldValue<'_>> {
        if is_system {
            return self.attributes.get(Namespace::System, name).map(FieldValue::from);
        }
        if !is_custom && let Some(value) = self.well_known_field(name) {
            return Some(value);
        }
        self.attributes.get(Namespace::Custom, name).map(FieldValue::from)
    }

    fn well_known_field(&self, name: &str) -> Option<FieldValue<'_>> {
        let value = match name {
            FIELD_START_TIME => FieldValue::Long(self.start_time),
            FIELD_SPAN_ID => FieldValue::Str(&self.span_id),
            FIELD_PARENT_ID => FieldValue::Str(&self.parent_id),
            FIELD_TRACE_ID => FieldValue::Str(&self.trace_id),
            FIELD_DURATION => FieldValue::Long(self.duration),
            FIELD_CALL_TYPE => FieldValue::Str(&self.call_type),
            FIELD_PSM => FieldValue::Str(&self.psm),
            FIELD_LOG_ID => FieldValue::Str(&self.log_id),
            FIELD_SPACE_ID => FieldValue::Str(&self.space_id),
            FIELD_SPAN_TYPE => FieldValue::Str(&self.span_type),
            FIELD_SPAN_NAME => FieldValue::Str(&self.span_name),
            FIELD_METHOD => FieldValue::Str(&self.method),
            FIELD_STATUS_CODE => FieldValue::Long(i64::from(self.status_code)),
            FIELD_STATUS => FieldValue::Str(self.status()),
            FIELD_INPUT => FieldValue::Str(&self.input),
            FIELD_OUTPUT => FieldValue::Str(&self.output),
            FIELD_OBJECT_STORAGE => FieldValue::Str(&self.object_storage),
            _ => return None,
        };
        Some(value)
    }
}

/// The spans of one trace, in the order the storage layer returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanList(pub Vec<Span>);

impl SpanList {
    pub fn new(spans: Vec<Span>) -> Self {
        Self(spans)
    }

    /// First span in list order whose parent is empty or "0".
    pub fn root(&self) -> Option<&Span> {
        self.0.iter().find(|s| s.is_root())
    }

    pub fn find(&self, span_id: &str) -> Option<&Span> {
        self.0.iter().find(|s| s.span_id == span_id)
    }

    pub fn by_id(&self) -> HashMap<&str, &Span> {
        self.0.iter().map(|s| (s.span_id.as_str(), s)).collect()
    }

    pub fn matching<'a>(&'a self, filter: &'a FilterFields) -> impl Iterator<Item = &'a Span> {
        self.0.iter().filter(move |s| filter.satisfied(s))
    }

    pub fn model_spans(&self) -> Vec<&Span> {
        let filter = FilterFields::model_spans();
        self.0.iter().filter(|s| filter.satisfied(s)).collect()
    }
}

impl Deref for SpanList {
    type Target = [Span];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Span>> for SpanList {
    fn from(spans: Vec<Span>) -> Self {
        Self(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_id: "0".to_string(),
            span_type: "model".to_string(),
            duration: 1500,
            status_code: 400,
            ..Span::default()
        }
    }

    #[test]
    fn well_known_fields_resolve_before_custom_tags() {
        let s = span().with_tag("span_type", "shadowed");
        assert_eq!(
            s.field_value(FIELD_SPAN_TYPE, false, false),
            Some(FieldValue::Str("model"))
        );
        assert_eq!(
            s.field_value(FIELD_SPAN_TYPE, false, true),
            Some(FieldValue::Str("shadowed"))
        );
        assert_eq!(
            s.field_value(FIELD_STATUS_CODE, false, false),
            Some(FieldValue::Long(400))
        );
        assert_eq!(
            s.field_value(FIELD_STATUS, false, false),
            Some(FieldValue::Str("error"))
        );
    }

    #[test]
    fn system_and_custom_namespaces_do_not_overlap() {
        let s = span()
            .with_system_tag("region", "eu")
            .with_tag("user_id", "u1");
        assert_eq!(
            s.field_value("region", true, false),
            Some(FieldValue::Str("eu"))
        );
        assert_eq!(s.field_value("region", false, false), None);
        assert_eq!(s.field_value("user_id", true, false), None);
        assert_eq!(s.field_value(FIELD_SPAN_ID, true, false), None);
    }

    #[test]
    fn attributes_serialize_by_namespace() {
        let s = span()
            .with_system_tag("region", "eu")
            .with_tag(TAG_INPUT_TOKENS, 12_i64);
        let json = serde_json::to_value(&s.attributes).unwrap();
        assert_eq!(json["system"]["region"]["string"], "eu");
        assert_eq!(json["custom"]["input_tokens"]["long"], 12);

        let back: Attributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, s.attributes);
    }

    #[test]
    fn span_list_root_is_first_parentless_span() {
        let list = SpanList::new(vec![
            Span {
                span_id: "child".to_string(),
                parent_id: "root".to_string(),
                ..Span::default()
            },
            Span {
                span_id: "root".to_string(),
                parent_id: String::new(),
                ..Span::default()
            },
        ]);
        assert_eq!(list.root().map(|s| s.span_id.as_str()), Some("root"));
        assert_eq!(list.by_id().len(), 2);
    }

    #[test]
    fn model_spans_include_llm_calls() {
        let list = SpanList::new(vec![
            Span {
                span_type: SPAN_TYPE_MODEL.to_string(),
                ..Span::default()
            },
            Span {
                span_type: SPAN_TYPE_LLM_CALL.to_string(),
                ..Span::default()
            },
            Span {
                span_type: SPAN_TYPE_TOOL.to_string(),
                ..Span::default()
            },
        ]);
        assert_eq!(list.model_spans().len(), 2);
    }
}
