use serde::{Deserialize, Serialize};
use spanlens_core::Result;
use spanlens_core::filter::{FieldType, FilterField, FilterFields, QueryType};
use spanlens_core::model::span::{
    FIELD_CALL_TYPE, FIELD_PARENT_ID, FIELD_SPACE_ID, FIELD_SPAN_TYPE, SPAN_TYPE_TOOL,
};

/// Context a query runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEnv {
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl SpanEnv {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Tenant scoping plus a query can run even when `fields` is empty if `force_query` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicFilter {
    pub fields: Vec<FilterField>,
    pub force_query: bool,
}

/// Platform-specific span selection. Every metric query is scoped by `basic_spans`
/// and narrowed by one of the structural predicates.
pub trait SpanFilter: Send + Sync {
    fn basic_spans(&self, env: &SpanEnv) -> Result<BasicFilter>;
    fn root_spans(&self, env: &SpanEnv) -> Result<Vec<FilterField>>;
    fn llm_spans(&self, env: &SpanEnv) -> Result<Vec<FilterField>>;
    fn tool_spans(&self, env: &SpanEnv) -> Result<Vec<FilterField>>;
    fn all_spans(&self, env: &SpanEnv) -> Result<Vec<FilterField>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformSpanFilter;

impl SpanFilter for PlatformSpanFilter {
    fn basic_spans(&self, env: &SpanEnv) -> Result<BasicFilter> {
        if env.workspace_id.is_empty() {
            return Ok(BasicFilter::default());
        }
        let mut fields = vec![FilterField::leaf(
            FIELD_SPACE_ID,
            FieldType::String,
            QueryType::Eq,
            [env.workspace_id.as_str()],
        )];
        if let Some(platform) = env.platform.as_deref() {
            fields.push(FilterField::leaf(
                FIELD_CALL_TYPE,
                FieldType::String,
                QueryType::Eq,
                [platform],
            ));
        }
        Ok(BasicFilter {
            fields,
            force_query: false,
        })
    }

    fn root_spans(&self, _env: &SpanEnv) -> Result<Vec<FilterField>> {
        Ok(vec![FilterField::leaf(
            FIELD_PARENT_ID,
            FieldType::String,
            QueryType::In,
            ["0", ""],
        )])
    }

    fn llm_spans(&self, _env: &SpanEnv) -> Result<Vec<FilterField>> {
        Ok(FilterFields::model_spans().filter_fields)
    }

    fn tool_spans(&self, _env: &SpanEnv) -> Result<Vec<FilterField>> {
        Ok(vec![FilterField::leaf(
            FIELD_SPAN_TYPE,
            FieldType::String,
            QueryType::In,
            [SPAN_TYPE_TOOL],
        )])
    }

    fn all_spans(&self, _env: &SpanEnv) -> Result<Vec<FilterField>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use spanlens_core::model::span::Span;

    use super::*;

    #[test]
    fn basic_spans_scope_by_workspace_and_platform() {
        let filter = PlatformSpanFilter;
        let empty = filter.basic_spans(&SpanEnv::default()).unwrap();
        assert!(empty.fields.is_empty());
        assert!(!empty.force_query);

        let env = SpanEnv::new("ws-1").with_platform("cozeloop");
        let basic = filter.basic_spans(&env).unwrap();
        assert_eq!(basic.fields.len(), 2);

        let scoped = FilterFields::and(basic.fields);
        let inside = Span {
            space_id: "ws-1".into(),
            call_type: "cozeloop".into(),
            ..Span::default()
        };
        let other = Span {
            space_id: "ws-2".into(),
            ..inside.clone()
        };
        assert!(scoped.satisfied(&inside));
        assert!(!scoped.satisfied(&other));
    }

    #[test]
    fn structural_predicates_select_expected_spans() {
        let filter = PlatformSpanFilter;
        let env = SpanEnv::new("ws-1");
        let root = FilterFields::and(filter.root_spans(&env).unwrap());
        let llm = FilterFields::and(filter.llm_spans(&env).unwrap());
        let tool = FilterFields::and(filter.tool_spans(&env).unwrap());
        let all = FilterFields::and(filter.all_spans(&env).unwrap());

        let top = Span {
            span_id: "r".into(),
            parent_id: "0".into(),
            span_type: "agent".into(),
            ..Span::default()
        };
        let call = Span {
            span_id: "m".into(),
            parent_id: "r".into(),
            span_type: "LLMCall".into(),
            ..Span::default()
        };
        let search = Span {
            span_type: "tool".into(),
            ..call.clone()
        };

        assert!(root.satisfied(&top));
        assert!(!root.satisfied(&call));
        assert!(llm.satisfied(&call));
        assert!(!llm.satisfied(&search));
        assert!(tool.satisfied(&search));
        assert!([&top, &call, &search].iter().all(|s| all.satisfied(s)));
    }
}
