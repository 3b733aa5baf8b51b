use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanlensError};
use crate::model::span::{FIELD_SPAN_TYPE, FieldValue, SPAN_TYPE_LLM_CALL, SPAN_TYPE_MODEL, Span};

// Wire enums keep unrecognised strings so that `validate` can report them instead of
// the decoder rejecting the whole tree.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Unknown(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown(raw) => raw,
                }
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                match raw.as_str() {
                    $($wire => Self::$variant,)+
                    _ => Self::Unknown(raw),
                }
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::from(raw.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(FieldType {
    String => "string",
    Long => "long",
    Double => "double",
    Bool => "bool",
});

wire_enum!(QueryType {
    Eq => "eq",
    NotEq => "not_eq",
    In => "in",
    NotIn => "not_in",
    Gt => "gt",
    Gte => "gte",
    Lt => "lt",
    Lte => "lte",
    Match => "match",
    NotMatch => "not_match",
    Exist => "exist",
    NotExist => "not_exist",
    AlwaysTrue => "always_true",
});

wire_enum!(QueryAndOr {
    And => "and",
    Or => "or",
});

/// A list of predicates combined by `query_and_or` (`and` when unset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_and_or: Option<QueryAndOr>,
    #[serde(default)]
    pub filter_fields: Vec<FilterField>,
}

/// A predicate leaf, a container for a nested tree, or both. When both are present the
/// leaf's own result and the nested result combine through the leaf's `query_and_or`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_and_or: Option<QueryAndOr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<Box<FilterFields>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_custom: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl FilterFields {
    pub fn and(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: Some(QueryAndOr::And),
            filter_fields,
        }
    }

    pub fn or(filter_fields: Vec<FilterField>) -> Self {
        Self {
            query_and_or: Some(QueryAndOr::Or),
            filter_fields,
        }
    }

    /// `span_type in [model, LLMCall]`
    pub fn model_spans() -> Self {
        Self::and(vec![FilterField::leaf(
            FIELD_SPAN_TYPE,
            FieldType::String,
            QueryType::In,
            [SPAN_TYPE_MODEL, SPAN_TYPE_LLM_CALL],
        )])
    }

    pub fn is_empty(&self) -> bool {
        self.filter_fields.is_empty()
    }

    /// Returns the first structural defect found, depth first.
    pub fn validate(&self) -> Result<()> {
        if let Some(QueryAndOr::Unknown(raw)) = &self.query_and_or {
            return Err(SpanlensError::InvalidFilter(format!(
                "unknown query_and_or: {raw}"
            )));
        }
        for field in &self.filter_fields {
            field.validate()?;
        }
        Ok(())
    }

    pub fn satisfied(&self, span: &Span) -> bool {
        if self.filter_fields.is_empty() {
            return true;
        }
        match self.query_and_or {
            Some(QueryAndOr::Or) => self.filter_fields.iter().any(|f| f.satisfied(span)),
            _ => self.filter_fields.iter().all(|f| f.satisfied(span)),
        }
    }

    /// Preorder walk over every field, nested sub filters included.
    pub fn traverse<F>(&self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&FilterField) -> Result<()>,
    {
        for field in &self.filter_fields {
            visit(field)?;
            if let Some(sub) = field.sub_filter.as_deref() {
                sub.traverse(visit)?;
            }
        }
        Ok(())
    }

    pub fn traverse_mut<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&mut FilterField) -> Result<()>,
    {
        for field in &mut self.filter_fields {
            visit(field)?;
            if let Some(sub) = field.sub_filter.as_deref_mut() {
                sub.traverse_mut(visit)?;
            }
        }
        Ok(())
    }
}

impl FilterField {
    pub fn leaf<I, V>(
        field_name: impl Into<String>,
        field_type: FieldType,
        query_type: QueryType,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            field_name: field_name.into(),
            field_type: Some(field_type),
            values: values.into_iter().map(Into::into).collect(),
            query_type: Some(query_type),
            ..Self::default()
        }
    }

    /// A bare column reference, used as an expression placeholder.
    pub fn column(field_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field_name: field_name.into(),
            field_type: Some(field_type),
            ..Self::default()
        }
    }

    pub fn nested(sub_filter: FilterFields) -> Self {
        Self {
            sub_filter: Some(Box::new(sub_filter)),
            ..Self::default()
        }
    }

    pub fn with_sub_filter(mut self, query_and_or: QueryAndOr, sub_filter: FilterFields) -> Self {
        self.query_and_or = Some(query_and_or);
        self.sub_filter = Some(Box::new(sub_filter));
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn custom(mut self) -> Self {
        self.is_custom = true;
        self
    }

    pub fn effective_type(&self) -> FieldType {
        self.field_type.clone().unwrap_or(FieldType::String)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(QueryAndOr::Unknown(raw)) = &self.query_and_or {
            return Err(SpanlensError::InvalidFilter(format!(
                "unknown query_and_or on field {}: {raw}",
                self.field_name
            )));
        }
        if !self.field_name.is_empty() {
            self.validate_condition()?;
        }
        if let Some(sub) = self.sub_filter.as_deref() {
            sub.validate()?;
        }
        Ok(())
    }

    fn validate_condition(&self) -> Result<()> {
        let name = &self.field_name;
        let Some(query_type) = &self.query_type else {
            return Err(SpanlensError::InvalidFilter(format!(
                "field {name} has no query_type"
            )));
        };
        let field_type = self.effective_type();
        if let FieldType::Unknown(raw) = &field_type {
            return Err(SpanlensError::InvalidFilter(format!(
                "field {name} has unknown field_type {raw}"
            )));
        }

        match query_type {
            QueryType::Unknown(raw) => Err(SpanlensError::InvalidFilter(format!(
                "field {name} has unknown query_type {raw}"
            ))),
            QueryType::AlwaysTrue | QueryType::Exist | QueryType::NotExist => Ok(()),
            QueryType::Match | QueryType::NotMatch => {
                if field_type != FieldType::String {
                    return Err(SpanlensError::InvalidFilter(format!(
                        "{query_type} requires a string field, {name} is {field_type}"
                    )));
                }
                Ok(())
            }
            QueryType::Gt | QueryType::Gte | QueryType::Lt | QueryType::Lte => {
                if !matches!(field_type, FieldType::Long | FieldType::Double) {
                    return Err(SpanlensError::InvalidFilter(format!(
                        "{query_type} requires a numeric field, {name} is {field_type}"
                    )));
                }
                self.validate_values(&field_type)
            }
            QueryType::Eq | QueryType::NotEq | QueryType::In | QueryType::NotIn => {
                self.validate_values(&field_type)
            }
        }
    }

    fn validate_values(&self, field_type: &FieldType) -> Result<()> {
        for raw in &self.values {
            if Scalar::parse(raw, field_type).is_none() {
                return Err(SpanlensError::InvalidFilter(format!(
                    "value {raw:?} of field {} is not a valid {field_type}",
                    self.field_name
                )));
            }
        }
        Ok(())
    }

    pub fn satisfied(&self, span: &Span) -> bool {
        let own = (!self.field_name.is_empty()).then(|| self.check(span));
        let sub = self.sub_filter.as_deref().map(|s| s.satisfied(span));
        match (own, sub) {
            (None, None) => true,
            (Some(own), None) => own,
            (None, Some(sub)) => sub,
            (Some(own), Some(sub)) => match self.query_and_or {
                Some(QueryAndOr::Or) => own || sub,
                _ => own && sub,
            },
        }
    }

    fn check(&self, span: &Span) -> bool {
        let Some(query_type) = &self.query_type else {
            return false;
        };
        let field_type = self.effective_type();
        let value = span.field_value(&self.field_name, self.is_system, self.is_custom);

        match query_type {
            QueryType::AlwaysTrue => true,
            QueryType::Exist => value.is_some(),
            QueryType::NotExist => value.is_none(),
            QueryType::Match | QueryType::NotMatch => {
                let negate = *query_type == QueryType::NotMatch;
                if field_type != FieldType::String {
                    return false;
                }
                // Only the first value is consulted.
                let Some(needle) = self.values.first() else {
                    return negate;
                };
                let haystack = match value {
                    None => return negate,
                    Some(FieldValue::Str(s)) => s,
                    Some(_) => "",
                };
                haystack.contains(needle.as_str()) != negate
            }
            QueryType::Eq | QueryType::NotEq => {
                let Some(actual) = Scalar::coerce(value, &field_type) else {
                    return false;
                };
                let Some(expected) = self
                    .values
                    .first()
                    .and_then(|raw| Scalar::parse(raw, &field_type))
                else {
                    return false;
                };
                (actual == expected) == (*query_type == QueryType::Eq)
            }
            QueryType::In | QueryType::NotIn => {
                let Some(actual) = Scalar::coerce(value, &field_type) else {
                    return false;
                };
                let found = self
                    .values
                    .iter()
                    .filter_map(|raw| Scalar::parse(raw, &field_type))
                    .any(|candidate| candidate == actual);
                found == (*query_type == QueryType::In)
            }
            QueryType::Gt | QueryType::Gte | QueryType::Lt | QueryType::Lte => {
                let Some(actual) = Scalar::coerce(value, &field_type) else {
                    return false;
                };
                let Some(bound) = self
                    .values
                    .first()
                    .and_then(|raw| Scalar::parse(raw, &field_type))
                else {
                    return false;
                };
                let Some(ord) = actual.numeric_cmp(&bound) else {
                    return false;
                };
                match query_type {
                    QueryType::Gt => ord == Ordering::Greater,
                    QueryType::Gte => ord != Ordering::Less,
                    QueryType::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }
            }
            QueryType::Unknown(_) => false,
        }
    }
}

/// A field value after coercion to the predicate's declared type.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar<'a> {
    Str(&'a str),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl<'a> Scalar<'a> {
    fn parse(raw: &'a str, field_type: &FieldType) -> Option<Self> {
        match field_type {
            FieldType::String => Some(Self::Str(raw)),
            FieldType::Long => raw.trim().parse().ok().map(Self::Long),
            FieldType::Double => raw.trim().parse().ok().map(Self::Double),
            FieldType::Bool => parse_bool(raw).map(Self::Bool),
            FieldType::Unknown(_) => None,
        }
    }

    /// Absent or differently typed values compare as the zero value of `field_type`.
    fn coerce(value: Option<FieldValue<'a>>, field_type: &FieldType) -> Option<Self> {
        let scalar = match field_type {
            FieldType::String => match value {
                Some(FieldValue::Str(s)) => Self::Str(s),
                _ => Self::Str(""),
            },
            FieldType::Long => match value {
                Some(FieldValue::Long(v)) => Self::Long(v),
                _ => Self::Long(0),
            },
            FieldType::Double => match value {
                Some(FieldValue::Double(v)) => Self::Double(v),
                Some(FieldValue::Long(v)) => Self::Double(v as f64),
                _ => Self::Double(0.0),
            },
            FieldType::Bool => match value {
                Some(FieldValue::Bool(v)) => Self::Bool(v),
                _ => Self::Bool(false),
            },
            FieldType::Unknown(_) => return None,
        };
        Some(scalar)
    }

    fn numeric_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`, which upstream producers emit.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
