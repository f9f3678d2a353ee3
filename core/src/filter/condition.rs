use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::values::{Record, Value};
use crate::error::{Result, StoreError};

/// Leaf operators, named by their DSL token.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AnyOf,
    Contains,
    StartsWith,
    EndsWith,
    MinLength,
    MaxLength,
    Truthy,
    IsNull,
    IsNotNull,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum CompositeKind {
    And,
    Or,
    Not,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Field {
        field: String,
        op: Operator,
        value: Value,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// `{field: value, ..}` shorthand: every field equal.
    Match(Record),
    /// A bare list of conditions, read as `And`.
    All(Vec<Condition>),
    /// A literal boolean in filter position. Both values match every entity.
    Literal(bool),
}

impl Condition {
    pub fn leaf(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Field {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Equal, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::NotEqual, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::LessThan, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::LessThanOrEqual, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::GreaterThan, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::GreaterThanOrEqual, value)
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::leaf(
            field,
            Operator::AnyOf,
            Value::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNull, Value::Null)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNotNull, Value::Null)
    }

    pub fn and(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(children.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Parses the JSON filter DSL.
    ///
    /// `null`, `true` and `false` are literals; an array is an implicit `and`;
    /// `{"field", "operator", "value"}` is a leaf; a single `and`/`or`/`not` key
    /// is a composite; any other object is an equality match on its fields.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        use serde_json::Value as J;
        match json {
            J::Null => Ok(Condition::Literal(true)),
            J::Bool(b) => Ok(Condition::Literal(b)),
            J::Array(items) => items
                .into_iter()
                .map(Condition::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Condition::All),
            J::Object(mut obj) => {
                if obj.contains_key("field") && obj.contains_key("operator") {
                    let field = match obj.remove("field") {
                        Some(J::String(s)) => s,
                        other => return Err(dsl_error(format!("bad field name {:?}", other))),
                    };
                    let op = match obj.remove("operator") {
                        Some(J::String(s)) => Operator::from_str(&s)
                            .map_err(|_| dsl_error(format!("unknown operator `{}`", s)))?,
                        other => return Err(dsl_error(format!("bad operator {:?}", other))),
                    };
                    let value = obj.remove("value").map(Value::from_json).unwrap_or_default();
                    return Ok(Condition::Field { field, op, value });
                }
                if obj.len() == 1 {
                    let kind = obj
                        .keys()
                        .next()
                        .and_then(|k| CompositeKind::from_str(k).ok());
                    if let Some(kind) = kind {
                        let inner = obj.into_iter().next().map(|(_, v)| v).unwrap_or_default();
                        return Self::composite_from_json(kind, inner);
                    }
                }
                Ok(Condition::Match(
                    obj.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                ))
            }
            other => Err(dsl_error(format!("not a condition: {}", other))),
        }
    }

    fn composite_from_json(kind: CompositeKind, inner: serde_json::Value) -> Result<Self> {
        match (kind, inner) {
            (CompositeKind::Not, inner) => Ok(Condition::Not(Box::new(Self::from_json(inner)?))),
            (kind, serde_json::Value::Array(items)) => {
                let children = items
                    .into_iter()
                    .map(Condition::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(match kind {
                    CompositeKind::Or => Condition::Or(children),
                    _ => Condition::And(children),
                })
            }
            (kind, other) => Err(dsl_error(format!("`{}` expects an array, got {}", kind, other))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Condition::Field { field, op, value } => json!({
                "field": field,
                "operator": op.as_ref(),
                "value": value.to_json(),
            }),
            Condition::And(c) => json!({ "and": c.iter().map(Condition::to_json).collect::<Vec<_>>() }),
            Condition::Or(c) => json!({ "or": c.iter().map(Condition::to_json).collect::<Vec<_>>() }),
            Condition::Not(c) => json!({ "not": c.to_json() }),
            Condition::Match(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Condition::All(c) => serde_json::Value::Array(c.iter().map(Condition::to_json).collect()),
            Condition::Literal(b) => serde_json::Value::Bool(*b),
        }
    }
}

fn dsl_error(message: String) -> StoreError {
    StoreError::Unsupported(format!("filter: {}", message))
}

impl From<Record> for Condition {
    fn from(fields: Record) -> Self {
        Condition::Match(fields)
    }
}

impl From<Vec<Condition>> for Condition {
    fn from(children: Vec<Condition>) -> Self {
        Condition::All(children)
    }
}

impl From<bool> for Condition {
    fn from(b: bool) -> Self {
        Condition::Literal(b)
    }
}
