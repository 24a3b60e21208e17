// used for datetime attributes
use chrono::NaiveDateTime;
// used for decimal numbers
use bigdecimal::{BigDecimal, ToPrimitive};
// used for value rules on text attributes
use regex::Regex;
// used when writing and reading attribute values in documents
use serde_json::{Number, Value};

// used when parsing a string to a value
use std::str::FromStr;
// used to print out readable forms of a data type
use std::fmt;

use crate::error::{DomError, Result};
use crate::reference::NodeRef;

/// Format used when datetime values are written as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The value type of an attribute definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    DateTime,
    IntArray,
    FloatArray,
    TextArray,
    Reference,
}

impl AttributeType {
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::Decimal => "decimal",
            AttributeType::Text => "string",
            AttributeType::DateTime => "datetime",
            AttributeType::IntArray => "int[]",
            AttributeType::FloatArray => "float[]",
            AttributeType::TextArray => "string[]",
            AttributeType::Reference => "reference",
        }
    }
    pub fn from_name(name: &str) -> Option<AttributeType> {
        let attribute_type = match name {
            "bool" | "boolean" => AttributeType::Bool,
            "int" | "integer" => AttributeType::Int,
            "float" | "double" => AttributeType::Float,
            "decimal" => AttributeType::Decimal,
            "string" | "text" => AttributeType::Text,
            "datetime" => AttributeType::DateTime,
            "int[]" | "integer[]" => AttributeType::IntArray,
            "float[]" | "double[]" => AttributeType::FloatArray,
            "string[]" | "text[]" => AttributeType::TextArray,
            "reference" | "ref" => AttributeType::Reference,
            _ => return None,
        };
        Some(attribute_type)
    }
    /// The value an attribute of this type reports when nothing was set and
    /// its definition declares no explicit default.
    pub fn default_value(&self) -> AttributeValue {
        match self {
            AttributeType::Bool => AttributeValue::Bool(false),
            AttributeType::Int => AttributeValue::Int(0),
            AttributeType::Float => AttributeValue::Float(0.0),
            AttributeType::Decimal => AttributeValue::Decimal(BigDecimal::from(0)),
            AttributeType::Text => AttributeValue::Text(String::new()),
            AttributeType::DateTime => AttributeValue::DateTime(NaiveDateTime::default()),
            AttributeType::IntArray => AttributeValue::IntArray(Vec::new()),
            AttributeType::FloatArray => AttributeValue::FloatArray(Vec::new()),
            AttributeType::TextArray => AttributeValue::TextArray(Vec::new()),
            AttributeType::Reference => AttributeValue::Null,
        }
    }
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (AttributeType::Bool, AttributeValue::Bool(_))
                | (AttributeType::Int, AttributeValue::Int(_))
                | (AttributeType::Float, AttributeValue::Float(_))
                | (AttributeType::Decimal, AttributeValue::Decimal(_))
                | (AttributeType::Text, AttributeValue::Text(_))
                | (AttributeType::DateTime, AttributeValue::DateTime(_))
                | (AttributeType::IntArray, AttributeValue::IntArray(_))
                | (AttributeType::FloatArray, AttributeValue::FloatArray(_))
                | (AttributeType::TextArray, AttributeValue::TextArray(_))
                | (AttributeType::Reference, AttributeValue::Reference(_))
                | (AttributeType::Reference, AttributeValue::Null)
        )
    }
    /// Parses the textual form of a value, as found in schema defaults.
    /// Array elements are separated by whitespace.
    pub fn parse(&self, text: &str) -> Result<AttributeValue> {
        let invalid = || DomError::InvalidArgument(format!("'{}' is not a valid {}", text, self));
        let value = match self {
            AttributeType::Bool => match text.trim() {
                "true" | "1" => AttributeValue::Bool(true),
                "false" | "0" => AttributeValue::Bool(false),
                _ => return Err(invalid()),
            },
            AttributeType::Int => AttributeValue::Int(text.trim().parse().map_err(|_| invalid())?),
            AttributeType::Float => AttributeValue::Float(text.trim().parse().map_err(|_| invalid())?),
            AttributeType::Decimal => {
                AttributeValue::Decimal(BigDecimal::from_str(text.trim()).map_err(|_| invalid())?)
            }
            AttributeType::Text => AttributeValue::Text(text.to_string()),
            AttributeType::DateTime => {
                AttributeValue::DateTime(NaiveDateTime::from_str(text.trim()).map_err(|_| invalid())?)
            }
            AttributeType::IntArray => AttributeValue::IntArray(
                text.split_whitespace()
                    .map(|t| t.parse().map_err(|_| invalid()))
                    .collect::<Result<_>>()?,
            ),
            AttributeType::FloatArray => AttributeValue::FloatArray(
                text.split_whitespace()
                    .map(|t| t.parse().map_err(|_| invalid()))
                    .collect::<Result<_>>()?,
            ),
            AttributeType::TextArray => {
                AttributeValue::TextArray(text.split_whitespace().map(str::to_string).collect())
            }
            AttributeType::Reference => match text.trim() {
                "" => AttributeValue::Null,
                id => AttributeValue::Reference(NodeRef::new(id)),
            },
        };
        if !value.is_finite() {
            return Err(invalid());
        }
        Ok(value)
    }
    /// Reads a value of this type from its JSON document form.
    pub fn from_json(&self, json: &Value) -> Result<AttributeValue> {
        let mismatch = || DomError::Serialization(format!("expected {} but found {}", self, json));
        let value = match (self, json) {
            (AttributeType::Bool, Value::Bool(b)) => AttributeValue::Bool(*b),
            (AttributeType::Int, Value::Number(n)) => AttributeValue::Int(n.as_i64().ok_or_else(mismatch)?),
            (AttributeType::Float, Value::Number(n)) => AttributeValue::Float(n.as_f64().ok_or_else(mismatch)?),
            (AttributeType::Decimal, Value::String(s)) => {
                AttributeValue::Decimal(BigDecimal::from_str(s).map_err(|_| mismatch())?)
            }
            (AttributeType::Decimal, Value::Number(n)) => {
                AttributeValue::Decimal(BigDecimal::from_str(&n.to_string()).map_err(|_| mismatch())?)
            }
            (AttributeType::Text, Value::String(s)) => AttributeValue::Text(s.clone()),
            (AttributeType::DateTime, Value::String(s)) => {
                AttributeValue::DateTime(NaiveDateTime::from_str(s).map_err(|_| mismatch())?)
            }
            (AttributeType::IntArray, Value::Array(items)) => AttributeValue::IntArray(
                items.iter().map(|i| i.as_i64().ok_or_else(mismatch)).collect::<Result<_>>()?,
            ),
            (AttributeType::FloatArray, Value::Array(items)) => AttributeValue::FloatArray(
                items.iter().map(|i| i.as_f64().ok_or_else(mismatch)).collect::<Result<_>>()?,
            ),
            (AttributeType::TextArray, Value::Array(items)) => AttributeValue::TextArray(
                items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string).ok_or_else(mismatch))
                    .collect::<Result<_>>()?,
            ),
            (AttributeType::Reference, Value::Null) => AttributeValue::Null,
            (AttributeType::Reference, Value::String(id)) => AttributeValue::Reference(NodeRef::new(id.as_str())),
            _ => return Err(mismatch()),
        };
        Ok(value)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A concrete attribute value. `Null` is only ever held by reference attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    DateTime(NaiveDateTime),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
    Reference(NodeRef),
}

impl AttributeValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Decimal(_) => "decimal",
            AttributeValue::Text(_) => "string",
            AttributeValue::DateTime(_) => "datetime",
            AttributeValue::IntArray(_) => "int[]",
            AttributeValue::FloatArray(_) => "float[]",
            AttributeValue::TextArray(_) => "string[]",
            AttributeValue::Reference(_) => "reference",
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(x) => Some(*x),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_reference(&self) -> Option<&NodeRef> {
        match self {
            AttributeValue::Reference(r) => Some(r),
            _ => None,
        }
    }
    /// False for NaN and infinite floats, which have no JSON form.
    pub fn is_finite(&self) -> bool {
        match self {
            AttributeValue::Float(x) => x.is_finite(),
            AttributeValue::FloatArray(a) => a.iter().all(|x| x.is_finite()),
            _ => true,
        }
    }
    /// Numeric view used by range rules.
    fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(x) => Some(*x),
            AttributeValue::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }
    /// Length view used by length rules.
    fn length(&self) -> Option<usize> {
        match self {
            AttributeValue::Text(s) => Some(s.chars().count()),
            AttributeValue::IntArray(a) => Some(a.len()),
            AttributeValue::FloatArray(a) => Some(a.len()),
            AttributeValue::TextArray(a) => Some(a.len()),
            _ => None,
        }
    }
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(i) => Value::Number(Number::from(*i)),
            AttributeValue::Float(x) => Number::from_f64(*x).map(Value::Number).unwrap_or(Value::Null),
            AttributeValue::Decimal(d) => Value::String(d.to_string()),
            AttributeValue::Text(s) => Value::String(s.clone()),
            AttributeValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            AttributeValue::IntArray(a) => Value::Array(a.iter().map(|i| Value::Number(Number::from(*i))).collect()),
            AttributeValue::FloatArray(a) => Value::Array(
                a.iter()
                    .map(|x| Number::from_f64(*x).map(Value::Number).unwrap_or(Value::Null))
                    .collect(),
            ),
            AttributeValue::TextArray(a) => Value::Array(a.iter().cloned().map(Value::String).collect()),
            AttributeValue::Reference(r) => Value::String(r.id().to_string()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn join<T: fmt::Display>(items: &[T]) -> String {
            items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ")
        }
        match self {
            AttributeValue::Null => write!(f, ""),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Decimal(d) => write!(f, "{}", d),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            AttributeValue::IntArray(a) => write!(f, "{}", join(a)),
            AttributeValue::FloatArray(a) => write!(f, "{}", join(a)),
            AttributeValue::TextArray(a) => write!(f, "{}", a.join(" ")),
            AttributeValue::Reference(r) => write!(f, "{}", r.id()),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self { AttributeValue::Bool(b) }
}
impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self { AttributeValue::Int(i) }
}
impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self { AttributeValue::Int(i as i64) }
}
impl From<f64> for AttributeValue {
    fn from(x: f64) -> Self { AttributeValue::Float(x) }
}
impl From<BigDecimal> for AttributeValue {
    fn from(d: BigDecimal) -> Self { AttributeValue::Decimal(d) }
}
impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self { AttributeValue::Text(s.to_string()) }
}
impl From<String> for AttributeValue {
    fn from(s: String) -> Self { AttributeValue::Text(s) }
}
impl From<NaiveDateTime> for AttributeValue {
    fn from(dt: NaiveDateTime) -> Self { AttributeValue::DateTime(dt) }
}
impl From<Vec<i64>> for AttributeValue {
    fn from(a: Vec<i64>) -> Self { AttributeValue::IntArray(a) }
}
impl From<Vec<f64>> for AttributeValue {
    fn from(a: Vec<f64>) -> Self { AttributeValue::FloatArray(a) }
}
impl From<Vec<String>> for AttributeValue {
    fn from(a: Vec<String>) -> Self { AttributeValue::TextArray(a) }
}
impl From<NodeRef> for AttributeValue {
    fn from(r: NodeRef) -> Self { AttributeValue::Reference(r) }
}

// ------------- Value Rules --------------

/// A constraint checked whenever an attribute is set.
/// Rules that do not apply to a value's kind accept it.
#[derive(Debug, Clone)]
pub enum AttributeRule {
    Range { min: Option<f64>, max: Option<f64> },
    Length { min: Option<usize>, max: Option<usize> },
    Pattern(Regex),
    OneOf(Vec<String>),
}

impl AttributeRule {
    pub fn pattern(pattern: &str) -> Result<AttributeRule> {
        // anchor so the whole value has to match
        Regex::new(&format!("^(?:{})$", pattern))
            .map(AttributeRule::Pattern)
            .map_err(|e| DomError::Schema(format!("invalid pattern '{}': {}", pattern, e)))
    }
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        match self {
            AttributeRule::Range { min, max } => match value.as_number() {
                Some(n) => min.is_none_or(|m| n >= m) && max.is_none_or(|m| n <= m),
                None => true,
            },
            AttributeRule::Length { min, max } => match value.length() {
                Some(n) => min.is_none_or(|m| n >= m) && max.is_none_or(|m| n <= m),
                None => true,
            },
            AttributeRule::Pattern(regex) => match value {
                AttributeValue::Text(s) => regex.is_match(s),
                _ => true,
            },
            AttributeRule::OneOf(options) => match value {
                AttributeValue::Text(s) => options.iter().any(|o| o == s),
                _ => true,
            },
        }
    }
}

impl fmt::Display for AttributeRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn bound<T: fmt::Display>(b: &Option<T>) -> String {
            b.as_ref().map(|v| v.to_string()).unwrap_or_default()
        }
        match self {
            AttributeRule::Range { min, max } => write!(f, "range({}, {})", bound(min), bound(max)),
            AttributeRule::Length { min, max } => write!(f, "length({}, {})", bound(min), bound(max)),
            AttributeRule::Pattern(regex) => write!(f, "pattern {}", regex.as_str()),
            AttributeRule::OneOf(options) => write!(f, "oneof({})", options.join(", ")),
        }
    }
}
