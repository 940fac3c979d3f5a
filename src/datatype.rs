// used to give attribute types a stable text form in documents and type signatures
use serde::{Deserialize, Serialize};
// native values are JSON values, since documents are JSON objects
use serde_json::{Number, Value};

// used when parsing a type name
use std::str::FromStr;
// used to print out readable forms of a data type
use std::fmt;

use crate::error::{EavError, Result};

/// The closed set of declared attribute types.
///
/// Every attribute value travels as text; the declared type decides how that
/// text is turned into the native value written to indexable fields.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Reference,
    Latitude,
    Longitude,
}

impl AttributeType {
    pub const ALL: [AttributeType; 6] = [
        AttributeType::String,
        AttributeType::Number,
        AttributeType::Boolean,
        AttributeType::Reference,
        AttributeType::Latitude,
        AttributeType::Longitude,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::String => "STRING",
            AttributeType::Number => "NUMBER",
            AttributeType::Boolean => "BOOLEAN",
            AttributeType::Reference => "REFERENCE",
            AttributeType::Latitude => "LATITUDE",
            AttributeType::Longitude => "LONGITUDE",
        }
    }

    pub fn is_geo(&self) -> bool {
        matches!(self, AttributeType::Latitude | AttributeType::Longitude)
    }

    /// Converts the text form of a value into its native form.
    pub fn convert(&self, value: &str) -> Result<Value> {
        match self {
            AttributeType::String | AttributeType::Reference => Ok(Value::String(value.to_owned())),
            AttributeType::Number => {
                let trimmed = value.trim();
                if let Ok(integer) = trimmed.parse::<i64>() {
                    return Ok(Value::Number(integer.into()));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| self.conversion_error(value))
            }
            AttributeType::Boolean => match value.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(self.conversion_error(value)),
            },
            AttributeType::Latitude => self.coordinate(value, 90.0),
            AttributeType::Longitude => self.coordinate(value, 180.0),
        }
    }

    fn coordinate(&self, value: &str, bound: f64) -> Result<Value> {
        let degrees = value
            .trim()
            .parse::<f64>()
            .map_err(|_| self.conversion_error(value))?;
        if !(-bound..=bound).contains(&degrees) {
            return Err(self.conversion_error(value));
        }
        Number::from_f64(degrees)
            .map(Value::Number)
            .ok_or_else(|| self.conversion_error(value))
    }

    fn conversion_error(&self, value: &str) -> EavError {
        EavError::Conversion {
            value: value.to_owned(),
            attribute_type: self.name().to_owned(),
        }
    }
}

impl FromStr for AttributeType {
    type Err = EavError;
    fn from_str(s: &str) -> Result<Self> {
        AttributeType::ALL
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| EavError::Codec(format!("unknown attribute type '{}'", s)))
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Renders a native value back into the text form it was converted from.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
