//! Attribute data types and write-side conversion.

use crate::error::{Error, TypeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Declared data type of an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Blob,
}

impl DataType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(self) -> &'static str {
        match self {
            DataType::String => "VARCHAR(255)",
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Float => "DOUBLE PRECISION",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
            DataType::Blob => "BLOB",
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(self, DataType::Integer)
    }

    pub const fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    /// Convert a value before it is written to a column of this type.
    ///
    /// Integer columns turn empty input into NULL and coerce everything else
    /// to an integer; float columns coerce numeric text. Other types pass
    /// through unchanged.
    pub fn convert_for_storage(self, value: &Value) -> Result<Value, Error> {
        match self {
            DataType::Integer => {
                if value.is_empty() {
                    return Ok(Value::Null);
                }
                match value {
                    Value::BigInt(v) => Ok(Value::BigInt(*v)),
                    Value::Bool(b) => Ok(Value::BigInt(i64::from(*b))),
                    Value::Double(d) => Ok(Value::BigInt(d.trunc() as i64)),
                    Value::Text(s) => parse_integer(s).map(Value::BigInt).ok_or_else(|| {
                        Error::Type(TypeError {
                            expected: "integer",
                            actual: format!("'{s}'"),
                            attribute: None,
                        })
                    }),
                    other => Err(Error::Type(TypeError {
                        expected: "integer",
                        actual: other.type_name().to_string(),
                        attribute: None,
                    })),
                }
            }
            DataType::Float => match value {
                Value::Text(s) if s.is_empty() => Ok(Value::Null),
                Value::Text(s) => Ok(s.trim().parse().map_or_else(|_| value.clone(), Value::Double)),
                Value::BigInt(v) => Ok(Value::Double(*v as f64)),
                other => Ok(other.clone()),
            },
            _ => Ok(value.clone()),
        }
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.trunc() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_columns_null_empty_input() {
        assert_eq!(
            DataType::Integer.convert_for_storage(&Value::Text(String::new())).unwrap(),
            Value::Null
        );
        assert_eq!(
            DataType::Integer.convert_for_storage(&Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn integer_columns_coerce() {
        assert_eq!(
            DataType::Integer.convert_for_storage(&Value::Text("12".into())).unwrap(),
            Value::BigInt(12)
        );
        assert_eq!(
            DataType::Integer.convert_for_storage(&Value::Double(3.9)).unwrap(),
            Value::BigInt(3)
        );
        assert!(DataType::Integer
            .convert_for_storage(&Value::Text("abc".into()))
            .is_err());
    }

    #[test]
    fn strings_pass_through() {
        assert_eq!(
            DataType::String.convert_for_storage(&Value::Text(String::new())).unwrap(),
            Value::Text(String::new())
        );
    }

    #[test]
    fn serde_names_are_lowercase() {
        let t: DataType = serde_json::from_str("\"datetime\"").unwrap();
        assert_eq!(t, DataType::DateTime);
    }
}
