use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed attribute value carried by an operator's attribute map.
///
/// Attributes are a tagged variant rather than an open dynamic map so that
/// wrong-kind access is a typed error instead of a silent coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    Strs(Vec<String>),
}

impl AttrValue {
    /// Short tag naming the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Bool(_) => "bool",
            AttrValue::Str(_) => "str",
            AttrValue::Ints(_) => "ints",
            AttrValue::Floats(_) => "floats",
            AttrValue::Bools(_) => "bools",
            AttrValue::Strs(_) => "strs",
        }
    }

    pub fn as_int(&self) -> Result<i64, AttrError> {
        match self {
            AttrValue::Int(value) => Ok(*value),
            other => Err(AttrError::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn as_float(&self) -> Result<f64, AttrError> {
        match self {
            AttrValue::Float(value) => Ok(*value),
            other => Err(AttrError::TypeMismatch {
                expected: "float",
                found: other.kind(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, AttrError> {
        match self {
            AttrValue::Bool(value) => Ok(*value),
            other => Err(AttrError::TypeMismatch {
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, AttrError> {
        match self {
            AttrValue::Str(value) => Ok(value),
            other => Err(AttrError::TypeMismatch {
                expected: "str",
                found: other.kind(),
            }),
        }
    }

    pub fn as_ints(&self) -> Result<&[i64], AttrError> {
        match self {
            AttrValue::Ints(values) => Ok(values),
            other => Err(AttrError::TypeMismatch {
                expected: "ints",
                found: other.kind(),
            }),
        }
    }

    pub fn as_strs(&self) -> Result<&[String], AttrError> {
        match self {
            AttrValue::Strs(values) => Ok(values),
            other => Err(AttrError::TypeMismatch {
                expected: "strs",
                found: other.kind(),
            }),
        }
    }
}

/// Errors surfaced by typed attribute access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttrError {
    #[error("attribute holds a {found} value, expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access_matches_variant() {
        assert_eq!(AttrValue::Int(3).as_int(), Ok(3));
        assert_eq!(AttrValue::Bool(true).as_bool(), Ok(true));
        assert_eq!(AttrValue::Str("a".into()).as_str(), Ok("a"));
        assert_eq!(AttrValue::Ints(vec![1, 2]).as_ints(), Ok(&[1i64, 2][..]));
    }

    #[test]
    fn wrong_kind_access_is_a_type_mismatch() {
        let err = AttrValue::Float(1.5).as_int().unwrap_err();
        assert_eq!(
            err,
            AttrError::TypeMismatch {
                expected: "int",
                found: "float",
            }
        );
    }
}
