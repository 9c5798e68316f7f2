//! Reply values and command argument encoding.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// A RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A bulk string.
    String(Bytes),

    /// An integer reply.
    Integer(i64),

    /// An array reply.
    Array(Vec<Value>),

    /// A null bulk string or null array.
    Nil,

    /// A simple string such as `+OK` or `+QUEUED`.
    Status(String),

    /// An error reply nested inside an array, e.g. one slot of an `EXEC` reply.
    ///
    /// Top-level error replies never produce this variant; they surface as
    /// [`Error::Server`].
    Error(String),
}

impl Value {
    /// Returns the value as a string slice, if it is valid UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(b) => std::str::from_utf8(b).ok(),
            Value::Status(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the raw bytes of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` if the value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns `true` if the value is `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Value::Status(s) if s == "OK")
    }

    /// Converts a bulk string into its bytes; `Nil` becomes `None`.
    pub fn into_bytes(self) -> Result<Option<Bytes>> {
        match self {
            Value::String(b) => Ok(Some(b)),
            Value::Status(s) => Ok(Some(Bytes::from(s))),
            Value::Nil => Ok(None),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "bulk string",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Converts the value into a UTF-8 `String`.
    pub fn into_string(self) -> Result<String> {
        match self {
            Value::String(b) => String::from_utf8(b.to_vec())
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string value: {}", e))),
            Value::Status(s) => Ok(s),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "string",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Converts the value into an `i64`.
    pub fn into_integer(self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(n),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "integer",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Converts the value into a `Vec<Value>`. A nil array becomes empty.
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(arr) => Ok(arr),
            Value::Nil => Ok(vec![]),
            Value::Error(e) => Err(Error::Server(e)),
            other => Err(Error::UnexpectedResponse {
                expected: "array",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Returns a human-readable type name for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Array(_) => "array",
            Value::Nil => "nil",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "<binary {} bytes>", b.len()),
            },
            Value::Integer(n) => write!(f, "(integer) {}", n),
            Value::Array(arr) => {
                for (i, val) in arr.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, val)?;
                }
                Ok(())
            }
            Value::Nil => write!(f, "(nil)"),
            Value::Status(s) => write!(f, "{}", s),
            Value::Error(e) => write!(f, "(error) {}", e),
        }
    }
}

/// Types that can be passed as command arguments.
pub trait ToArg {
    /// Encode this value as a RESP bulk string argument.
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for i64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for u64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for usize {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// Scores are written with the shortest representation that parses back to
/// the same `f64`, so sorted-set scores survive a copy bit-for-bit.
impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}
