use indexmap::IndexMap;

pub use from_string::*;
pub use from_value::*;
pub use to_string::*;

mod from_string;
mod from_value;
mod to_string;

/// An XML-RPC method call (`<methodCall>`).
///
/// Calls travel in both directions: we send them to invoke server methods,
/// and the server sends them to us to signal callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Value>,
}

/// An XML-RPC method response (`<methodResponse>`).
pub type Response = Result<Value, Fault>;

/// An XML-RPC fault (`<fault>`) of a failed method call.
///
/// Specific errors should be matched by their error message,
/// since the game often uses the code `-1000` for a lot of different errors.
/// When the message is an empty string, the cause has to be
/// deduced from the call, and the context in which it was made.
#[derive(Clone, Debug, PartialEq)]
pub struct Fault {
    pub code: i32,
    pub msg: String,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fault {}: {}", self.code, self.msg)
    }
}

/// An XML-RPC value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A 32-bit signed integer (`<i4>` or `<int>`).
    Int(i32),

    /// A boolean value (`<boolean>`, 0 == `false`, 1 == `true`).
    Bool(bool),

    /// A string (`<string>`).
    String(String),

    /// A double-precision IEEE 754 floating point number (`<double>`).
    Double(f64),

    /// A date in ISO 8601 format (`<dateTime.iso8601>`).
    ///
    /// The server's notion of dates is kept verbatim; values round-trip,
    /// but are otherwise opaque.
    DateTime(String),

    /// Base64-encoded binary data (`<base64>`).
    Base64(Vec<u8>),

    /// A mapping of named values (`<struct>`).
    ///
    /// Member order is the order encountered in the XML.
    Struct(IndexMap<String, Value>),

    /// A list of arbitrary (heterogeneous) values (`<array>`).
    Array(Vec<Value>),

    /// An explicit null (`<nil/>`), and the result of calls
    /// that do not return anything.
    Nil,
}

impl Value {
    /// The integer behind this value, if it is one.
    pub fn as_i4(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(vs) => Some(vs),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Struct(ms) => Some(ms),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Base64(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Struct(v)
    }
}

impl<T> From<Vec<T>> for Value
where
    Value: From<T>,
{
    fn from(vs: Vec<T>) -> Self {
        Value::Array(vs.into_iter().map(|v| v.into()).collect())
    }
}
