//! The console's command expressions: a method name followed by typed
//! arguments, e.g. `SetMatchSettings "file" [1,2,[3,true]] -4.5`.

use thiserror::Error;

use gbxremote::Value;

pub use lexer::{tokenize, Number, Token, TokenKind};
pub use parser::parse_call;

mod lexer;
mod parser;

/// Why an expression could not be understood. Positions are character
/// indices into the input line.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { pos: usize, found: String },

    #[error("string opened at position {pos} is never closed")]
    UnterminatedString { pos: usize },

    #[error("malformed number at position {pos}")]
    MalformedNumber { pos: usize },

    #[error("unexpected end of input at position {pos}")]
    UnexpectedEndOfInput { pos: usize },
}

impl ParseError {
    /// The character index the error points at.
    pub fn position(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { pos, .. } => *pos,
            ParseError::UnterminatedString { pos } => *pos,
            ParseError::MalformedNumber { pos } => *pos,
            ParseError::UnexpectedEndOfInput { pos } => *pos,
        }
    }
}

/// Render a value the way an operator would type it. Values that have
/// no expression syntax fall back to their debug form.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Double(f) => format!("{:?}", f),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        Value::Array(vs) => {
            let elements: Vec<String> = vs.iter().map(render_value).collect();
            format!("[{}]", elements.join(", "))
        }
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_parses_back_to_the_same_value() {
        let values = vec![
            Value::Int(42),
            Value::Int(-13),
            Value::Double(4.25),
            Value::Double(-0.5),
            Value::Double(2.0),
            Value::Bool(true),
            Value::Bool(false),
            Value::String("hello world".to_string()),
            Value::Array(vec![
                Value::Int(1),
                Value::Array(vec![Value::Bool(false), Value::Double(1.5)]),
                Value::String("x".to_string()),
            ]),
        ];
        for value in values {
            let line = format!("Echo {}", render_value(&value));
            let (method, args) = parse_call(&line).unwrap();
            assert_eq!("Echo", method);
            assert_eq!(vec![value], args);
        }
    }
}
