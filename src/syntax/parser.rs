use gbxremote::Value;

use crate::syntax::lexer::{tokenize, Number, Token, TokenKind};
use crate::syntax::ParseError;

/// Parse one console line into a method name and its arguments.
///
/// The grammar is an identifier followed by any number of values;
/// values are numbers, strings, booleans, bare identifiers (which
/// become strings), and bracketed arrays with comma-separated,
/// arbitrarily nested elements.
pub fn parse_call(input: &str) -> Result<(String, Vec<Value>), ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        i: 0,
        end: input.chars().count(),
    };
    parser.call()
}

struct Parser {
    tokens: Vec<Token>,
    i: usize,
    /// Character index just past the input, for errors at its end.
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.i)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.i).cloned();
        if token.is_some() {
            self.i += 1;
        }
        token
    }

    fn skip_whitespace(&mut self) {
        while let Some(Token {
            kind: TokenKind::Whitespace(_),
            ..
        }) = self.peek()
        {
            self.i += 1;
        }
    }

    fn unexpected(token: &Token) -> ParseError {
        ParseError::UnexpectedToken {
            pos: token.pos,
            found: token.kind.describe(),
        }
    }

    fn call(&mut self) -> Result<(String, Vec<Value>), ParseError> {
        self.skip_whitespace();
        let method = match self.next() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => name,
            Some(token) => return Err(Self::unexpected(&token)),
            None => return Err(ParseError::UnexpectedEndOfInput { pos: self.end }),
        };

        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                break;
            }
            args.push(self.value()?);
        }
        Ok((method, args))
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(ParseError::UnexpectedEndOfInput { pos: self.end }),
        };
        let pos = token.pos;
        match token.kind {
            TokenKind::Number(Number::Int(i)) => Ok(Value::Int(i)),
            TokenKind::Number(Number::Float(f)) => Ok(Value::Double(f)),
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Boolean(b) => Ok(Value::Bool(b)),
            TokenKind::Identifier(s) => Ok(Value::String(s)),
            TokenKind::ArrayStart => self.array(),
            other => Err(ParseError::UnexpectedToken {
                pos,
                found: other.describe(),
            }),
        }
    }

    /// Called with the opening bracket consumed. Elements and
    /// separators have to alternate; neither a separator before the
    /// first element nor one before the closing bracket is allowed.
    fn array(&mut self) -> Result<Value, ParseError> {
        let mut elements = Vec::new();

        self.skip_whitespace();
        if let Some(Token {
            kind: TokenKind::ArrayEnd,
            ..
        }) = self.peek()
        {
            self.i += 1;
            return Ok(Value::Array(elements));
        }

        loop {
            elements.push(self.value()?);
            self.skip_whitespace();
            match self.next() {
                Some(Token {
                    kind: TokenKind::ArrayEnd,
                    ..
                }) => return Ok(Value::Array(elements)),
                Some(Token {
                    kind: TokenKind::ArraySeparator,
                    ..
                }) => {
                    self.skip_whitespace();
                    match self.peek() {
                        Some(Token {
                            kind: TokenKind::ArrayEnd,
                            ..
                        })
                        | Some(Token {
                            kind: TokenKind::ArraySeparator,
                            ..
                        }) => {
                            let token = self.peek().unwrap().clone();
                            return Err(Self::unexpected(&token));
                        }
                        None => {
                            return Err(ParseError::UnexpectedEndOfInput { pos: self.end })
                        }
                        Some(_) => {}
                    }
                }
                Some(token) => return Err(Self::unexpected(&token)),
                None => return Err(ParseError::UnexpectedEndOfInput { pos: self.end }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_call() {
        let (method, args) = parse_call(r#"SetMatchSettings "map" [1,2,[3,true]] -4.5"#).unwrap();
        assert_eq!("SetMatchSettings", method);
        assert_eq!(
            vec![
                Value::String("map".to_string()),
                Value::Array(vec![
                    Value::Int(1),
                    Value::Int(2),
                    Value::Array(vec![Value::Int(3), Value::Bool(true)]),
                ]),
                Value::Double(-4.5),
            ],
            args
        );
    }

    #[test]
    fn parses_a_bare_method() {
        let (method, args) = parse_call("GetVersion").unwrap();
        assert_eq!("GetVersion", method);
        assert!(args.is_empty());
    }

    #[test]
    fn bare_identifier_arguments_become_strings() {
        let (_, args) = parse_call("Kick somelogin").unwrap();
        assert_eq!(vec![Value::String("somelogin".to_string())], args);
    }

    #[test]
    fn the_method_name_must_come_first() {
        assert!(matches!(
            parse_call("3 GetVersion"),
            Err(ParseError::UnexpectedToken { pos: 0, .. })
        ));
        assert!(matches!(
            parse_call(",foo"),
            Err(ParseError::UnexpectedToken { pos: 0, .. })
        ));
    }

    #[test]
    fn the_empty_line_does_not_parse() {
        assert_eq!(
            Err(ParseError::UnexpectedEndOfInput { pos: 0 }),
            parse_call("")
        );
        assert_eq!(
            Err(ParseError::UnexpectedEndOfInput { pos: 3 }),
            parse_call("   ")
        );
    }

    #[test]
    fn rejects_stray_separators_and_brackets() {
        assert!(matches!(
            parse_call("foo,bar"),
            Err(ParseError::UnexpectedToken { pos: 3, .. })
        ));
        assert!(matches!(
            parse_call("foo ]"),
            Err(ParseError::UnexpectedToken { pos: 4, .. })
        ));
    }

    #[test]
    fn rejects_double_separators() {
        assert!(matches!(
            parse_call("Set [1,,2]"),
            Err(ParseError::UnexpectedToken { pos: 7, .. })
        ));
    }

    #[test]
    fn rejects_elements_without_a_separator() {
        assert!(matches!(
            parse_call("Set [1 2]"),
            Err(ParseError::UnexpectedToken { pos: 7, .. })
        ));
    }

    #[test]
    fn rejects_trailing_separators() {
        assert!(matches!(
            parse_call("Set [1,]"),
            Err(ParseError::UnexpectedToken { pos: 7, .. })
        ));
    }

    #[test]
    fn rejects_unterminated_arrays() {
        assert_eq!(
            Err(ParseError::UnexpectedEndOfInput { pos: 6 }),
            parse_call("Set [1")
        );
        assert_eq!(
            Err(ParseError::UnexpectedEndOfInput { pos: 7 }),
            parse_call("Set [1,")
        );
    }

    #[test]
    fn parses_empty_and_nested_arrays() {
        let (_, args) = parse_call("Set [] [ [1] , [] ]").unwrap();
        assert_eq!(
            vec![
                Value::Array(vec![]),
                Value::Array(vec![
                    Value::Array(vec![Value::Int(1)]),
                    Value::Array(vec![]),
                ]),
            ],
            args
        );
    }

    #[test]
    fn whitespace_may_surround_separators() {
        let (_, args) = parse_call("Set [ 1 , 2 ]").unwrap();
        assert_eq!(
            vec![Value::Array(vec![Value::Int(1), Value::Int(2)])],
            args
        );
    }
}
