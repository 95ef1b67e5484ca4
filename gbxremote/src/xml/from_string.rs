use indexmap::IndexMap;

use quick_xml::{events::Event, Reader};

use anyhow::{anyhow, Context, Result};

use crate::xml::{Call, Fault, Response, Value};

/// A payload received from the server: either the response to one of our
/// calls, or a method call of its own, which is how callbacks arrive.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Response(Response),
    Call(Call),
}

/// Classify and parse a received payload by its root element:
/// `<methodResponse>` (including faults) or `<methodCall>`.
pub fn read_message(input: &str) -> Result<Incoming> {
    let mut reader = Reader::from_str(input);
    reader.expand_empty_elements(true);
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event(&mut buf)? {
            Event::Decl(_) => continue,
            Event::Start(ref e) if e.name() == b"methodCall" => {
                return Ok(Incoming::Call(read_method_call(input)?));
            }
            Event::Start(ref e) if e.name() == b"methodResponse" => {
                return Ok(Incoming::Response(read_method_response(input)?));
            }
            ev => return tag_err(ev, "<methodCall> or <methodResponse>"),
        }
    }
}

/// Try to parse a `<methodCall>` in the input string.
pub fn read_method_call(input: &str) -> Result<Call> {
    let mut reader = Reader::from_str(input);
    reader.expand_empty_elements(true);
    reader.trim_text(true);

    let mut buf = Vec::new();
    expect_decl(&mut reader, &mut buf)?;

    expect_tag(b"methodCall", &mut reader, &mut buf)?;
    expect_tag(b"methodName", &mut reader, &mut buf)?;
    let method_name = reader.read_text(b"methodName", &mut buf)?;

    let mut result = Call {
        name: method_name,
        args: Vec::new(),
    };

    expect_tag(b"params", &mut reader, &mut buf)?;
    let mut vals = read_params(&mut reader, &mut buf)?;
    result.args.append(&mut vals);

    reader.read_to_end(b"methodCall", &mut buf)?;

    Ok(result)
}

/// Try to parse a `<methodResponse>` in the input string.
///
/// The parameter vector is the result: a single parameter is unwrapped
/// to its sole value, no parameters decode to `Value::Nil`, and anything
/// beyond that is kept as an array.
pub fn read_method_response(input: &str) -> Result<Response> {
    let mut reader = Reader::from_str(input);
    reader.expand_empty_elements(true);
    reader.trim_text(true);

    let mut buf = Vec::new();
    expect_decl(&mut reader, &mut buf)?;

    expect_tag(b"methodResponse", &mut reader, &mut buf)?;

    match reader.read_event(&mut buf)? {
        Event::Start(ref e) if e.name() == b"params" => {
            let mut vals = read_params(&mut reader, &mut buf)?;
            reader.read_to_end(b"methodResponse", &mut buf)?;
            match vals.len() {
                0 => Ok(Ok(Value::Nil)),
                1 => Ok(Ok(vals.remove(0))),
                _ => Ok(Ok(Value::Array(vals))),
            }
        }
        Event::Start(ref e) if e.name() == b"fault" => {
            expect_tag(b"value", &mut reader, &mut buf)?;
            match read_value(&mut reader, &mut buf)? {
                Value::Struct(members) => {
                    let code = match members.get("faultCode") {
                        Some(Value::Int(code)) => *code,
                        _ => return Err(anyhow!("cannot read fault: {:?}", members)),
                    };
                    let msg = match members.get("faultString") {
                        Some(Value::String(msg)) => msg.clone(),
                        _ => return Err(anyhow!("cannot read fault: {:?}", members)),
                    };
                    Ok(Err(Fault { code, msg }))
                }
                v => Err(anyhow!("cannot read fault: {:?}", v)),
            }
        }
        ev => tag_err(ev, "<params> or <fault>"),
    }
}

fn read_params<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<Vec<Value>>
where
    B: std::io::BufRead,
{
    let mut vals = Vec::new();
    loop {
        match reader.read_event(buf)? {
            Event::Start(e) if e.name() == b"param" => {
                let val = read_param(reader, buf)?;
                vals.push(val);
            }
            Event::End(e) if e.name() == b"params" => break,
            ev => {
                return tag_err(ev, "<param> or </params>");
            }
        };
    }
    Ok(vals)
}

fn read_param<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<Value>
where
    B: std::io::BufRead,
{
    expect_tag(b"value", reader, buf)?;
    let val = read_value(reader, buf)?;
    reader.read_to_end(b"param", buf)?;
    Ok(val)
}

fn read_value<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<Value>
where
    B: std::io::BufRead,
{
    let res: Result<Value> = match reader.read_event(buf)? {
        Event::Start(e) if e.name() == b"i4" => {
            let i: i32 = reader
                .read_text(b"i4", buf)?
                .parse()
                .context("expected a valid <i4> value")?;
            Ok(Value::Int(i))
        }
        Event::Start(e) if e.name() == b"int" => {
            let i: i32 = reader
                .read_text(b"int", buf)?
                .parse()
                .context("expected a valid <int> value")?;
            Ok(Value::Int(i))
        }
        Event::Start(e) if e.name() == b"double" => {
            let f: f64 = reader
                .read_text(b"double", buf)?
                .parse()
                .context("expected a valid <double> value")?;
            Ok(Value::Double(f))
        }
        Event::Start(e) if e.name() == b"boolean" => {
            match reader.read_text(b"boolean", buf)?.as_ref() {
                "0" => Ok(Value::Bool(false)),
                "1" => Ok(Value::Bool(true)),
                txt => Err(anyhow!("expected 0 or 1, got {}", txt)),
            }
        }
        Event::Start(e) if e.name() == b"string" => {
            let str = reader.read_text(b"string", buf)?;
            Ok(Value::String(str))
        }
        Event::Start(e) if e.name() == b"dateTime.iso8601" => {
            let str = reader.read_text(b"dateTime.iso8601", buf)?;
            Ok(Value::DateTime(str))
        }
        Event::Start(e) if e.name() == b"base64" => {
            let str = reader.read_text(b"base64", buf)?;
            Ok(Value::Base64(base64_decode(&str)?))
        }
        Event::Start(e) if e.name() == b"nil" => {
            reader.read_to_end(b"nil", buf)?;
            Ok(Value::Nil)
        }
        Event::Start(e) if e.name() == b"array" => {
            let arr = read_array(reader, buf)?;
            Ok(arr)
        }
        Event::Start(e) if e.name() == b"struct" => {
            let strct = read_struct(reader, buf)?;
            Ok(strct)
        }
        // A <value> without a type tag holds a string.
        Event::Text(text) => {
            let str = text.unescape_and_decode(reader)?;
            Ok(Value::String(str))
        }
        ev => tag_err(
            ev,
            "<i4>, <int>, <double>, <boolean>, <string>, <dateTime.iso8601>, \
             <base64>, <nil>, <array> or <struct>",
        ),
    };
    reader.read_to_end(b"value", buf)?;
    Ok(res?)
}

/// Decode Base64 to bytes.
pub fn base64_decode(b64: &str) -> Result<Vec<u8>> {
    // The base64 crate cannot decode with whitespace, but the server
    // gives us text that is wrapped at 76 characters (specified by MIME) with '\r\n'
    let mut str_no_wrap = String::with_capacity(b64.len());
    for c in b64.chars() {
        if c.is_ascii_whitespace() {
            continue;
        }
        str_no_wrap.push(c);
    }
    base64::decode(&str_no_wrap).context("expected a valid <base64> value")
}

fn read_array<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<Value>
where
    B: std::io::BufRead,
{
    expect_tag(b"data", reader, buf)?;

    let mut vals = Vec::new();
    loop {
        match reader.read_event(buf)? {
            Event::Start(e) if e.name() == b"value" => {
                let val = read_value(reader, buf)?;
                vals.push(val);
            }
            Event::End(e) if e.name() == b"data" => {
                reader.read_to_end(b"array", buf)?;
                break;
            }
            ev => {
                return tag_err(ev, "<value> or </data>");
            }
        };
    }
    Ok(Value::Array(vals))
}

fn read_struct<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<Value>
where
    B: std::io::BufRead,
{
    // Member order is kept as encountered.
    let mut members = IndexMap::new();
    loop {
        match reader.read_event(buf)? {
            Event::Start(e) if e.name() == b"member" => {
                expect_tag(b"name", reader, buf)?;
                let mem_name = reader.read_text(b"name", buf)?;
                expect_tag(b"value", reader, buf)?;
                let mem_val = read_value(reader, buf)?;
                reader.read_to_end(b"member", buf)?;
                members.insert(mem_name, mem_val);
            }
            Event::End(e) if e.name() == b"struct" => break,
            ev => {
                return tag_err(ev, "<member> or </struct>");
            }
        };
    }
    Ok(Value::Struct(members))
}

fn expect_decl<B>(reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<()>
where
    B: std::io::BufRead,
{
    match reader.read_event(buf)? {
        Event::Decl(_) => Ok(()),
        ev => tag_err(ev, "<xml>"),
    }
}

fn expect_tag<B>(end: &[u8], reader: &mut Reader<B>, buf: &mut Vec<u8>) -> Result<()>
where
    B: std::io::BufRead,
{
    match reader.read_event(buf)? {
        Event::Start(ref e) if e.name() == end => Ok(()),
        ev => tag_err(ev, std::str::from_utf8(end)?),
    }
}

fn tag_err<T>(got: Event, expected: &str) -> Result<T> {
    Err(anyhow!(
        "XML parser got {:?}, but expected {}",
        got,
        expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_callback_no_params() {
        let expected = Call {
            name: "ManiaPlanet.PlayerConnect".to_string(),
            args: vec![],
        };
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodCall>
               <methodName>ManiaPlanet.PlayerConnect</methodName>
               <params>
               </params>
            </methodCall>
        "#;
        assert_eq!(expected, read_method_call(xml).unwrap())
    }

    #[test]
    fn parse_callback_params() {
        let expected = Call {
            name: "ManiaPlanet.PlayerConnect".to_string(),
            args: vec![Value::String("tim".to_string()), Value::Bool(false)],
        };
        let xml = r#"
        <?xml version="1.0" encoding="UTF-8"?>
            <methodCall>
               <methodName>ManiaPlanet.PlayerConnect</methodName>
               <params>
                 <param>
                     <value>
                        <string>tim</string>
                     </value>
                  </param>
                  <param>
                     <value>
                        <boolean>0</boolean>
                     </value>
                  </param>
               </params>
            </methodCall>
        "#;
        assert_eq!(expected, read_method_call(xml).unwrap())
    }

    #[test]
    fn parse_callback_array() {
        let expected = Call {
            name: "ManiaPlanet.PlayerConnect".to_string(),
            args: vec![Value::Array(vec![Value::Int(42), Value::Double(3.14)])],
        };
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodCall>
               <methodName>ManiaPlanet.PlayerConnect</methodName>
               <params><param><value><array><data>
                 <value>
                    <i4>42</i4>
                 </value>
                 <value>
                    <double>3.14</double>
                 </value>
               </data></array></value></param></params>
            </methodCall>
        "#;
        assert_eq!(expected, read_method_call(xml).unwrap())
    }

    #[test]
    fn parse_callback_empty_array() {
        let expected = Call {
            name: "ManiaPlanet.PlayerConnect".to_string(),
            args: vec![Value::Array(vec![])],
        };
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodCall>
               <methodName>ManiaPlanet.PlayerConnect</methodName>
               <params><param><value><array><data>
               </data></array></value></param></params>
            </methodCall>
        "#;
        assert_eq!(expected, read_method_call(xml).unwrap())
    }

    #[test]
    fn parse_struct_keeps_member_order() {
        let xml = r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <methodCall>
           <methodName>ManiaPlanet.PlayerInfoChanged</methodName>
           <params>
              <param>
                 <value>
                    <struct>
                       <member>
                          <name>Zulu</name>
                          <value><string>z</string></value>
                       </member>
                       <member>
                          <name>Alpha</name>
                          <value><i4>1</i4></value>
                       </member>
                    </struct>
                 </value>
              </param>
           </params>
        </methodCall>
        "#;
        let call = read_method_call(xml).unwrap();
        let members = call.args[0].as_struct().unwrap();
        let keys: Vec<&str> = members.keys().map(|k| k.as_str()).collect();
        assert_eq!(vec!["Zulu", "Alpha"], keys);
    }

    #[test]
    fn parse_response_single_param_is_unwrapped() {
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodResponse>
               <params>
                  <param><value><i4>7</i4></value></param>
               </params>
            </methodResponse>
        "#;
        assert_eq!(Ok(Value::Int(7)), read_method_response(xml).unwrap());
    }

    #[test]
    fn parse_response_without_params_is_nil() {
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodResponse>
               <params></params>
            </methodResponse>
        "#;
        assert_eq!(Ok(Value::Nil), read_method_response(xml).unwrap());
    }

    #[test]
    fn parse_fault() {
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodResponse>
                <fault>
                    <value>
                        <struct>
                            <member>
                                <name>faultCode</name>
                                <value><int>-1000</int></value>
                            </member>
                            <member>
                                <name>faultString</name>
                                <value><string>Login unknown.</string></value>
                            </member>
                        </struct>
                    </value>
                </fault>
            </methodResponse>
        "#;
        let expected = Fault {
            code: -1000,
            msg: "Login unknown.".to_string(),
        };
        assert_eq!(Err(expected), read_method_response(xml).unwrap());
    }

    #[test]
    fn parse_nil_value() {
        let xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodResponse>
               <params>
                  <param><value><nil/></value></param>
               </params>
            </methodResponse>
        "#;
        assert_eq!(Ok(Value::Nil), read_method_response(xml).unwrap());
    }

    #[test]
    fn classify_call_and_response() {
        let call_xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodCall>
               <methodName>ManiaPlanet.BeginMatch</methodName>
               <params></params>
            </methodCall>
        "#;
        let response_xml = r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <methodResponse>
               <params>
                  <param><value><boolean>1</boolean></value></param>
               </params>
            </methodResponse>
        "#;
        match read_message(call_xml).unwrap() {
            Incoming::Call(call) => assert_eq!("ManiaPlanet.BeginMatch", call.name),
            other => panic!("expected a call, got {:?}", other),
        }
        match read_message(response_xml).unwrap() {
            Incoming::Response(response) => assert_eq!(Ok(Value::Bool(true)), response),
            other => panic!("expected a response, got {:?}", other),
        }
    }
}
