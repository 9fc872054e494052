//! XML-RPC value model and codec.
//!
//! The session only ever touches three entry points here:
//! [`serialize_method_call`] for outbound requests,
//! [`parse_method_response`] for frames answering a client call, and
//! [`parse_method_call`] for server-initiated callbacks. Everything else is
//! the value model those functions trade in.
//!
//! The dialect is the one Maniaplanet dedicated servers speak: the classic
//! scalar set (`i4`/`int`, `boolean`, `double`, `string`,
//! `dateTime.iso8601`, `base64`) plus `array` and `struct`. A `<value>`
//! without a type element is a string, per the XML-RPC spec.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{DecodeError, EncodeError, Fault};

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Double(f64),
    String(String),
    /// Raw `dateTime.iso8601` text, uninterpreted.
    DateTime(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(v) => Some(v),
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

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize a `<methodCall>` document.
pub fn serialize_method_call(method: &str, params: &[Value]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(128);
    push(&mut out, "<?xml version=\"1.0\"?><methodCall><methodName>");
    push(&mut out, &escape(method));
    push(&mut out, "</methodName><params>");
    for param in params {
        push(&mut out, "<param>");
        write_value(&mut out, param)?;
        push(&mut out, "</param>");
    }
    push(&mut out, "</params></methodCall>");
    Ok(out)
}

fn push(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), EncodeError> {
    push(out, "<value>");
    match value {
        Value::Int(v) => push(out, &format!("<int>{v}</int>")),
        Value::Bool(v) => push(out, &format!("<boolean>{}</boolean>", u8::from(*v))),
        Value::Double(v) => {
            if !v.is_finite() {
                return Err(EncodeError::NonFiniteDouble(*v));
            }
            push(out, &format!("<double>{v}</double>"));
        }
        Value::String(v) => {
            push(out, "<string>");
            push(out, &escape(v));
            push(out, "</string>");
        }
        Value::DateTime(v) => {
            push(out, "<dateTime.iso8601>");
            push(out, &escape(v));
            push(out, "</dateTime.iso8601>");
        }
        Value::Base64(data) => {
            push(out, "<base64>");
            push(out, &BASE64.encode(data));
            push(out, "</base64>");
        }
        Value::Array(items) => {
            push(out, "<array><data>");
            for item in items {
                write_value(out, item)?;
            }
            push(out, "</data></array>");
        }
        Value::Struct(members) => {
            push(out, "<struct>");
            for (name, member) in members {
                push(out, "<member><name>");
                push(out, &escape(name));
                push(out, "</name>");
                write_value(out, member)?;
                push(out, "</member>");
            }
            push(out, "</struct>");
        }
    }
    push(out, "</value>");
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a `<methodResponse>` document into either the result value or the
/// `<fault>` payload.
pub fn parse_method_response(bytes: &[u8]) -> Result<Result<Value, Fault>, DecodeError> {
    let mut t = Tokens::new(bytes);
    t.expect_start("methodResponse")?;
    match t.next_element()? {
        Token::Start(tag) if tag == "params" => {
            t.expect_start("param")?;
            t.expect_start("value")?;
            let value = parse_value(&mut t)?;
            t.expect_end("param")?;
            t.expect_end("params")?;
            t.expect_end("methodResponse")?;
            Ok(Ok(value))
        }
        Token::Start(tag) if tag == "fault" => {
            t.expect_start("value")?;
            let value = parse_value(&mut t)?;
            t.expect_end("fault")?;
            t.expect_end("methodResponse")?;
            Ok(Err(fault_from_value(value)?))
        }
        token => Err(unexpected("<params> or <fault>", &token)),
    }
}

/// Parse a `<methodCall>` document into its method name and params.
pub fn parse_method_call(bytes: &[u8]) -> Result<(String, Vec<Value>), DecodeError> {
    let mut t = Tokens::new(bytes);
    t.expect_start("methodCall")?;
    t.expect_start("methodName")?;
    let method = t.read_text_until_end("methodName")?.trim().to_string();
    let mut params = Vec::new();
    match t.next_element()? {
        Token::Start(tag) if tag == "params" => {
            loop {
                match t.next_element()? {
                    Token::Start(tag) if tag == "param" => {
                        t.expect_start("value")?;
                        params.push(parse_value(&mut t)?);
                        t.expect_end("param")?;
                    }
                    Token::End(tag) if tag == "params" => break,
                    token => return Err(unexpected("<param> or </params>", &token)),
                }
            }
            t.expect_end("methodCall")?;
        }
        // A methodCall without <params> is legal.
        Token::End(tag) if tag == "methodCall" => {}
        token => return Err(unexpected("<params> or </methodCall>", &token)),
    }
    Ok((method, params))
}

fn fault_from_value(value: Value) -> Result<Fault, DecodeError> {
    let members = match value {
        Value::Struct(members) => members,
        other => {
            return Err(DecodeError::Unexpected {
                expected: "a fault struct".to_string(),
                found: format!("{other:?}"),
            })
        }
    };
    let code = members
        .get("faultCode")
        .and_then(Value::as_i32)
        .unwrap_or(0);
    let message = members
        .get("faultString")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Fault { code, message })
}

/// Parse the inside of a `<value>` whose opening tag has been consumed.
///
/// Text outside a type element is only meaningful when no type element
/// appears at all, in which case it is the string value.
fn parse_value(t: &mut Tokens<'_>) -> Result<Value, DecodeError> {
    let mut text = String::new();
    loop {
        match t.next()? {
            Token::Text(s) => text.push_str(&s),
            Token::End(tag) if tag == "value" => return Ok(Value::String(text)),
            Token::Start(tag) => {
                let value = parse_typed(t, &tag)?;
                t.expect_end("value")?;
                return Ok(value);
            }
            token => return Err(unexpected("a type element or </value>", &token)),
        }
    }
}

fn parse_typed(t: &mut Tokens<'_>, tag: &str) -> Result<Value, DecodeError> {
    match tag {
        "int" | "i4" => {
            let text = t.read_text_until_end(tag)?;
            text.trim()
                .parse::<i32>()
                .map(Value::Int)
                .map_err(|_| DecodeError::InvalidScalar { kind: "int", text })
        }
        "boolean" => {
            let text = t.read_text_until_end(tag)?;
            match text.trim() {
                "0" => Ok(Value::Bool(false)),
                "1" => Ok(Value::Bool(true)),
                _ => Err(DecodeError::InvalidScalar {
                    kind: "boolean",
                    text,
                }),
            }
        }
        "double" => {
            let text = t.read_text_until_end(tag)?;
            text.trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| DecodeError::InvalidScalar {
                    kind: "double",
                    text,
                })
        }
        "string" => Ok(Value::String(t.read_text_until_end(tag)?)),
        "dateTime.iso8601" => Ok(Value::DateTime(
            t.read_text_until_end(tag)?.trim().to_string(),
        )),
        "base64" => {
            let text = t.read_text_until_end(tag)?;
            let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            Ok(Value::Base64(BASE64.decode(compact)?))
        }
        "array" => parse_array(t),
        "struct" => parse_struct(t),
        other => Err(DecodeError::Unexpected {
            expected: "a value type element".to_string(),
            found: format!("<{other}>"),
        }),
    }
}

fn parse_array(t: &mut Tokens<'_>) -> Result<Value, DecodeError> {
    t.expect_start("data")?;
    let mut items = Vec::new();
    loop {
        match t.next_element()? {
            Token::Start(tag) if tag == "value" => items.push(parse_value(t)?),
            Token::End(tag) if tag == "data" => break,
            token => return Err(unexpected("<value> or </data>", &token)),
        }
    }
    t.expect_end("array")?;
    Ok(Value::Array(items))
}

fn parse_struct(t: &mut Tokens<'_>) -> Result<Value, DecodeError> {
    let mut members = BTreeMap::new();
    loop {
        match t.next_element()? {
            Token::Start(tag) if tag == "member" => {
                t.expect_start("name")?;
                let name = t.read_text_until_end("name")?;
                t.expect_start("value")?;
                let value = parse_value(t)?;
                t.expect_end("member")?;
                members.insert(name, value);
            }
            Token::End(tag) if tag == "struct" => break,
            token => return Err(unexpected("<member> or </struct>", &token)),
        }
    }
    Ok(Value::Struct(members))
}

fn unexpected(expected: &str, token: &Token) -> DecodeError {
    let found = match token {
        Token::Start(tag) => format!("<{tag}>"),
        Token::End(tag) => format!("</{tag}>"),
        Token::Text(text) => format!("text {text:?}"),
        Token::Eof => "end of document".to_string(),
    };
    DecodeError::Unexpected {
        expected: expected.to_string(),
        found,
    }
}

// ---------------------------------------------------------------------------
// Token stream over quick-xml events
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Token {
    Start(String),
    End(String),
    Text(String),
    Eof,
}

/// Flattens quick-xml events into owned tokens. Self-closing elements are
/// split into a start/end pair so the parsers above see one shape.
struct Tokens<'a> {
    reader: Reader<&'a [u8]>,
    buf: Vec<u8>,
    pending_end: Option<String>,
}

impl<'a> Tokens<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: Reader::from_reader(bytes),
            buf: Vec::new(),
            pending_end: None,
        }
    }

    fn next(&mut self) -> Result<Token, DecodeError> {
        if let Some(tag) = self.pending_end.take() {
            return Ok(Token::End(tag));
        }
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    return Ok(Token::Start(
                        String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ))
                }
                Event::Empty(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    self.pending_end = Some(tag.clone());
                    return Ok(Token::Start(tag));
                }
                Event::End(e) => {
                    return Ok(Token::End(
                        String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ))
                }
                Event::Text(e) => return Ok(Token::Text(e.unescape()?.into_owned())),
                Event::CData(e) => {
                    return Ok(Token::Text(
                        String::from_utf8_lossy(e.into_inner().as_ref()).into_owned(),
                    ))
                }
                Event::Eof => return Ok(Token::Eof),
                // Declaration, comments, processing instructions.
                _ => continue,
            }
        }
    }

    /// Next token with whitespace-only text skipped; for positions where
    /// only element structure is expected.
    fn next_element(&mut self) -> Result<Token, DecodeError> {
        loop {
            match self.next()? {
                Token::Text(text) if text.trim().is_empty() => continue,
                token => return Ok(token),
            }
        }
    }

    fn expect_start(&mut self, tag: &str) -> Result<(), DecodeError> {
        match self.next_element()? {
            Token::Start(found) if found == tag => Ok(()),
            token => Err(unexpected(&format!("<{tag}>"), &token)),
        }
    }

    fn expect_end(&mut self, tag: &str) -> Result<(), DecodeError> {
        match self.next_element()? {
            Token::End(found) if found == tag => Ok(()),
            token => Err(unexpected(&format!("</{tag}>"), &token)),
        }
    }

    /// Accumulate text until the closing tag of a scalar element.
    fn read_text_until_end(&mut self, tag: &str) -> Result<String, DecodeError> {
        let mut out = String::new();
        loop {
            match self.next()? {
                Token::Text(text) => out.push_str(&text),
                Token::End(found) if found == tag => return Ok(out),
                Token::Eof => return Err(DecodeError::Eof),
                token => return Err(unexpected("scalar text", &token)),
            }
        }
    }
}
