//! Reversible escaping of characters NGSI v2 brokers refuse in attribute values.
//!
//! `%` is escaped along with the forbidden characters, which is what makes
//! `decode(encode(s)) == s` hold for every input.

use std::fmt;

use serde_json::Value;

const ESCAPES: [(char, &str); 9] = [
    ('%', "%25"),
    ('<', "%3C"),
    ('>', "%3E"),
    ('"', "%22"),
    ('\'', "%27"),
    ('=', "%3D"),
    (';', "%3B"),
    ('(', "%28"),
    (')', "%29"),
];

#[derive(Debug, thiserror::Error)]
#[error("json error: {0}")]
pub struct SafeStringError(#[from] serde_json::Error);

pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ESCAPES.iter().find(|(c, _)| *c == ch) {
            Some((_, escaped)) => out.push_str(escaped),
            None => out.push(ch),
        }
    }
    out
}

/// Undo [`encode`]. Percent sequences that `encode` never produces are left untouched.
pub fn decode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        let hit = candidate.get(..3).and_then(|code| {
            ESCAPES
                .iter()
                .find(|(_, escaped)| escaped.eq_ignore_ascii_case(code))
        });
        match hit {
            Some((ch, _)) => {
                out.push(*ch);
                rest = &candidate[3..];
            }
            None => {
                out.push('%');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn map_strings(value: &mut Value, f: &dyn Fn(&str) -> String) {
    match value {
        Value::String(text) => *text = f(text),
        Value::Array(items) => items.iter_mut().for_each(|item| map_strings(item, f)),
        Value::Object(fields) => fields.values_mut().for_each(|item| map_strings(item, f)),
        _ => {}
    }
}

fn transform_json(body: &[u8], f: &dyn Fn(&str) -> String) -> Result<Vec<u8>, SafeStringError> {
    let mut value: Value = serde_json::from_slice(body)?;
    map_strings(&mut value, f);
    Ok(serde_json::to_vec(&value)?)
}

/// Escape every string value of a JSON document. Object keys are left alone.
pub fn encode_json(body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
    transform_json(body, &encode)
}

pub fn decode_json(body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
    transform_json(body, &decode)
}

/// Transform applied to payloads on the way out and to response bodies on the way in.
pub trait PayloadFilter: fmt::Debug + Send + Sync {
    fn outbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError>;
    fn inbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PayloadFilter for Passthrough {
    fn outbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
        Ok(body.to_vec())
    }

    fn inbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
        Ok(body.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SafeStringFilter;

impl PayloadFilter for SafeStringFilter {
    fn outbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
        encode_json(body)
    }

    fn inbound(&self, body: &[u8]) -> Result<Vec<u8>, SafeStringError> {
        decode_json(body)
    }
}
