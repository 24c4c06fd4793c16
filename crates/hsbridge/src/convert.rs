//! Conversion between host values and Lua literal text.
//!
//! The grammar is the one the remote runtime accepts and the prelude's
//! `NS_literal` helper produces: decimal numbers, single-quoted strings with no
//! escaping, `true`/`false`, `nil`, `{ e1, e2 }` arrays and `{ [k] = v }` maps.

use crate::{
    error::{Error, Result},
    value::{LuaType, Value},
};

/// Render a host value as a Lua literal.
///
/// Strings are wrapped in single quotes without escaping, so text containing
/// `'` produces a literal the remote side will misparse.
///
/// # Errors
/// Returns [`Error::UnsupportedValueType`] for callables, at any depth.
pub fn serialize(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_literal(*f),
        Value::Text(s) => format!("'{s}'"),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok("{}".to_string());
            }
            let items = items.iter().map(serialize).collect::<Result<Vec<_>>>()?;
            format!("{{ {} }}", items.join(", "))
        }
        Value::Map(entries) => {
            if entries.is_empty() {
                return Ok("{}".to_string());
            }
            let entries = entries
                .iter()
                .map(|(k, v)| Ok(format!("[{}] = {}", serialize(k)?, serialize(v)?)))
                .collect::<Result<Vec<_>>>()?;
            format!("{{ {} }}", entries.join(", "))
        }
        Value::Callable(_) => {
            return Err(Error::UnsupportedValueType {
                type_name: value.type_name().to_string(),
            });
        }
    })
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "(0/0)".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "math.huge" } else { "-math.huge" }.to_string()
    } else {
        // Debug keeps a `.` or an exponent, so the text never reads back as an
        // integer.
        format!("{f:?}")
    }
}

/// Parse literal text of a known Lua type into a host value.
///
/// Table parsing is lenient: entries that are empty or fail to parse are
/// skipped rather than reported.
///
/// # Errors
/// Returns [`Error::MalformedLiteral`] for unparsable scalars,
/// [`Error::MalformedTableText`] for text that is not a balanced brace-delimited
/// table, and [`Error::UnsupportedValueType`] for functions, userdata and
/// threads.
pub fn deserialize(kind: LuaType, text: &str) -> Result<Value> {
    match kind {
        LuaType::Number => parse_number(text),
        LuaType::String => Ok(Value::Text(unquote(text).to_string())),
        LuaType::Boolean => {
            let t = unquote(text.trim());
            if t.eq_ignore_ascii_case("true") {
                Ok(Value::Boolean(true))
            } else if t.eq_ignore_ascii_case("false") {
                Ok(Value::Boolean(false))
            } else {
                Err(Error::MalformedLiteral {
                    kind,
                    text: text.to_string(),
                })
            }
        }
        LuaType::Nil => Ok(Value::Nil),
        LuaType::Table => parse_table(text),
        LuaType::Function | LuaType::Userdata | LuaType::Thread => {
            Err(Error::UnsupportedValueType {
                type_name: kind.to_string(),
            })
        }
    }
}

/// Guess the type of a literal from its leading text.
#[must_use]
pub fn infer_type(text: &str) -> LuaType {
    let t = text.trim();
    if t.starts_with('\'') || t.starts_with('"') {
        LuaType::String
    } else if t == "true" || t == "false" {
        LuaType::Boolean
    } else if t == "nil" {
        LuaType::Nil
    } else if t.starts_with('{') {
        LuaType::Table
    } else {
        LuaType::Number
    }
}

fn unquote(text: &str) -> &str {
    let bytes = text.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&a), Some(&b)) if bytes.len() >= 2 && a == b && (a == b'\'' || a == b'"') => {
            &text[1..text.len() - 1]
        }
        _ => text,
    }
}

fn parse_number(text: &str) -> Result<Value> {
    let t = unquote(text.trim()).trim();
    if !t.contains('.') {
        if let Ok(i) = t.parse::<i64>() {
            return Ok(Value::Int(i));
        }
    }
    parse_float(t)
        .map(Value::Float)
        .ok_or_else(|| Error::MalformedLiteral {
            kind: LuaType::Number,
            text: text.to_string(),
        })
}

fn parse_float(t: &str) -> Option<f64> {
    let (negative, body) = t.strip_prefix('-').map_or((false, t), |rest| (true, rest));
    let special = match body.to_ascii_lowercase().as_str() {
        "inf" | "infinity" | "math.huge" => f64::INFINITY,
        "nan" | "(0/0)" => f64::NAN,
        _ => return t.parse().ok(),
    };
    Some(if negative { -special } else { special })
}

enum Entry<'a> {
    Positional(&'a str),
    Bracketed(&'a str, &'a str),
    Named(&'a str, &'a str),
    Malformed,
}

fn parse_table(text: &str) -> Result<Value> {
    let malformed = || Error::MalformedTableText {
        text: text.to_string(),
    };
    let body = text
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(malformed)?;
    let entries: Vec<Entry<'_>> = split_entries(body)
        .ok_or_else(malformed)?
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(classify_entry)
        .collect();

    let keyed = entries
        .iter()
        .any(|e| matches!(e, Entry::Bracketed(..) | Entry::Named(..)));
    if !keyed {
        return Ok(Value::Array(
            entries
                .into_iter()
                .filter_map(|e| match e {
                    Entry::Positional(t) => parse_inferred(t),
                    _ => None,
                })
                .collect(),
        ));
    }

    let mut next_index = 0_i64;
    let mut map = Vec::with_capacity(entries.len());
    for entry in entries {
        let (key, value) = match entry {
            Entry::Positional(t) => {
                next_index += 1;
                (Some(Value::Int(next_index)), t)
            }
            Entry::Bracketed(k, v) => (Some(parse_key(k)), v),
            Entry::Named(k, v) => (Some(Value::Text(k.to_string())), v),
            Entry::Malformed => (None, ""),
        };
        let (Some(key), Some(value)) = (key, parse_inferred(value)) else {
            continue;
        };
        if key.is_nil() {
            continue;
        }
        match map.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => map.push((key, value)),
        }
    }
    Ok(Value::Map(map))
}

fn parse_inferred(text: &str) -> Option<Value> {
    deserialize(infer_type(text), text).ok()
}

fn parse_key(text: &str) -> Value {
    let text = text.trim();
    parse_inferred(text).unwrap_or_else(|| Value::Text(unquote(text).to_string()))
}

/// Split at commas outside nested braces and quoted strings. `None` when braces
/// or quotes are unbalanced.
fn split_entries(body: &str) -> Option<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0_usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                items.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    items.push(&body[start..]);
    Some(items)
}

fn classify_entry(entry: &str) -> Entry<'_> {
    if let Some(rest) = entry.strip_prefix('[') {
        let Some(close) = closing_bracket(rest) else {
            return Entry::Malformed;
        };
        let key = &rest[..close];
        return match rest[close + 1..].trim_start().strip_prefix('=') {
            Some(value) => Entry::Bracketed(key, value.trim()),
            None => Entry::Malformed,
        };
    }

    let ident_len = entry
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(entry.len());
    let ident = &entry[..ident_len];
    if !ident.is_empty() && !ident.starts_with(|c: char| c.is_ascii_digit()) {
        let rest = entry[ident_len..].trim_start();
        if let Some(value) = rest.strip_prefix('=') {
            if !value.starts_with('=') {
                return Entry::Named(ident, value.trim());
            }
        }
    }
    Entry::Positional(entry)
}

fn closing_bracket(rest: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut quote = None;
    for (i, c) in rest.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' if depth == 0 => return Some(i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}
