use serde_json::{Map, Value};

use super::{Cursor, LOCATION_KEY, location_value};
use crate::error::OcraResult;

/// A JSON reader annotating objects with their location.
///
/// Only used when locations are requested, serde_json is used directly otherwise.
pub(super) fn parse(input: &str, filename: Option<&str>) -> OcraResult<Value> {
    let mut cursor = Cursor::new(input);
    cursor.skip_whitespace();
    let value = parse_value(&mut cursor, filename)?;
    cursor.skip_whitespace();
    if !cursor.is_eof() {
        return Err(cursor.error("trailing characters after the document"));
    }
    Ok(value)
}

fn parse_value(cursor: &mut Cursor, filename: Option<&str>) -> OcraResult<Value> {
    match cursor.peek() {
        Some('{') => parse_object(cursor, filename),
        Some('[') => parse_array(cursor, filename),
        Some('"') => Ok(Value::String(parse_string(cursor)?)),
        Some('t') => parse_literal(cursor, "true", Value::Bool(true)),
        Some('f') => parse_literal(cursor, "false", Value::Bool(false)),
        Some('n') => parse_literal(cursor, "null", Value::Null),
        Some(c) if c == '-' || c.is_ascii_digit() => parse_number(cursor),
        Some(c) => Err(cursor.error(format!("unexpected character '{c}'"))),
        None => Err(cursor.error("unexpected end of document")),
    }
}

fn parse_literal(cursor: &mut Cursor, literal: &str, value: Value) -> OcraResult<Value> {
    if cursor.rest().starts_with(literal) {
        cursor.advance(literal.len());
        Ok(value)
    } else {
        Err(cursor.error(format!("expected '{literal}'")))
    }
}

fn parse_number(cursor: &mut Cursor) -> OcraResult<Value> {
    let len = cursor
        .rest()
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
        .unwrap_or(cursor.rest().len());
    let raw = &cursor.rest()[..len];
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| cursor.error(format!("invalid number '{raw}'")))?;
    cursor.advance(len);
    Ok(value)
}

/// Finds the end of the string literal and lets serde_json handle the escapes
fn parse_string(cursor: &mut Cursor) -> OcraResult<String> {
    let rest = cursor.rest();
    let mut escaped = false;
    let mut end = None;
    for (i, c) in rest.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => {
                end = Some(i + 1);
                break;
            }
            _ => (),
        }
    }
    let Some(end) = end else {
        return Err(cursor.error("unterminated string"));
    };

    let s: String = serde_json::from_str(&rest[..end])
        .map_err(|e| cursor.error(format!("invalid string: {e}")))?;
    cursor.advance(end);
    Ok(s)
}

fn parse_array(cursor: &mut Cursor, filename: Option<&str>) -> OcraResult<Value> {
    cursor.bump();
    let mut out = Vec::new();
    cursor.skip_whitespace();
    if cursor.peek() == Some(']') {
        cursor.bump();
        return Ok(Value::Array(out));
    }

    loop {
        cursor.skip_whitespace();
        out.push(parse_value(cursor, filename)?);
        cursor.skip_whitespace();
        match cursor.bump() {
            Some(',') => continue,
            Some(']') => break,
            _ => return Err(cursor.error("expected ',' or ']' in array")),
        }
    }

    Ok(Value::Array(out))
}

fn parse_object(cursor: &mut Cursor, filename: Option<&str>) -> OcraResult<Value> {
    let (line, char) = (cursor.line, cursor.char);
    cursor.bump();
    let mut out = Map::new();
    if let Some(filename) = filename {
        out.insert(LOCATION_KEY.to_string(), location_value(filename, line, char));
    }

    cursor.skip_whitespace();
    if cursor.peek() == Some('}') {
        cursor.bump();
        return Ok(Value::Object(out));
    }

    loop {
        cursor.skip_whitespace();
        if cursor.peek() != Some('"') {
            return Err(cursor.error("expected a string key"));
        }
        let key = parse_string(cursor)?;
        cursor.skip_whitespace();
        if cursor.peek() != Some(':') {
            return Err(cursor.error("expected ':' after object key"));
        }
        cursor.bump();
        cursor.skip_whitespace();
        let value = parse_value(cursor, filename)?;
        out.insert(key, value);
        cursor.skip_whitespace();
        match cursor.bump() {
            Some(',') => continue,
            Some('}') => break,
            _ => return Err(cursor.error("expected ',' or '}' in object")),
        }
    }

    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn matches_serde_json_without_location() {
        let input = r#"{"a": [1, -2.5e3, "x\"é\\", true, false, null, {}], "b": {"c": []}}"#;
        let expected: Value = serde_json::from_str(input).unwrap();
        assert_eq!(parse(input, None).unwrap(), expected);
    }

    #[test]
    fn annotates_every_object() {
        let value = parse("[{\"a\": 1},\n {}]", Some("f")).unwrap();
        assert_eq!(value[0][LOCATION_KEY]["line"], 1);
        assert_eq!(value[0][LOCATION_KEY]["char"], 2);
        assert_eq!(value[1][LOCATION_KEY]["line"], 2);
        assert_eq!(value[1][LOCATION_KEY]["char"], 2);
        assert_eq!(value[1][LOCATION_KEY]["filename"], "f");
    }

    #[test]
    fn reports_error_position() {
        let err = parse("{\n  \"a\" 1}", None).unwrap_err();
        assert!(
            matches!(err, Error::Document { line: 2, column: 7, .. }),
            "{err:?}"
        );
        assert!(parse("{} x", None).is_err());
        assert!(parse("\"abc", None).is_err());
    }
}
