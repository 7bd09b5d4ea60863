use serde_json::{Map, Value};

use super::{Cursor, LOCATION_KEY, location_value};
use crate::error::OcraResult;

/// Reads an XML property list: `dict`, `array`, `key`, `string`, `integer`, `real`, `true`,
/// `false`. `date` and `data` are kept as strings.
pub(super) fn parse(input: &str, filename: Option<&str>) -> OcraResult<Value> {
    let mut cursor = Cursor::new(input);
    skip_misc(&mut cursor)?;

    let Some(tag) = read_tag(&mut cursor)? else {
        return Err(cursor.error("empty document"));
    };
    let value = if tag.name == "plist" && !tag.closing {
        if tag.self_closing {
            return Err(cursor.error("empty plist"));
        }
        skip_misc(&mut cursor)?;
        let Some(inner) = read_tag(&mut cursor)? else {
            return Err(cursor.error("expected a value in plist"));
        };
        let value = parse_value(&mut cursor, inner, filename)?;
        skip_misc(&mut cursor)?;
        expect_close(&mut cursor, "plist")?;
        value
    } else {
        parse_value(&mut cursor, tag, filename)?
    };

    skip_misc(&mut cursor)?;
    if !cursor.is_eof() {
        return Err(cursor.error("trailing content after the plist"));
    }
    Ok(value)
}

#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    line: usize,
    char: usize,
}

/// Skips whitespace, comments, processing instructions and doctypes
fn skip_misc(cursor: &mut Cursor) -> OcraResult<()> {
    loop {
        cursor.skip_whitespace();
        let rest = cursor.rest();
        let end_marker = if rest.starts_with("<!--") {
            "-->"
        } else if rest.starts_with("<?") {
            "?>"
        } else if rest.starts_with("<!") && !rest.starts_with("<![CDATA[") {
            ">"
        } else {
            return Ok(());
        };
        match rest.find(end_marker) {
            Some(pos) => cursor.advance(pos + end_marker.len()),
            None => return Err(cursor.error(format!("missing '{end_marker}'"))),
        }
    }
}

fn read_tag(cursor: &mut Cursor) -> OcraResult<Option<Tag>> {
    if cursor.is_eof() {
        return Ok(None);
    }
    if cursor.peek() != Some('<') {
        return Err(cursor.error("expected a tag"));
    }
    let (line, char) = (cursor.line, cursor.char);
    let Some(end) = cursor.rest().find('>') else {
        return Err(cursor.error("unterminated tag"));
    };
    let inner = &cursor.rest()[1..end];
    let closing = inner.starts_with('/');
    let self_closing = inner.ends_with('/');
    let inner = inner.trim_start_matches('/').trim_end_matches('/');
    let name = inner
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_string();
    cursor.advance(end + 1);

    Ok(Some(Tag {
        name,
        closing,
        self_closing,
        line,
        char,
    }))
}

fn expect_close(cursor: &mut Cursor, name: &str) -> OcraResult<()> {
    match read_tag(cursor)? {
        Some(tag) if tag.closing && tag.name == name => Ok(()),
        Some(tag) => Err(cursor.error(format!(
            "expected </{name}>, found <{}{}>",
            if tag.closing { "/" } else { "" },
            tag.name
        ))),
        None => Err(cursor.error(format!("expected </{name}>"))),
    }
}

fn parse_value(cursor: &mut Cursor, tag: Tag, filename: Option<&str>) -> OcraResult<Value> {
    if tag.closing {
        return Err(cursor.error(format!("unexpected </{}>", tag.name)));
    }

    match tag.name.as_str() {
        "dict" => {
            let mut out = Map::new();
            if let Some(filename) = filename {
                out.insert(
                    LOCATION_KEY.to_string(),
                    location_value(filename, tag.line, tag.char),
                );
            }
            if tag.self_closing {
                return Ok(Value::Object(out));
            }
            loop {
                skip_misc(cursor)?;
                let Some(key_tag) = read_tag(cursor)? else {
                    return Err(cursor.error("unterminated dict"));
                };
                if key_tag.closing && key_tag.name == "dict" {
                    break;
                }
                if key_tag.name != "key" || key_tag.closing {
                    return Err(cursor.error(format!("expected <key>, found <{}>", key_tag.name)));
                }
                let key = if key_tag.self_closing {
                    String::new()
                } else {
                    read_text(cursor, "key")?
                };
                skip_misc(cursor)?;
                let Some(value_tag) = read_tag(cursor)? else {
                    return Err(cursor.error(format!("missing value for key '{key}'")));
                };
                let value = parse_value(cursor, value_tag, filename)?;
                out.insert(key, value);
            }
            Ok(Value::Object(out))
        }
        "array" => {
            let mut out = Vec::new();
            if tag.self_closing {
                return Ok(Value::Array(out));
            }
            loop {
                skip_misc(cursor)?;
                let Some(item_tag) = read_tag(cursor)? else {
                    return Err(cursor.error("unterminated array"));
                };
                if item_tag.closing && item_tag.name == "array" {
                    break;
                }
                out.push(parse_value(cursor, item_tag, filename)?);
            }
            Ok(Value::Array(out))
        }
        "true" | "false" => {
            let value = tag.name == "true";
            if !tag.self_closing {
                expect_close(cursor, &tag.name)?;
            }
            Ok(Value::Bool(value))
        }
        "string" | "date" | "data" => {
            if tag.self_closing {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(read_text(cursor, &tag.name)?))
        }
        "integer" => {
            let text = if tag.self_closing {
                String::new()
            } else {
                read_text(cursor, "integer")?
            };
            text.trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| cursor.error(format!("invalid integer '{text}'")))
        }
        "real" => {
            let text = if tag.self_closing {
                String::new()
            } else {
                read_text(cursor, "real")?
            };
            text.trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| cursor.error(format!("invalid real '{text}'")))
        }
        other => Err(cursor.error(format!("unknown plist element <{other}>"))),
    }
}

/// Reads the text up to the closing tag, decoding entities and CDATA sections
fn read_text(cursor: &mut Cursor, name: &str) -> OcraResult<String> {
    let close = format!("</{name}>");
    let mut out = String::new();

    loop {
        let rest = cursor.rest();
        if rest.is_empty() {
            return Err(cursor.error(format!("missing {close}")));
        }
        if rest.starts_with(&close) {
            cursor.advance(close.len());
            return Ok(out);
        }
        if let Some(cdata) = rest.strip_prefix("<![CDATA[") {
            let Some(end) = cdata.find("]]>") else {
                return Err(cursor.error("unterminated CDATA section"));
            };
            out.push_str(&cdata[..end]);
            cursor.advance("<![CDATA[".len() + end + 3);
            continue;
        }
        if rest.starts_with("<!--") {
            skip_misc(cursor)?;
            continue;
        }
        if rest.starts_with('<') {
            return Err(cursor.error(format!("unexpected tag inside <{name}>")));
        }
        if rest.starts_with('&') {
            let Some(end) = rest.find(';') else {
                return Err(cursor.error("unterminated entity"));
            };
            let entity = &rest[1..end];
            let decoded = decode_entity(entity)
                .ok_or_else(|| cursor.error(format!("unknown entity '&{entity};'")))?;
            out.push(decoded);
            cursor.advance(end + 1);
            continue;
        }

        let len = rest.find(['<', '&']).unwrap_or(rest.len());
        out.push_str(&rest[..len]);
        cursor.advance(len);
    }
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn can_read_plists() {
        let value = parse(
            r#"<plist version="1.0">
<dict>
    <key>begin</key>
    <string><![CDATA[<a>]]> &#x41;&#66; &lt;b&gt;</string>
    <key>empty</key>
    <string/>
    <key>list</key>
    <array>
        <false/>
        <integer>-3</integer>
        <dict/>
    </array>
</dict>
</plist>"#,
            Some("x.tmLanguage"),
        )
        .unwrap();

        assert_eq!(value["begin"], "<a> AB <b>");
        assert_eq!(value["empty"], "");
        assert_eq!(value["list"][0], false);
        assert_eq!(value["list"][1], -3);
        assert_eq!(value["list"][2][LOCATION_KEY]["line"], 11);
        assert_eq!(value["list"][2][LOCATION_KEY]["char"], 9);
        assert_eq!(value[LOCATION_KEY]["line"], 2);
        assert_eq!(value[LOCATION_KEY]["filename"], "x.tmLanguage");
    }

    #[test]
    fn rejects_invalid_plists() {
        for input in [
            "<plist><dict><key>a</key></dict></plist>",
            "<plist><dict><string>a</string></dict></plist>",
            "<plist><integer>abc</integer></plist>",
            "<plist><string>&nope;</string></plist>",
            "<plist><array><string>a</string></plist>",
            "",
        ] {
            assert!(
                matches!(parse(input, None), Err(Error::Document { .. })),
                "{input}"
            );
        }
    }
}
