//! Readers turning grammar and theme documents into `serde_json::Value` trees.
//!
//! Both readers can annotate every object with a `$textmateLocation` entry holding the
//! filename, line and column where the object starts. That location is what ends up in
//! errors such as unresolved includes.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{Error, OcraResult, SourceLocation};

mod json;
mod plist;

/// The key under which object locations are stored
pub const LOCATION_KEY: &str = "$textmateLocation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    /// XML property lists, eg `.tmLanguage` or `.tmTheme` files
    Plist,
}

impl DocumentFormat {
    /// Picks the format from the file extension, `None` if it's not one we know.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "plist" | "tmlanguage" | "tmtheme" | "xml" => Some(DocumentFormat::Plist),
            _ => None,
        }
    }
}

/// Parses a document.
///
/// If `location` is set, it's used as the filename of the `$textmateLocation` entries added to
/// every object.
pub fn parse_document(
    content: &str,
    format: DocumentFormat,
    location: Option<&str>,
) -> OcraResult<Value> {
    match (format, location) {
        (DocumentFormat::Json, None) => Ok(serde_json::from_str(content)?),
        (DocumentFormat::Json, Some(filename)) => json::parse(content, Some(filename)),
        (DocumentFormat::Plist, filename) => plist::parse(content, filename),
    }
}

/// Reads and parses a file. The format is taken from the extension when not given, defaulting
/// to JSON.
pub fn parse_document_file<P: AsRef<Path>>(
    path: P,
    format: Option<DocumentFormat>,
    with_location: bool,
) -> OcraResult<Value> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let format = format
        .or_else(|| DocumentFormat::from_path(path))
        .unwrap_or(DocumentFormat::Json);
    let filename = path.display().to_string();
    parse_document(&content, format, with_location.then_some(filename.as_str()))
}

/// Reads the `$textmateLocation` entry of an object, if there is one
pub fn location_of(value: &Map<String, Value>) -> Option<SourceLocation> {
    let loc = value.get(LOCATION_KEY)?.as_object()?;
    Some(SourceLocation {
        filename: loc.get("filename")?.as_str()?.to_string(),
        line: loc.get("line")?.as_u64()? as usize,
        char: loc.get("char")?.as_u64()? as usize,
    })
}

fn location_value(filename: &str, line: usize, char: usize) -> Value {
    let mut loc = Map::new();
    loc.insert("filename".to_string(), Value::String(filename.to_string()));
    loc.insert("line".to_string(), Value::from(line));
    loc.insert("char".to_string(), Value::from(char));
    Value::Object(loc)
}

/// Tracks the position in the input, lines and columns are 1-based
#[derive(Debug)]
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    char: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        // BOM
        let pos = if input.starts_with('\u{feff}') { 3 } else { 0 };
        Self {
            input,
            pos,
            line: 1,
            char: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.char = 1;
        } else {
            self.char += 1;
        }
        Some(c)
    }

    /// Advances by `n` bytes, which must end on a char boundary
    fn advance(&mut self, n: usize) {
        let target = self.pos + n;
        while self.pos < target {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Document {
            message: message.into(),
            line: self.line,
            column: self.char,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_detect_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path("a/b/js.tmLanguage.json"),
            Some(DocumentFormat::Json)
        );
        assert_eq!(
            DocumentFormat::from_path("Monokai.tmTheme"),
            Some(DocumentFormat::Plist)
        );
        assert_eq!(
            DocumentFormat::from_path("grammar.PLIST"),
            Some(DocumentFormat::Plist)
        );
        assert_eq!(DocumentFormat::from_path("grammar.yaml"), None);
        assert_eq!(DocumentFormat::from_path("grammar"), None);
    }

    #[test]
    fn both_formats_give_the_same_value() {
        let json = parse_document(
            r#"{"name": "x", "patterns": [{"match": "a&b", "n": 1, "f": 1.5, "t": true}]}"#,
            DocumentFormat::Json,
            None,
        )
        .unwrap();
        let plist = parse_document(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>name</key><string>x</string>
  <!-- a comment -->
  <key>patterns</key>
  <array>
    <dict>
      <key>match</key><string>a&amp;b</string>
      <key>n</key><integer>1</integer>
      <key>f</key><real>1.5</real>
      <key>t</key><true/>
    </dict>
  </array>
</dict>
</plist>"#,
            DocumentFormat::Plist,
            None,
        )
        .unwrap();
        assert_eq!(json, plist);
    }

    #[test]
    fn can_read_location() {
        let value = parse_document(
            "{\n  \"a\": {\"b\": 1}\n}",
            DocumentFormat::Json,
            Some("g.json"),
        )
        .unwrap();
        let inner = value["a"].as_object().unwrap();
        assert_eq!(
            location_of(inner),
            Some(SourceLocation {
                filename: "g.json".to_string(),
                line: 2,
                char: 8,
            })
        );
        assert_eq!(location_of(value.as_object().unwrap()).unwrap().line, 1);
    }
}
