use std::collections::HashMap;

use crate::error::{Error, OcraResult};
use crate::themes::color::parse_css_var;

/// The key a color is registered under.
///
/// Hex colors are upper-cased, CSS variables use their upper-cased fallback when they have
/// one so `var(--fg, #abc)` and `#ABC` share an id.
fn normalize(color: &str) -> String {
    if let Some((_, fallback)) = parse_css_var(color) {
        return match fallback {
            Some(f) if f.starts_with('#') => f.to_ascii_uppercase(),
            _ => color.to_string(),
        };
    }
    if color.starts_with('#') {
        color.to_ascii_uppercase()
    } else {
        color.to_string()
    }
}

/// Bidirectional table between color strings and the small ids stored in token attributes.
///
/// Id `0` is reserved to mean "not set".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMap {
    frozen: bool,
    /// id -> color as registered
    colors: Vec<String>,
    /// normalized color -> id
    ids: HashMap<String, u32>,
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorMap {
    /// An empty map that allocates ids as colors are seen
    pub fn new() -> Self {
        Self {
            frozen: false,
            colors: vec![String::new()],
            ids: HashMap::new(),
        }
    }

    /// A map limited to `palette`: `palette[i]` gets the id `i + 1` and unknown colors are
    /// an error.
    pub fn frozen<S: AsRef<str>>(palette: &[S]) -> Self {
        let mut map = Self::new();
        for color in palette {
            let color = color.as_ref();
            let key = normalize(color);
            if map.ids.contains_key(&key) {
                continue;
            }
            let id = map.colors.len() as u32;
            map.colors.push(normalized_value(color));
            map.ids.insert(key, id);
        }
        map.frozen = true;
        map
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the id for that color, allocating one if the map is not frozen.
    pub fn id(&mut self, color: &str) -> OcraResult<u32> {
        let key = normalize(color);
        if let Some(id) = self.ids.get(&key) {
            return Ok(*id);
        }
        if self.frozen {
            return Err(Error::MissingColor(color.to_string()));
        }

        let id = self.colors.len() as u32;
        self.colors.push(normalized_value(color));
        self.ids.insert(key, id);
        Ok(id)
    }

    /// Same as [`ColorMap::id`] but fails when the id is above `max`, the largest value the
    /// attribute field storing it can hold.
    pub fn id_at_most(&mut self, color: &str, max: u32) -> OcraResult<u32> {
        let id = self.id(color)?;
        if id > max {
            return Err(Error::ColorIdOverflow {
                color: color.to_string(),
                id,
                max,
            });
        }
        Ok(id)
    }

    /// Id of an already registered color
    pub fn lookup(&self, color: &str) -> Option<u32> {
        self.ids.get(&normalize(color)).copied()
    }

    /// The color for that id, `None` for `0` or unknown ids
    pub fn color(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.colors.get(id as usize).map(|s| s.as_str())
    }

    /// All colors indexed by id, index 0 being an empty string
    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    /// Number of registered colors
    pub fn len(&self) -> usize {
        self.colors.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What we store: hex colors are upper-cased, anything else is kept verbatim
fn normalized_value(color: &str) -> String {
    if color.starts_with('#') {
        color.to_ascii_uppercase()
    } else {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_ids_starting_at_one() {
        let mut map = ColorMap::new();
        assert_eq!(map.id("#ffffff").unwrap(), 1);
        assert_eq!(map.id("#000000").unwrap(), 2);
        assert_eq!(map.id("#FFFFFF").unwrap(), 1);
        assert_eq!(map.colors(), &["", "#FFFFFF", "#000000"]);
        assert_eq!(map.color(0), None);
        assert_eq!(map.color(2), Some("#000000"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn css_vars_are_keyed_by_their_fallback() {
        let mut map = ColorMap::new();
        let id = map.id("var(--ocra-fg, #a492ea)").unwrap();
        assert_eq!(map.id("#A492EA").unwrap(), id);
        assert_eq!(map.color(id), Some("var(--ocra-fg, #a492ea)"));

        let no_fallback = map.id("var(--ocra-bg)").unwrap();
        assert_ne!(no_fallback, id);
        assert_eq!(map.color(no_fallback), Some("var(--ocra-bg)"));
    }

    #[test]
    fn frozen_maps_do_not_allocate() {
        let mut map = ColorMap::frozen(&["#111111", "#222222"]);
        assert!(map.is_frozen());
        assert_eq!(map.id("#111111").unwrap(), 1);
        assert_eq!(map.id("#222222").unwrap(), 2);
        assert!(matches!(map.id("#333333"), Err(Error::MissingColor(c)) if c == "#333333"));
        assert_eq!(map.lookup("#333333"), None);
        assert_eq!(map.colors().len(), 3);
    }

    #[test]
    fn rejects_ids_above_the_limit() {
        let mut map = ColorMap::new();
        for i in 0..3 {
            map.id_at_most(&format!("#00000{i}"), 3).unwrap();
        }
        assert_eq!(map.id_at_most("#000001", 3).unwrap(), 2);
        assert!(matches!(
            map.id_at_most("#000009", 3),
            Err(Error::ColorIdOverflow { id: 4, max: 3, .. })
        ));
    }
}
