use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Color {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> OcraResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    pub(crate) const DARK_FG_FALLBACK: &'static str = "#BBBBBB";
    pub(crate) const DARK_BG_FALLBACK: &'static str = "#1E1E1E";
    pub(crate) const LIGHT_FG_FALLBACK: &'static str = "#333333";
    pub(crate) const LIGHT_BG_FALLBACK: &'static str = "#FFFFFE";

    /// Outputs the hex value for that colour.
    #[inline]
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Creates a Color from a `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA` string.
    ///
    /// Errors if the string is not a valid hex colour.
    pub fn from_hex(hex: &str) -> OcraResult<Self> {
        let original = hex;
        let Some(hex) = hex.strip_prefix('#') else {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "missing '#' prefix".to_string(),
            });
        };
        if !hex.is_ascii() {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "non ASCII characters".to_string(),
            });
        }

        match hex.len() {
            3 | 4 => {
                let mut components = [255u8; 4];
                for (i, c) in components.iter_mut().enumerate().take(hex.len()) {
                    *c = parse_hex_component(&hex[i..i + 1], original)? * 17;
                }
                let [r, g, b, a] = components;
                Ok(Color { r, g, b, a })
            }
            6 | 8 => {
                let mut components = [255u8; 4];
                for (i, c) in components.iter_mut().enumerate().take(hex.len() / 2) {
                    *c = parse_hex_component(&hex[i * 2..i * 2 + 2], original)?;
                }
                let [r, g, b, a] = components;
                Ok(Color { r, g, b, a })
            }
            _ => Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

/// Splits `var(--name, #fallback)` into its name and optional fallback.
pub(crate) fn parse_css_var(value: &str) -> Option<(&str, Option<&str>)> {
    let inner = value.trim().strip_prefix("var(")?.strip_suffix(')')?;
    match inner.split_once(',') {
        Some((name, fallback)) => Some((name.trim(), Some(fallback.trim()))),
        None => Some((inner.trim(), None)),
    }
}

/// Whether a theme color value can be used: a hex color or a CSS variable.
pub(crate) fn is_valid_color(value: &str) -> bool {
    if let Some((name, fallback)) = parse_css_var(value) {
        return name.starts_with("--") && fallback.is_none_or(|f| Color::from_hex(f).is_ok());
    }
    Color::from_hex(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_hex_colors() {
        let inputs = vec![
            ("#F00", (255, 0, 0, 255)),
            ("#369", (51, 102, 153, 255)),
            ("#0008", (0, 0, 0, 136)),
            ("#FFFA", (255, 255, 255, 170)),
            ("#ff0000", (255, 0, 0, 255)),
            ("#A492EA", (164, 146, 234, 255)),
            ("#00FF0080", (0, 255, 0, 128)),
        ];

        for (input, (r, g, b, a)) in inputs {
            assert_eq!(
                Color::from_hex(input).unwrap(),
                Color { r, g, b, a },
                "{input}"
            );
        }
    }

    #[test]
    fn can_output_hex() {
        assert_eq!(Color::from_hex("#a492ea").unwrap().as_hex(), "#A492EA");
        assert_eq!(Color::from_hex("#0008").unwrap().as_hex(), "#00000088");
    }

    #[test]
    fn error_on_invalid_format() {
        for input in ["", "#", "F00", "#GGG", "#12345", "#1234567890", "#é12"] {
            assert!(Color::from_hex(input).is_err(), "{input}");
        }
    }

    #[test]
    fn can_validate_theme_colors() {
        assert!(is_valid_color("#fff"));
        assert!(is_valid_color("var(--ocra-fg)"));
        assert!(is_valid_color("var(--ocra-fg, #A492EA)"));
        assert!(!is_valid_color("var(--ocra-fg, red)"));
        assert!(!is_valid_color("var(ocra)"));
        assert!(!is_valid_color("inherit"));
        assert!(!is_valid_color("red"));
    }

    #[test]
    fn can_parse_css_vars() {
        assert_eq!(
            parse_css_var("var(--a, #FFF)"),
            Some(("--a", Some("#FFF")))
        );
        assert_eq!(parse_css_var("var(--a)"), Some(("--a", None)));
        assert_eq!(parse_css_var("#FFF"), None);
    }
}
