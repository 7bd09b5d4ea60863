use std::borrow::Cow;
use std::fmt;

/// Stands in for inactive anchors: a noncharacter that never appears in source text
const NEVER_MATCHES: &str = "\u{FFFF}";

/// Which of `\A` and `\G` can match at the current position.
///
/// Pattern sets are compiled once per rule and per variant since the regexes differ.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub(crate) enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    /// `\A` only matches on the first line before anything was consumed, `\G` only where the
    /// last begin/while match ended.
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// This follows vscode-textmate and replaces inactive anchors with something that
    /// cannot match
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        let (replace_a, replace_g) = match self {
            AnchorActive::AG => return Cow::Borrowed(pat),
            AnchorActive::A => (false, true),
            AnchorActive::G => (true, false),
            AnchorActive::None => (true, true),
        };

        if !((replace_a && pat.contains("\\A")) || (replace_g && pat.contains("\\G"))) {
            return Cow::Borrowed(pat);
        }

        // Walk the pattern so an escaped backslash followed by A/G is left alone
        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('A') if replace_a => out.push_str(NEVER_MATCHES),
                Some('G') if replace_g => out.push_str(NEVER_MATCHES),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        }
        Cow::Owned(out)
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_active_anchors() {
        assert_eq!(AnchorActive::new(true, Some(3), 3), AnchorActive::AG);
        assert_eq!(AnchorActive::new(true, None, 0), AnchorActive::A);
        assert_eq!(AnchorActive::new(false, Some(3), 3), AnchorActive::G);
        assert_eq!(AnchorActive::new(false, Some(2), 3), AnchorActive::None);
    }

    #[test]
    fn replaces_inactive_anchors() {
        let pat = r"\A#!|\G\s+|\\G";
        assert!(matches!(
            AnchorActive::AG.replace_anchors(pat),
            Cow::Borrowed(_)
        ));
        assert_eq!(
            AnchorActive::A.replace_anchors(pat),
            "\\A#!|\u{FFFF}\\s+|\\\\G"
        );
        assert_eq!(
            AnchorActive::G.replace_anchors(pat),
            "\u{FFFF}#!|\\G\\s+|\\\\G"
        );
        assert_eq!(
            AnchorActive::None.replace_anchors(pat),
            "\u{FFFF}#!|\u{FFFF}\\s+|\\\\G"
        );
        assert!(matches!(
            AnchorActive::None.replace_anchors(r"\w+"),
            Cow::Borrowed(_)
        ));
    }
}
