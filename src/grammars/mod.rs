mod compiled;
mod pattern_set;
mod raw;
mod regex;
mod set;

pub use compiled::*;
pub use pattern_set::{PatternSet, PatternSetMatch};
pub use raw::{Captures, RawGrammar, RawRule};
pub use regex::{Regex, has_backreferences, replace_name_captures, resolve_backreferences};
pub use set::{ActiveInjection, BASE_GRAMMAR_ID, GlobalRuleRef, GrammarId, GrammarSet};
pub(crate) use regex::compile as compile_regex;
