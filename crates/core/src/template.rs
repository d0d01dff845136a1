use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn token_pattern() -> &'static Regex {
    TOKEN_PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("token pattern is valid")
    })
}

/// Replace every `{{identifier}}` token with the bound variable value, or the
/// empty string when unbound. Purely textual: no recursive expansion and no
/// escaping syntax, so a rendered value containing `{{...}}` is left alone.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    token_pattern()
        .replace_all(template, |captures: &Captures<'_>| {
            variables.get(&captures[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
