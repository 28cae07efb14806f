//! Finding image references embedded in command-line-argument-style tokens.
//!
//! Charts often pass sidecar images as flags, e.g.
//! `--prometheus-config-reloader=quay.io/prometheus-operator/prometheus-config-reloader:v0.81.0`,
//! which never show up as an `image:` field. This is a best-effort scanner,
//! not a YAML or shell parser: it looks for `<pattern>/<token>` where the
//! pattern is a known registry host and the token is delimited by the
//! boundary characters below.

use std::collections::BTreeSet;

/// Registries recognized in argument tokens when nothing else is configured.
pub const DEFAULT_REGISTRY_PATTERNS: &[&str] = &[
    "quay.io",
    "docker.io",
    "registry.k8s.io",
    "gcr.io",
    "ghcr.io",
    "mcr.microsoft.com",
];

/// Environment variable holding a comma-separated list of extra registry
/// patterns.
pub const REGISTRY_PATTERNS_ENV: &str = "CLI_ONPREM_REGISTRY_PATTERNS";

/// Characters that may directly precede an embedded reference. `=` covers
/// both `--name=` and `-name=`.
pub const LEADING_BOUNDARY: &[char] = &['=', '"', '\''];

/// A reference may also follow this character plus at least one whitespace
/// character, as in a YAML mapping value (`image: quay.io/app:v1`).
pub const MAPPING_VALUE_MARKER: char = ':';

/// Characters (besides whitespace) that end a reference token.
pub const TOKEN_TERMINATORS: &[char] = &['=', '"', '\''];

/// Characters (besides whitespace and end of input) that must directly
/// follow a reference token for it to count.
pub const TRAILING_BOUNDARY: &[char] = &['"', '\''];

/// The ordered list of registry patterns used for one extraction.
///
/// Patterns are literal, case-sensitive host (or host prefix) strings.
/// Duplicates are harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPatterns(Vec<String>);

impl Default for RegistryPatterns {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>(), std::iter::empty::<String>())
    }
}

impl RegistryPatterns {
    /// The built-in defaults, followed by `extra` (typically from the command
    /// line), followed by `overrides` (typically from
    /// [`REGISTRY_PATTERNS_ENV`]). Empty patterns are dropped.
    pub fn new<I, J>(extra: I, overrides: J) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        let patterns = DEFAULT_REGISTRY_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .chain(extra.into_iter().map(Into::into))
            .chain(overrides.into_iter().map(Into::into))
            .filter(|p| !p.is_empty())
            .collect();
        Self(patterns)
    }

    /// Split a comma-separated override list, trimming entries and
    /// discarding empty ones.
    pub fn parse_override_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// The effective patterns, in order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

fn is_token_terminator(c: char) -> bool {
    c.is_whitespace() || TOKEN_TERMINATORS.contains(&c)
}

/// Whether the text right before a candidate ends in a leading boundary.
fn preceded_by_boundary(before: &str) -> bool {
    let mut rev = before.chars().rev();
    match rev.next() {
        Some(c) if LEADING_BOUNDARY.contains(&c) => true,
        Some(c) if c.is_whitespace() => {
            rev.find(|c| !c.is_whitespace()) == Some(MAPPING_VALUE_MARKER)
        }
        _ => false,
    }
}

/// Whether the text right after a token is a trailing boundary.
fn followed_by_boundary(after: &str) -> bool {
    match after.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || TRAILING_BOUNDARY.contains(&c),
    }
}

/// Collect every `pattern/<token>` occurrence in `text` that sits between
/// valid boundaries.
fn scan_pattern(text: &str, pattern: &str, found: &mut BTreeSet<String>) {
    let needle = format!("{pattern}/");
    for (start, _) in text.match_indices(needle.as_str()) {
        if !preceded_by_boundary(&text[..start]) {
            continue;
        }
        let token_start = start + needle.len();
        let rest = &text[token_start..];
        let token_len = rest.find(is_token_terminator).unwrap_or(rest.len());
        if token_len == 0 || !followed_by_boundary(&rest[token_len..]) {
            continue;
        }
        let image = &text[start..token_start + token_len];
        tracing::trace!("Found argument image: {image}");
        found.insert(image.to_string());
    }
}

/// Extract image references that appear as argument values in `text`.
///
/// Returns the distinct matches across all patterns, sorted.
pub fn extract_images_from_args(text: &str, patterns: &RegistryPatterns) -> Vec<String> {
    tracing::debug!("Registry patterns: {}", patterns.as_slice().join(", "));
    let mut found = BTreeSet::new();
    for pattern in patterns.as_slice() {
        scan_pattern(text, pattern, &mut found);
    }
    tracing::debug!("Found {} images in arguments", found.len());
    found.into_iter().collect()
}
