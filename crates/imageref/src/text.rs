//! Finding fully qualified image references anywhere in free text.
//!
//! This complements the field walk in [`crate::images_from_yaml`]: images
//! passed through env values, quoted strings or config blobs only show up
//! as text. A reference counts only when its registry host is in the
//! configured list, so bare words like `nginx` are never picked up here.

use std::collections::BTreeSet;

use regex::Regex;

/// Registries searched in free text when nothing else is configured.
pub const DEFAULT_TEXT_REGISTRIES: &[&str] = &[
    "docker.io",
    "quay.io",
    "gcr.io",
    "registry.k8s.io",
    "ghcr.io",
    "nvcr.io",
    "public.ecr.aws",
];

/// Environment variable holding a comma-separated list of extra registries
/// for the free-text scan.
pub const TEXT_REGISTRIES_ENV: &str = "CLI_ONPREM_REGISTRIES";

/// Tag assumed when a reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// What may precede a reference: start of text, whitespace, a quote or `=`.
const LEADING: &str = r#"(?:^|[\s"'=])"#;
/// One or more lowercase path components after the registry.
const PATH: &str = r"([a-z0-9_-]+(?:/[a-z0-9_-]+)*)";
/// An optional `:tag` or `@sha256:<64 hex>`.
const SUFFIX: &str = r"(?::([a-z0-9_.-]+)|@(sha256:[a-f0-9]{64}))?";
/// What must follow a reference: end of text, whitespace or a quote.
const TRAILING: &str = r#"(?:$|[\s"'])"#;

/// The default registries followed by `extra`, with blanks dropped.
pub fn text_registries<I>(extra: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    DEFAULT_TEXT_REGISTRIES
        .iter()
        .map(|s| s.to_string())
        .chain(extra.into_iter().map(Into::into))
        .filter(|r| !r.trim().is_empty())
        .collect()
}

fn build_pattern(registries: &[String]) -> Result<Regex, regex::Error> {
    let hosts = registries
        .iter()
        .map(|r| regex::escape(r.trim()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){LEADING}((?:{hosts}))/{PATH}{SUFFIX}{TRAILING}"))
}

/// Extract `registry/path[:tag|@digest]` references to one of `registries`
/// from `text`. A missing tag becomes [`DEFAULT_TAG`]. Results are distinct
/// and sorted.
///
/// Matches consume their trailing delimiter, so two references separated
/// by a single space are both found only if each has its own boundary.
pub fn extract_images_from_text(
    text: &str,
    registries: &[String],
) -> Result<Vec<String>, regex::Error> {
    if registries.is_empty() {
        return Ok(Vec::new());
    }
    let re = build_pattern(registries)?;
    let mut found = BTreeSet::new();
    for caps in re.captures_iter(text) {
        let (Some(registry), Some(path)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let base = format!("{}/{}", registry.as_str(), path.as_str());
        let image = match (caps.get(3), caps.get(4)) {
            (_, Some(digest)) => format!("{base}@{}", digest.as_str()),
            (Some(tag), None) => format!("{base}:{}", tag.as_str()),
            (None, None) => format!("{base}:{DEFAULT_TAG}"),
        };
        tracing::trace!("Found text image: {image}");
        found.insert(image);
    }
    tracing::debug!("Found {} images in text", found.len());
    Ok(found.into_iter().collect())
}
