//! Image references from the structure of rendered manifests.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// YAML truthiness: missing, null, `false`, `""` and empty collections are
/// all "unset" as far as chart values are concerned.
fn is_set(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Sequence(s)) => !s.is_empty(),
        Some(Value::Mapping(m)) => !m.is_empty(),
        Some(_) => true,
    }
}

fn collect_from_mapping(map: &Mapping, images: &mut BTreeSet<String>) {
    let get_str = |k: &str| map.get(k).and_then(Value::as_str);

    let repository = map.get("repository");
    if let Some(image) = get_str("image") {
        if !is_set(repository) && !image.is_empty() {
            images.insert(image.to_string());
        }
    }

    if let Some(repo) = repository.and_then(Value::as_str) {
        let full = match get_str("image") {
            Some(image) => format!("{repo}/{image}"),
            None => repo.to_string(),
        };
        let tag = if is_set(map.get("tag")) {
            map.get("tag")
        } else {
            map.get("version")
        }
        .and_then(Value::as_str);
        let digest = get_str("digest");

        match (tag, digest) {
            (Some(tag), _) if !tag.is_empty() => {
                images.insert(format!("{full}:{tag}"));
            }
            (_, Some(digest)) if !digest.is_empty() => {
                images.insert(format!("{full}@{digest}"));
            }
            (None, None) => {}
            _ => {
                images.insert(full);
            }
        }
    }
}

fn traverse(value: &Value, images: &mut BTreeSet<String>) {
    match value {
        Value::Mapping(map) => {
            collect_from_mapping(map, images);
            for v in map.values() {
                traverse(v, images);
            }
        }
        Value::Sequence(seq) => {
            for v in seq {
                traverse(v, images);
            }
        }
        Value::Tagged(tagged) => traverse(&tagged.value, images),
        _ => {}
    }
}

/// Walk every document of a rendered manifest stream and collect image
/// references from its fields:
///
/// - a string `image` in a mapping without a `repository`
/// - `repository` (joined with `image` if present) plus `tag`/`version`
///   or `digest`
///
/// Documents that fail to parse are skipped with a warning.
pub fn images_from_yaml(manifest: &str) -> BTreeSet<String> {
    let mut images = BTreeSet::new();
    let mut docs = 0usize;
    for document in serde_yaml::Deserializer::from_str(manifest) {
        match Value::deserialize(document) {
            Ok(Value::Null) => {}
            Ok(value) => {
                docs += 1;
                traverse(&value, &mut images);
            }
            Err(e) => tracing::warn!("Skipping unparsable manifest document: {e}"),
        }
    }
    tracing::info!(
        "Processed {docs} manifest documents, found {} unique images",
        images.len()
    );
    images
}
