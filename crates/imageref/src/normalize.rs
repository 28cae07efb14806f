//! Canonical, fully qualified image names.

use crate::reference::{DEFAULT_NAMESPACE, DEFAULT_REGISTRY, DEFAULT_TAG};

/// Whether the first path segment names a registry host.
fn is_domain(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Expand an image name to `host/[namespace/]repo(:tag|@digest)`.
///
/// - no host means Docker Hub; a single-segment Docker Hub name gets the
///   `library` namespace
/// - no tag means `latest`
/// - a digest wins over a tag
///
/// ```
/// use onprem_imageref::normalize_image_name;
/// assert_eq!(normalize_image_name("nginx"), "docker.io/library/nginx:latest");
/// assert_eq!(normalize_image_name("nvcr.io/nvidia"), "nvcr.io/nvidia:latest");
/// ```
pub fn normalize_image_name(image: &str) -> String {
    let (name, digest) = match image.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (image, None),
    };

    let (name, tag) = match name.rsplit_once(':') {
        Some((n, t)) if !t.contains('/') => (n, t),
        _ => (name, DEFAULT_TAG),
    };

    let mut normalized = match name.split_once('/') {
        Some((first, _)) if is_domain(first) => name.to_string(),
        Some(_) => format!("{DEFAULT_REGISTRY}/{name}"),
        None => format!("{DEFAULT_REGISTRY}/{DEFAULT_NAMESPACE}/{name}"),
    };

    match digest {
        Some(digest) => {
            normalized.push('@');
            normalized.push_str(digest);
        }
        None => {
            normalized.push(':');
            normalized.push_str(tag);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let cases = [
            ("nginx", "docker.io/library/nginx:latest"),
            ("nginx:1.25", "docker.io/library/nginx:1.25"),
            ("user/repo", "docker.io/user/repo:latest"),
            ("user/repo:v2", "docker.io/user/repo:v2"),
            ("nvcr.io/nvidia", "nvcr.io/nvidia:latest"),
            ("nvcr.io/nvidia/cuda", "nvcr.io/nvidia/cuda:latest"),
            ("localhost/app", "localhost/app:latest"),
            ("reg:5000/app", "reg:5000/app:latest"),
            ("reg:5000/app:v1", "reg:5000/app:v1"),
            (
                "docker.io/library/nginx:latest",
                "docker.io/library/nginx:latest",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_image_name(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_normalize_digest() {
        let digest = "sha256:".to_string() + &"a".repeat(64);
        assert_eq!(
            normalize_image_name(&format!("nginx@{digest}")),
            format!("docker.io/library/nginx@{digest}")
        );
        // The tag is dropped when pinned by digest
        assert_eq!(
            normalize_image_name(&format!("quay.io/org/app:v1@{digest}")),
            format!("quay.io/org/app@{digest}")
        );
    }
}
