//! Parsing of `[registry/][namespace/]image[:tag]` references.

use std::fmt;

use serde::Serialize;

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";
/// Namespace assumed when a reference names none.
pub const DEFAULT_NAMESPACE: &str = "library";
/// Tag assumed when a reference names none.
pub const DEFAULT_TAG: &str = "latest";
/// Platform pulled when the user does not ask for one.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// A container image reference split into its components.
///
/// Parsing is purely syntactic and never fails; missing components take
/// the Docker Hub defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageReference {
    registry: String,
    namespace: String,
    image: String,
    tag: String,
}

/// Heuristic for "this path segment is a host[:port]".
fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}

impl ImageReference {
    /// Parse a raw reference of the shape `[registry/][namespace/]image[:tag]`.
    ///
    /// The tag is whatever follows the last colon, unless that text contains
    /// a `/`, in which case the colon belongs to a `host:port` registry and
    /// the reference carries no tag.
    pub fn parse(raw: &str) -> Self {
        let (path, tag) = match raw.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (raw, DEFAULT_TAG),
        };

        let parts: Vec<&str> = path.split('/').collect();
        let (registry, namespace, image) = match parts.as_slice() {
            [first, name] if looks_like_host(first) => (*first, DEFAULT_NAMESPACE, name.to_string()),
            [ns, name] => (DEFAULT_REGISTRY, *ns, name.to_string()),
            [reg, ns, rest @ ..] if !rest.is_empty() => (*reg, *ns, rest.join("/")),
            _ => (DEFAULT_REGISTRY, DEFAULT_NAMESPACE, path.to_string()),
        };

        Self {
            registry: registry.to_string(),
            namespace: namespace.to_string(),
            image,
            tag: tag.to_string(),
        }
    }

    /// The registry host, including any port.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The namespace (organization or user).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The image name; may itself contain `/` for deeply nested paths.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// The tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The tar filename under which this image is saved for `arch`.
    pub fn tar_filename(&self, arch: Arch) -> String {
        tar_filename(
            &self.registry,
            &self.namespace,
            &self.image,
            &self.tag,
            arch.as_str(),
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.namespace, self.image, self.tag
        )
    }
}

/// Build `[registry__][namespace__]image__tag__arch.tar`.
///
/// The registry part is omitted for Docker Hub and the namespace part for
/// `library`. Any `/` in a field becomes `_` so the result is a single path
/// component.
pub fn tar_filename(registry: &str, namespace: &str, image: &str, tag: &str, arch: &str) -> String {
    let flat = |s: &str| s.replace('/', "_");
    let registry = flat(registry);
    let namespace = flat(namespace);

    let mut name = String::new();
    if registry != DEFAULT_REGISTRY {
        name.push_str(&registry);
        name.push_str("__");
    }
    if namespace != DEFAULT_NAMESPACE {
        name.push_str(&namespace);
        name.push_str("__");
    }
    name.push_str(&format!(
        "{}__{}__{}.tar",
        flat(image),
        flat(tag),
        flat(arch)
    ));
    name
}

/// The CPU architectures images can be pulled and saved for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64
    #[default]
    Amd64,
    /// aarch64
    Arm64,
}

/// A platform whose architecture we do not handle.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported platform {0:?}: only linux/amd64 and linux/arm64 are supported")]
pub struct UnsupportedArch(pub String);

impl Arch {
    /// Parse a platform string such as `linux/arm64` (or a bare `arm64`).
    /// Only the component after the last `/` is considered.
    pub fn from_platform(platform: &str) -> Result<Self, UnsupportedArch> {
        let arch = platform.rsplit('/').next().unwrap_or(platform);
        match arch {
            "amd64" => Ok(Self::Amd64),
            "arm64" => Ok(Self::Arm64),
            _ => Err(UnsupportedArch(platform.to_string())),
        }
    }

    /// The bare architecture name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    /// The `os/arch` platform string passed to the container engine.
    pub fn platform(&self) -> String {
        format!("linux/{}", self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
