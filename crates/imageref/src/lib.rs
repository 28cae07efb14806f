//! # Container image references
//!
//! Syntactic handling of container image references as they show up on
//! the command line and in rendered Kubernetes manifests:
//!
//! - [`ImageReference`] splits `[registry/][namespace/]image[:tag]` into its
//!   parts and derives a tar filename from them.
//! - [`extract_images_from_args`] finds references embedded in
//!   `--flag=registry/path:tag` style tokens.
//! - [`images_from_yaml`] walks manifest documents for `image:` and
//!   `repository:`/`tag:` fields.
//! - [`extract_images_from_text`] finds references to known registries
//!   anywhere in free text.
//! - [`normalize_image_name`] canonicalizes a reference to its fully
//!   qualified form.
//!
//! Nothing here talks to a registry or validates that an image exists.

mod extract;
mod manifest;
mod normalize;
mod reference;
mod text;

pub use extract::*;
pub use manifest::*;
pub use normalize::*;
pub use reference::*;
pub use text::*;
