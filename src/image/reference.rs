//! Parsing and normalization of container image references.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A parsed container image reference: `repository[:tag][@sha256:<hex>]`.
///
/// The repository may carry a registry host with an optional port as its
/// first path component (`registry.example:5000/team/ocr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Full repository, including any registry host prefix.
    pub repository: String,
    /// Declared tag, if any.
    pub tag: Option<String>,
    /// Declared content digest, if any.
    pub digest: Option<String>,
}

impl ImageRef {
    /// True when the reference already names a content digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

impl FromStr for ImageRef {
    type Err = RegistryError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RegistryError::InvalidImageReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.trim().is_empty() {
            return Err(invalid("reference is empty"));
        }

        // Split off the digest first; '@' is not legal anywhere else.
        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(invalid("digest must be 'sha256:' followed by 64 hex characters"));
                }
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to
        // a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match rest[last_slash..].find(':') {
            Some(offset) => {
                let split = last_slash + offset;
                let tag = &rest[split + 1..];
                if !is_valid_tag(tag) {
                    return Err(invalid("tag contains invalid characters"));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }
        if let Some(reason) = repository_error(repository) {
            return Err(invalid(&reason));
        }

        Ok(ImageRef {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn is_valid_digest(digest: &str) -> bool {
    digest
        .strip_prefix("sha256:")
        .is_some_and(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_valid_tag(tag: &str) -> bool {
    if tag.is_empty() || tag.len() > 128 {
        return false;
    }
    let mut chars = tag.chars();
    let first = chars.next().unwrap_or(' ');
    (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Validate repository syntax; `None` means valid.
fn repository_error(repository: &str) -> Option<String> {
    let mut components = repository.split('/');
    // The first component may be a registry host with a port.
    let host = components.next().unwrap_or("");
    let host_name = host.split_once(':').map_or(host, |(name, port)| {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return "";
        }
        name
    });
    if host_name.is_empty() || !is_valid_component(host_name) {
        return Some(format!("invalid repository component '{}'", host));
    }
    for component in components {
        if !is_valid_component(component) {
            return Some(format!("invalid repository component '{}'", component));
        }
    }
    None
}

fn is_valid_component(component: &str) -> bool {
    if component.is_empty() {
        return false;
    }
    let inner_ok =
        |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-');
    let first = component.chars().next().unwrap_or(' ');
    let last = component.chars().next_back().unwrap_or(' ');
    (first.is_ascii_lowercase() || first.is_ascii_digit())
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && component.chars().all(inner_ok)
}

/// A normalized, pin-verified image reference.
///
/// Produced by the resolver as a point-in-time snapshot: the digest is what
/// the runtime reported at resolution time and never changes for this value.
/// The original tag is kept alongside so later tag drift is detectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImageRef {
    /// Full repository, including any registry host prefix.
    pub repository: String,
    /// Tag the reference was declared with, if any.
    pub tag: Option<String>,
    /// Content digest the image was pinned to. Always present.
    pub digest: String,
    /// When the digest was obtained from the runtime.
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedImageRef {
    /// The pinned reference in `repository@digest` form, the only form the
    /// sandbox should be handed.
    pub fn pinned(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }
}

impl std::fmt::Display for ResolvedImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pinned())
    }
}
