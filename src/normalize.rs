//! Canonicalisation of navigation URLs into cache keys.

use std::fmt;

use serde::{Serialize, Serializer};
use url::Url;

/// An http(s) URL with its fragment removed.  Only [`normalize`] can build
/// one, so holding a value means the gate has already been passed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for NormalizedUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Normalize a raw navigation URL.  Returns `None` for absent or empty input,
/// anything that does not parse as an absolute URL, and schemes other than
/// `http` and `https` (browser internals, extension pages, `data:` and so on).
pub fn normalize(raw: Option<&str>) -> Option<NormalizedUrl> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut parsed = Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_fragment(None);
    Some(NormalizedUrl(parsed.into()))
}
