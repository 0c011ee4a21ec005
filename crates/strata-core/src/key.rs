//! Key composition for namespaced cache entries.
//!
//! A fully-qualified key is the concatenation of a cache name, a namespace
//! and a caller-supplied key, joined by `:`. Each component is escape-encoded
//! before joining so that the composition is injective: two distinct
//! (namespace, key) pairs can never collide on the same full key, no matter
//! which characters the caller used.

use std::fmt;

/// Separator between the escaped components of a full key.
const SEPARATOR: char = ':';

/// Marker introducing an escaped character.
const ESCAPE: char = '%';

/// Characters that are percent-encoded inside a key segment.
///
/// Besides the separator and the escape marker itself, this covers the glob
/// metacharacters understood by Redis `MATCH`, which keeps prefix patterns
/// literal even for hostile caller keys.
fn must_escape(c: char) -> bool {
    matches!(c, '%' | ':' | '*' | '?' | '[' | '\\')
}

/// Escape-encode a single key segment.
#[must_use]
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if must_escape(c) {
            out.push(ESCAPE);
            out.push_str(&format!("{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse [`escape`]. Malformed escape sequences are passed through as-is.
#[must_use]
pub fn unescape(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match (chars.next(), chars.next()) {
            (Some(hi), Some(lo)) => {
                let decoded = u32::from_str_radix(&format!("{hi}{lo}"), 16)
                    .ok()
                    .and_then(char::from_u32);
                match decoded {
                    Some(c) => out.push(c),
                    None => {
                        out.push(ESCAPE);
                        out.push(hi);
                        out.push(lo);
                    }
                }
            }
            (Some(hi), None) => {
                out.push(ESCAPE);
                out.push(hi);
            }
            (None, _) => out.push(ESCAPE),
        }
    }
    out
}

/// A namespace scoping a group of cache keys.
///
/// Namespaces are stored in escaped, composition-ready form. The `disabled`
/// sentinel turns every cache operation that receives it into a pass-through:
/// fetches go straight to the source of truth and writes are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    encoded: String,
    disabled: bool,
}

impl Namespace {
    /// Build a namespace from raw (unescaped) segments.
    pub fn of<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let encoded = segments
            .into_iter()
            .map(|s| escape(s.as_ref()))
            .collect::<Vec<_>>()
            .join(":");
        Self {
            encoded,
            disabled: false,
        }
    }

    /// The empty namespace.
    #[must_use]
    pub fn root() -> Self {
        Self {
            encoded: String::new(),
            disabled: false,
        }
    }

    /// The sentinel namespace that disables caching for an operation.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            encoded: String::new(),
            disabled: true,
        }
    }

    /// Whether this namespace carries the caching-disabled sentinel.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// The escaped, composition-ready form.
    #[must_use]
    pub fn as_encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disabled {
            write!(f, "<disabled>")
        } else {
            f.write_str(&self.encoded)
        }
    }
}

/// A caller-supplied logical key, kept in raw form until composition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-qualified cache key: `{cache}:{namespace}:{key}`, all escaped.
///
/// This is the only key form the tiers ever see.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullKey(String);

impl FullKey {
    /// Compose a full key from a cache name, namespace and caller key.
    #[must_use]
    pub fn compose(cache: &str, namespace: &Namespace, key: &ResourceKey) -> Self {
        let mut out = escape(cache);
        out.push(SEPARATOR);
        out.push_str(namespace.as_encoded());
        out.push(SEPARATOR);
        out.push_str(&escape(key.as_str()));
        Self(out)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for FullKey {
    fn from(encoded: String) -> Self {
        Self(encoded)
    }
}

impl fmt::Display for FullKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A namespace-style prefix selecting a group of keys for bulk eviction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sector {
    encoded: String,
}

impl Sector {
    /// Build a sector from raw (unescaped) segments. An empty segment list
    /// selects every key of the cache.
    pub fn of<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let encoded = segments
            .into_iter()
            .map(|s| escape(s.as_ref()))
            .collect::<Vec<_>>()
            .join(":");
        Self { encoded }
    }

    #[must_use]
    pub fn as_encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// A segment-aligned prefix pattern over full keys.
///
/// Matching is always on whole segments: the sector `a` covers `a:b:k` but
/// never keys under a namespace that merely starts with `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    prefix: String,
}

impl KeyPattern {
    /// Pattern covering every key of `cache` under `sector`.
    #[must_use]
    pub fn for_sector(cache: &str, sector: &Sector) -> Self {
        let mut prefix = escape(cache);
        prefix.push(SEPARATOR);
        if !sector.as_encoded().is_empty() {
            prefix.push_str(sector.as_encoded());
            prefix.push(SEPARATOR);
        }
        Self { prefix }
    }

    #[must_use]
    pub fn matches(&self, key: &FullKey) -> bool {
        key.as_str().starts_with(&self.prefix)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The pattern in Redis `MATCH` syntax. Escaping guarantees the prefix
    /// itself contains no glob metacharacters.
    #[must_use]
    pub fn as_match_expr(&self) -> String {
        format!("{}*", self.prefix)
    }
}
