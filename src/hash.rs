//! Pluggable export-name hashing.
//!
//! Every resolution entry point in this crate identifies a function by a *digest* of its
//! exported name rather than the name itself, so the obfuscation strategy stays in the
//! caller's hands. The strategy is modelled as the [`crate::hash::NameHash`] capability:
//! one operation, `digest`, turning a name into an opaque string. Any `Fn(&str) -> String`
//! closure implements it, and [`crate::hash::Sha1Hash`] is the reference implementation
//! (lowercase SHA-1 hex, the encoding every embedded digest constant in this crate uses).
//!
//! Digest comparison throughout the crate is ASCII-case-insensitive, so digests may be
//! supplied in either hex casing.

use sha1::{Digest, Sha1};
use std::fmt::Write;

/// Capability for turning an exported name into a lookup digest.
///
/// Implementations must be pure: the same name must always produce the same digest,
/// since digests are index keys and cache keys.
///
/// # Examples
///
/// ```rust
/// use sysgate::NameHash;
///
/// // Any closure works, including a no-op "identity digest" for testing.
/// let identity = |name: &str| name.to_string();
/// assert_eq!(identity.digest("NtOpenFile"), "NtOpenFile");
/// ```
pub trait NameHash {
    /// Computes the digest of `name`.
    fn digest(&self, name: &str) -> String;
}

impl<F> NameHash for F
where
    F: Fn(&str) -> String,
{
    fn digest(&self, name: &str) -> String {
        self(name)
    }
}

/// SHA-1 name digest, rendered as 40 lowercase hex characters.
///
/// This is the digest scheme the crate's own internal resolutions use; the constants
/// embedded in [`crate::unhook`] are SHA-1 digests of lowercased NT export names.
///
/// # Examples
///
/// ```rust
/// use sysgate::{NameHash, Sha1Hash};
///
/// assert_eq!(
///     Sha1Hash.digest("ntcreatefile"),
///     "ac19c01d8c27c421e0b8a7960ae6bad2f84f0ce5"
/// );
/// ```
pub struct Sha1Hash;

impl NameHash for Sha1Hash {
    fn digest(&self, name: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());

        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            // Infallible for String targets.
            let _ = write!(out, "{byte:02x}");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_digest_matches_known_values() {
        // Digests of lowercased NT export names, as embedded by the unhook module.
        assert_eq!(
            Sha1Hash.digest("ntcreatesection"),
            "747d342b80e4c1c9d4d3dcb4ee2da24dcce27801"
        );
        assert_eq!(
            Sha1Hash.digest("zwmapviewofsection"),
            "da39da04447a22b747ac8e86b4773bbd6ea96f9b"
        );
    }

    #[test]
    fn sha1_digest_is_lowercase_hex() {
        let digest = Sha1Hash.digest("NtOpenProcess");
        assert_eq!(digest.len(), 40);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn closures_implement_name_hash() {
        let upper = |name: &str| name.to_uppercase();
        assert_eq!(upper.digest("abc"), "ABC");
    }
}
