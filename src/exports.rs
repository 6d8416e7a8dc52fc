//! Hashed export indexing and lookup.
//!
//! Callers identify functions by a digest of the exported name, but they cannot know
//! which casing of the name was hashed on their side. [`crate::exports::ExportIndex`]
//! resolves that ambiguity at build time: for every export `(name, rva)` it stores both
//! `H(name)` and `H(lowercase(name))` against the same RVA, so a digest of either
//! spelling hits. The dual-casing entries are part of the type's contract, not an
//! implementation detail.
//!
//! Index keys are normalized to lowercase and lookups normalize the same way, making
//! digest comparison case-insensitive everywhere. [`crate::exports::find_export`] is the
//! one-shot variant used where no index is kept around: a linear scan applying the same
//! dual-casing, case-insensitive match.

use std::collections::HashMap;

use crate::{hash::NameHash, image::Image, Error, Result};

/// Mapping from export-name digests to relative virtual addresses.
///
/// Built once per loaded image and read-only afterwards. Every export is indexed under
/// the digest of its exact-case name and of its lowercased name; several names (and
/// therefore several digests) may map to one RVA.
///
/// # Examples
///
/// ```rust
/// use sysgate::{ExportIndex, NameHash, Sha1Hash};
///
/// let exports = vec![("NtOpenFile".to_string(), 0x2000)];
/// let index = ExportIndex::build(&exports, 0x10000, &Sha1Hash)?;
///
/// // Digests of either casing resolve.
/// let base = 0x7ff8_0000_0000usize;
/// assert_eq!(index.lookup(&Sha1Hash.digest("NtOpenFile"), base)?, base + 0x2000);
/// assert_eq!(index.lookup(&Sha1Hash.digest("ntopenfile"), base)?, base + 0x2000);
/// # Ok::<(), sysgate::Error>(())
/// ```
#[derive(Debug)]
pub struct ExportIndex {
    entries: HashMap<String, u32>,
}

impl ExportIndex {
    /// Builds an index over `exports` using `hasher`.
    ///
    /// # Arguments
    /// * `exports`       - `(name, rva)` pairs, e.g. from [`Image::exported`]
    /// * `size_of_image` - mapped span of the image; every RVA must fall inside it
    /// * `hasher`        - the name-digest capability
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if any export's RVA lies outside
    /// `[0, size_of_image)`, since `base + rva` would then point outside the mapped
    /// region.
    pub fn build<H: NameHash + ?Sized>(
        exports: &[(String, u32)],
        size_of_image: u32,
        hasher: &H,
    ) -> Result<Self> {
        let mut entries = HashMap::with_capacity(exports.len() * 2);

        for (name, rva) in exports {
            if *rva >= size_of_image {
                return Err(malformed_error!(
                    "Export {} lies outside the image - {:#x} >= {:#x}",
                    name,
                    rva,
                    size_of_image
                ));
            }

            entries.insert(hasher.digest(name).to_ascii_lowercase(), *rva);
            entries.insert(
                hasher.digest(&name.to_lowercase()).to_ascii_lowercase(),
                *rva,
            );
        }

        Ok(ExportIndex { entries })
    }

    /// Returns the RVA recorded for `digest`, comparing case-insensitively.
    #[must_use]
    pub fn get(&self, digest: &str) -> Option<u32> {
        self.entries.get(&digest.to_ascii_lowercase()).copied()
    }

    /// Resolves `digest` against a base address.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportNotFound`] when no entry matches.
    pub fn lookup(&self, digest: &str, base: usize) -> Result<usize> {
        self.get(digest)
            .map(|rva| base + rva as usize)
            .ok_or_else(|| Error::ExportNotFound(digest.to_string()))
    }

    /// Returns the number of index entries.
    ///
    /// Usually twice the export count; less when casings collide (already-lowercase
    /// names produce one entry).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scans `image`'s exports for the first one whose digest matches.
///
/// Applies the same dual-casing rule as [`ExportIndex`]: the digest of the exact-case
/// name and of the lowercased name are both candidates, compared case-insensitively.
///
/// # Errors
/// Returns [`crate::Error::ExportNotFound`] when no export matches.
pub fn find_export<H: NameHash + ?Sized>(
    image: &Image,
    digest: &str,
    hasher: &H,
) -> Result<(u32, String)> {
    for (name, rva) in image.exported() {
        if hasher.digest(&name).eq_ignore_ascii_case(digest)
            || hasher
                .digest(&name.to_lowercase())
                .eq_ignore_ascii_case(digest)
        {
            return Ok((rva, name));
        }
    }

    Err(Error::ExportNotFound(digest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha1Hash;

    fn sample() -> Vec<(String, u32)> {
        vec![
            ("NtOpenFile".to_string(), 0x2000),
            ("NtClose".to_string(), 0x2040),
        ]
    }

    #[test]
    fn both_casings_resolve_to_the_same_address() {
        let index = ExportIndex::build(&sample(), 0x10000, &Sha1Hash).unwrap();

        let base = 0x1000_0000usize;
        let exact = index.lookup(&Sha1Hash.digest("NtOpenFile"), base).unwrap();
        let lowered = index.lookup(&Sha1Hash.digest("ntopenfile"), base).unwrap();

        assert_eq!(exact, base + 0x2000);
        assert_eq!(lowered, base + 0x2000);
    }

    #[test]
    fn digest_casing_does_not_matter() {
        let index = ExportIndex::build(&sample(), 0x10000, &Sha1Hash).unwrap();
        let digest = Sha1Hash.digest("NtClose").to_uppercase();

        assert_eq!(index.get(&digest), Some(0x2040));
    }

    #[test]
    fn miss_is_a_distinct_not_found() {
        let index = ExportIndex::build(&sample(), 0x10000, &Sha1Hash).unwrap();
        let result = index.lookup(&Sha1Hash.digest("NtOpenProcess"), 0x1000);

        assert!(matches!(result.unwrap_err(), Error::ExportNotFound(_)));
    }

    #[test]
    fn identity_hasher_scenario() {
        // The caller supplies the digest scheme; an identity "hash" keys the index by
        // plain names, both spellings.
        let identity = |name: &str| name.to_string();
        let exports = vec![("Foo".to_string(), 0x2000)];
        let index = ExportIndex::build(&exports, 0x4000, &identity).unwrap();

        let base = 0x14000000usize;
        assert_eq!(index.lookup("Foo", base).unwrap(), base + 0x2000);
        assert_eq!(index.lookup("foo", base).unwrap(), base + 0x2000);
        assert!(index.lookup("Bar", base).is_err());
    }

    #[test]
    fn export_outside_image_bounds_is_rejected() {
        let exports = vec![("Stray".to_string(), 0x5000)];
        let result = ExportIndex::build(&exports, 0x4000, &Sha1Hash);

        assert!(matches!(result.unwrap_err(), Error::Malformed { .. }));
    }
}
