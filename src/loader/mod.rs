//! Manual image mapping.
//!
//! [`crate::loader::load_image`] performs the steps the platform loader would, by hand:
//! gate on architecture width, reserve and commit an RWX region sized to the image, copy
//! headers and section data into place, write the COFF symbol blob where the header
//! points, apply base relocation fixups for the placement delta, and index the exports
//! by digest. The result is a [`crate::loader::Library`]: a name, a base address, and a
//! hashed export index. Imports are deliberately not resolved; this maps a single,
//! self-contained system library, not an arbitrary dependency graph.
//!
//! The region behind a `Library` is never released (see
//! [`crate::loader::region::MappedRegion`]); a failed load can likewise leave its
//! region behind, which the same policy covers.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sysgate::{loader, NameHash, Sha1Hash};
//!
//! let ntdll = loader::load_ntdll(&Sha1Hash)?;
//! let close = ntdll.find_proc(&Sha1Hash.digest("NtClose"))?;
//! println!("manually mapped NtClose at {close:#x}");
//! # Ok::<(), sysgate::Error>(())
//! ```

/// The owning descriptor for reserved-and-committed image regions.
pub mod region;

use obfstr::obfstr;

use crate::{
    exports::ExportIndex,
    hash::NameHash,
    image::{Image, HOST_WIDTH},
    reloc::{collect_fixups, FixupKind},
    windir,
    Error, Result,
};
use region::MappedRegion;

/// A manually mapped library: base address plus hashed export index.
///
/// Produced by [`load_image`]; lives, together with its backing region, until process
/// exit. The name is informational only.
pub struct Library {
    name: String,
    region: MappedRegion,
    exports: ExportIndex,
}

impl Library {
    /// Returns the informational name given to this library.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the base address the image was mapped at.
    #[must_use]
    pub fn base(&self) -> usize {
        self.region.base()
    }

    /// Returns the hashed export index built during the load.
    #[must_use]
    pub fn exports(&self) -> &ExportIndex {
        &self.exports
    }

    /// Resolves `digest` to an absolute address inside this mapping.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportNotFound`] when no export matches.
    pub fn find_proc(&self, digest: &str) -> Result<usize> {
        self.exports.lookup(digest, self.base())
    }
}

/// Manually maps the image in `bytes` into the current process.
///
/// # Arguments
/// * `bytes`  - raw bytes of the image file
/// * `hasher` - digest capability used to key the export index
///
/// # Errors
///
/// - [`crate::Error::ArchMismatch`] when the image's bit-width disagrees with the
///   process's; checked before any memory is reserved
/// - parse errors from the image model, [`crate::Error::Os`] from the memory calls,
///   and [`crate::Error::Malformed`] when headers, sections or exports contradict the
///   region they must land in
pub fn load_image<H: NameHash + ?Sized>(bytes: &[u8], hasher: &H) -> Result<Library> {
    let image = Image::from_mem(bytes.to_vec())?;

    if !image.matches_host() {
        return Err(Error::ArchMismatch {
            image_width: image.width(),
            host_width: HOST_WIDTH,
        });
    }

    let size_of_image = image.size_of_image()? as usize;
    if size_of_image == 0 {
        return Err(malformed_error!("Image declares a SizeOfImage of zero"));
    }

    let region = MappedRegion::reserve_commit(size_of_image)?;
    copy_image(&image, &region)?;
    apply_fixups(&image, &region)?;

    let exports = ExportIndex::build(&image.exported(), size_of_image as u32, hasher)?;

    Ok(Library {
        name: String::new(),
        region,
        exports,
    })
}

/// Reads ntdll from the system directory and manually maps it.
///
/// # Errors
/// Propagates the file read and every [`load_image`] condition.
pub fn load_ntdll<H: NameHash + ?Sized>(hasher: &H) -> Result<Library> {
    let bytes = std::fs::read(windir::system32(obfstr!("ntdll.dll")))?;

    let mut library = load_image(&bytes, hasher)?;
    library.name = obfstr!("ntdll").to_string();

    Ok(library)
}

/// Copies headers, section data and the COFF symbol blob into the committed region.
fn copy_image(image: &Image, region: &MappedRegion) -> Result<()> {
    let destination = unsafe { region.as_mut_slice() };
    let source = image.data();

    let headers = image.size_of_headers()? as usize;
    if headers > source.len() || headers > destination.len() {
        return Err(malformed_error!(
            "SizeOfHeaders {:#x} exceeds the image bytes or the mapped region",
            headers
        ));
    }
    destination[..headers].copy_from_slice(&source[..headers]);

    for section in image.sections() {
        let raw_size = section.size_of_raw_data as usize;
        if raw_size == 0 {
            continue;
        }

        let source_offset = section.pointer_to_raw_data as usize;
        let destination_offset = section.virtual_address as usize;
        if source_offset + raw_size > source.len() {
            return Err(malformed_error!(
                "Section at RVA {:#x} reads past the image bytes",
                section.virtual_address
            ));
        }

        // Trailing file-alignment padding of the last section may poke past
        // SizeOfImage; clamp to the region like the platform loader does.
        let copy = raw_size.min(destination.len().saturating_sub(destination_offset));
        destination[destination_offset..destination_offset + copy]
            .copy_from_slice(&source[source_offset..source_offset + copy]);
    }

    // The symbol and string tables live past the mapped span for typical linked
    // libraries (the pointer is a file offset); only materialize them when they fit.
    if let Some((pointer, blob)) = image.symbol_table()? {
        let offset = pointer as usize;
        if offset + blob.len() <= destination.len() {
            destination[offset..offset + blob.len()].copy_from_slice(blob);
        }
    }

    Ok(())
}

/// Applies base relocation fixups against the region's placement delta.
fn apply_fixups(image: &Image, region: &MappedRegion) -> Result<()> {
    let delta = (region.base() as u64).wrapping_sub(image.preferred_base());
    if delta == 0 {
        return Ok(());
    }

    let destination = unsafe { region.as_mut_slice() };
    let is_64 = image.is_64();

    for fixup in collect_fixups(image)? {
        let offset = fixup.rva as usize;
        match fixup.kind {
            FixupKind::Dir64 if is_64 => {
                if offset + 8 <= destination.len() {
                    let value = u64::from_le_bytes([
                        destination[offset],
                        destination[offset + 1],
                        destination[offset + 2],
                        destination[offset + 3],
                        destination[offset + 4],
                        destination[offset + 5],
                        destination[offset + 6],
                        destination[offset + 7],
                    ]);
                    destination[offset..offset + 8]
                        .copy_from_slice(&value.wrapping_add(delta).to_le_bytes());
                }
            }
            FixupKind::HighLow => {
                if offset + 4 <= destination.len() {
                    let value = u32::from_le_bytes([
                        destination[offset],
                        destination[offset + 1],
                        destination[offset + 2],
                        destination[offset + 3],
                    ]);
                    destination[offset..offset + 4]
                        .copy_from_slice(&value.wrapping_add(delta as u32).to_le_bytes());
                }
            }
            FixupKind::Dir64 => {}
        }
    }

    Ok(())
}
