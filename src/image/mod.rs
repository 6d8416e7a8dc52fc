//! PE image abstraction over pluggable byte sources.
//!
//! Everything this crate does starts from a parsed view of a PE image: the manual mapper
//! reads headers, sections and the symbol table; the export machinery reads the export
//! directory; the syscall resolver translates export RVAs to file offsets and reads stub
//! windows. [`crate::image::Image`] bundles a byte source with the parsed
//! [`goblin::pe::PE`] structure referencing it, so those consumers never touch raw
//! container layout themselves.
//!
//! # Byte sources
//!
//! The [`crate::image::Backend`] trait abstracts where the bytes live:
//!
//! - [`Image::from_file`] - memory-mapped file on disk (the resolver's path; always the
//!   static, unpatched bytes)
//! - [`Image::from_mem`] - an owned buffer (the manual mapper's input)
//! - [`Image::from_raw`] - an already-mapped, image-layout view in the current process
//!   (the disk remapper's output), parsed without RVA-to-offset resolution since section
//!   data already sits at its virtual addresses
//!
//! # Address translation
//!
//! [`Image::rva_to_offset`] walks the section table and maps an RVA into the section
//! that contains it. An RVA claimed by no section is returned unchanged: in the header
//! region, file offsets and RVAs coincide, and export directories occasionally point
//! there.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sysgate::Image;
//!
//! let image = Image::from_file("C:\\Windows\\System32\\ntdll.dll".as_ref())?;
//! println!(
//!     "{} exports, image spans {:#x} bytes when mapped",
//!     image.exported().len(),
//!     image.size_of_image()?
//! );
//! # Ok::<(), sysgate::Error>(())
//! ```

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{options::ParseOptions, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Bit-width of the running process.
pub(crate) const HOST_WIDTH: u32 = if cfg!(target_pointer_width = "64") {
    64
} else {
    32
};

/// Backend trait for image byte sources.
///
/// Abstracts over the place the image bytes live: a memory-mapped file, an owned buffer,
/// or a raw view already mapped into the process. All access is bounds-checked; the
/// parsed PE structure borrows from the backend for the lifetime of the [`Image`].
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// Read-only view over memory this process already mapped (e.g. a `SEC_IMAGE` view).
///
/// The pointer is only dereferenced through `data()`, and the views handed to this type
/// are process-lifetime by the crate's resource policy, so the borrow can never outlive
/// the mapping.
struct RawView {
    base: *const u8,
    len: usize,
}

// The view is read-only and never unmapped; sharing the pointer across threads is no
// different from sharing the mapped pages themselves.
unsafe impl Send for RawView {}
unsafe impl Sync for RawView {}

impl Backend for RawView {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(crate::Error::OutOfBounds);
        };

        if offset_end > self.len {
            return Err(crate::Error::OutOfBounds);
        }

        Ok(&self.data()[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, self.len) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[self_referencing]
/// A parsed PE image bound to its byte source.
///
/// This is the crate's rendering of the binary image model: machine width, header sizes,
/// sections, named exports, the COFF symbol blob and RVA translation, with the container
/// byte layout itself delegated to `goblin`. The loader, remapper and resolver all
/// consume images through this type.
pub struct Image {
    /// The underlying byte source.
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image").finish_non_exhaustive()
    }
}

impl Image {
    /// Parses the PE image at `path` via a read-only file mapping.
    ///
    /// This always reflects the static on-disk bytes, independent of whatever copy of
    /// the same library the process loader has resident.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, is empty, or does not
    /// parse as a PE image.
    pub fn from_file(path: &Path) -> Result<Image> {
        let input = Physical::new(path)?;

        Self::load(input, true)
    }

    /// Parses a PE image from an owned byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or does not parse as a PE image.
    pub fn from_mem(data: Vec<u8>) -> Result<Image> {
        let input = Memory::new(data);

        Self::load(input, true)
    }

    /// Parses a PE image from memory the OS image loader (or an image-mode section
    /// mapping) already laid out.
    ///
    /// Section data in such a view sits at its virtual addresses rather than its file
    /// offsets, so the parse skips RVA-to-offset resolution.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `len` readable bytes that stay mapped and unchanged
    /// for the lifetime of the returned image.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero or the view does not parse as a PE image.
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Result<Image> {
        let input = RawView { base, len };

        Self::load(input, false)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T, resolve_rva: bool) -> Result<Image> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        Image::try_new(data, |data| {
            let data = data.as_ref();
            let mut opts = ParseOptions::default();
            opts.resolve_rva = resolve_rva;
            match PE::parse_with_opts(data.data(), &opts) {
                Ok(pe) => {
                    if pe.header.optional_header.is_none() {
                        return Err(malformed_error!("Image does not have an OptionalHeader"));
                    }
                    Ok(pe)
                }
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the total size of the underlying bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the underlying byte source is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` for PE32+ (64-bit) images.
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// Returns the image's bit-width, `32` or `64`.
    #[must_use]
    pub fn width(&self) -> u32 {
        if self.is_64() {
            64
        } else {
            32
        }
    }

    /// Returns `true` when the image's bit-width matches the running process's.
    ///
    /// A 64-bit image cannot be manually mapped into a 32-bit process or vice versa;
    /// the loader gates on this before touching the address space.
    #[must_use]
    pub fn matches_host(&self) -> bool {
        self.width() == HOST_WIDTH
    }

    /// Returns the preferred base address from the optional header.
    #[must_use]
    pub fn preferred_base(&self) -> u64 {
        self.with_pe(|pe| pe.image_base)
    }

    /// Returns the `SizeOfImage` field: the span of the image once mapped.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the optional header is absent.
    pub fn size_of_image(&self) -> Result<u32> {
        self.with_pe(|pe| pe.header.optional_header)
            .map(|oh| oh.windows_fields.size_of_image)
            .ok_or_else(|| malformed_error!("Image does not have an OptionalHeader"))
    }

    /// Returns the `SizeOfHeaders` field: the span of the header region in the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the optional header is absent.
    pub fn size_of_headers(&self) -> Result<u32> {
        self.with_pe(|pe| pe.header.optional_header)
            .map(|oh| oh.windows_fields.size_of_headers)
            .ok_or_else(|| malformed_error!("Image does not have an OptionalHeader"))
    }

    /// Returns an iterator over the image's section headers.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Returns the RVA and size of the base relocation directory, if present and
    /// non-empty.
    #[must_use]
    pub fn base_relocation_directory(&self) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .and_then(|oh| oh.data_directories.get_base_relocation_table())
                .filter(|dir| dir.virtual_address != 0 && dir.size != 0)
                .map(|dir| (dir.virtual_address, dir.size))
        })
    }

    /// Returns the image's named exports as `(name, rva)` pairs.
    ///
    /// Ordinal-only exports carry no name to hash and are skipped. A single RVA may
    /// appear under several names; every spelling is returned.
    #[must_use]
    pub fn exported(&self) -> Vec<(String, u32)> {
        self.with_pe(|pe| {
            pe.exports
                .iter()
                .filter_map(|export| {
                    export
                        .name
                        .map(|name| (name.to_string(), export.rva as u32))
                })
                .collect()
        })
    }

    /// Returns the COFF symbol table offset and the raw symbol-plus-string-table bytes,
    /// or `None` when the image carries no symbol table (the common case for linked
    /// system libraries).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the header-declared table extends past
    /// the underlying bytes.
    pub fn symbol_table(&self) -> Result<Option<(u32, &[u8])>> {
        let (pointer, count) = self.with_pe(|pe| {
            (
                pe.header.coff_header.pointer_to_symbol_table,
                pe.header.coff_header.number_of_symbol_table,
            )
        });

        if pointer == 0 || count == 0 {
            return Ok(None);
        }

        // Symbol records are 18 bytes each; the string table follows immediately and
        // leads with a u32 length that counts itself.
        let symbols_len = count as usize * 18;
        let strings_offset = pointer as usize + symbols_len;
        let strings_header = self.data_slice(strings_offset, 4)?;
        let strings_len = u32::from_le_bytes([
            strings_header[0],
            strings_header[1],
            strings_header[2],
            strings_header[3],
        ]) as usize;

        let total = symbols_len + strings_len.max(4);
        Ok(Some((pointer, self.data_slice(pointer as usize, total)?)))
    }

    /// Converts a relative virtual address to an offset into the underlying bytes.
    ///
    /// The RVA is located by membership in a section's virtual range and shifted by that
    /// section's raw-data pointer. An RVA contained by no section translates to itself:
    /// in the header region, RVAs and file offsets coincide.
    #[must_use]
    pub fn rva_to_offset(&self, rva: u32) -> usize {
        self.with_pe(|pe| {
            for section in &pe.sections {
                let start = section.virtual_address;
                let end = start.saturating_add(section.virtual_size);
                if rva >= start && rva < end {
                    return (rva - start) as usize + section.pointer_to_raw_data as usize;
                }
            }

            rva as usize
        })
    }

    /// Returns the raw bytes of the underlying source.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a bounds-checked slice of the underlying bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(Image::from_mem(Vec::new()).unwrap_err(), Empty));
    }

    #[test]
    fn garbage_input_is_a_parse_error() {
        let result = Image::from_mem(vec![0x00; 128]);
        assert!(matches!(result.unwrap_err(), GoblinErr(_)));
    }
}
