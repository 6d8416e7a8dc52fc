//! Base relocation fixup collection.
//!
//! When an image lands at an address other than its preferred base, every absolute
//! address embedded in its code and data must be shifted by the same delta. The
//! positions of those addresses are recorded in the base relocation directory as blocks
//! of 16-bit entries, one block per 4 KiB page: a block header (page RVA + block size)
//! followed by entries carrying the fixup kind in the top nibble and the page offset in
//! the low twelve bits.
//!
//! [`crate::reloc::collect_fixups`] walks that directory and yields the flattened fixup
//! list; applying the delta against a mapped region is the loader's job, keeping this
//! walk pure and testable on any platform.

use crate::{image::Image, Result};

/// No-op relocation, used for padding to maintain alignment.
const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
/// 32-bit address fixup (add delta to DWORD at offset).
const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
/// 64-bit address fixup (add delta to QWORD at offset).
const IMAGE_REL_BASED_DIR64: u16 = 10;

/// Width of a single base relocation fixup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixupKind {
    /// 32-bit fixup (`IMAGE_REL_BASED_HIGHLOW`).
    HighLow,
    /// 64-bit fixup (`IMAGE_REL_BASED_DIR64`).
    Dir64,
}

/// A single absolute-address fixup recorded in the relocation directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fixup {
    /// RVA of the absolute address to adjust.
    pub rva: u32,
    /// Width of the adjustment.
    pub kind: FixupKind,
}

/// Collects every 32- and 64-bit fixup recorded in `image`'s base relocation directory.
///
/// Padding entries are dropped and unknown fixup kinds are skipped, matching what the
/// platform loader tolerates. An image without a relocation directory yields an empty
/// list; whether that is acceptable depends on the load delta and is the caller's call.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the directory extends past the image bytes.
pub fn collect_fixups(image: &Image) -> Result<Vec<Fixup>> {
    let Some((dir_rva, dir_size)) = image.base_relocation_directory() else {
        return Ok(Vec::new());
    };

    let mut offset = image.rva_to_offset(dir_rva);
    let end = offset + dir_size as usize;
    let mut fixups = Vec::new();

    while offset + 8 <= end {
        let header = image.data_slice(offset, 8)?;
        let page_rva = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let block_size =
            u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if block_size < 8 || offset + block_size > end {
            break;
        }

        let entries = image.data_slice(offset + 8, block_size - 8)?;
        for chunk in entries.chunks_exact(2) {
            let entry = u16::from_le_bytes([chunk[0], chunk[1]]);
            let kind = entry >> 12;
            let page_offset = u32::from(entry & 0x0FFF);

            match kind {
                IMAGE_REL_BASED_ABSOLUTE => {}
                IMAGE_REL_BASED_HIGHLOW => fixups.push(Fixup {
                    rva: page_rva + page_offset,
                    kind: FixupKind::HighLow,
                }),
                IMAGE_REL_BASED_DIR64 => fixups.push(Fixup {
                    rva: page_rva + page_offset,
                    kind: FixupKind::Dir64,
                }),
                _ => {}
            }
        }

        offset += block_size;
    }

    Ok(fixups)
}
