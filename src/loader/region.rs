use std::{io, ptr};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS,
};

use crate::{Error, Result};

/// A reserved-and-committed virtual memory region holding a manually mapped image.
///
/// The region descriptor is the owning handle for the memory: base, span, and the
/// lifetime policy. That policy is *intentionally never released* - mapped code may be
/// executing or referenced for the remaining lifetime of the process, and there is no
/// unload operation in this crate. Dropping the descriptor drops bookkeeping only.
#[derive(Debug)]
pub struct MappedRegion {
    base: usize,
    size: usize,
}

impl MappedRegion {
    /// Reserves `size` bytes of free address space with no access rights, then commits
    /// the region with read/write/execute rights.
    ///
    /// The two-step reserve-then-commit follows the memory manager's contract; execute
    /// rights are requested up front because the mapped code runs in place.
    ///
    /// # Errors
    /// Returns [`crate::Error::Os`] carrying the failing call and the OS error when
    /// either step fails. A failed commit leaves the reservation behind; consistent
    /// with the never-released policy, no rollback is attempted.
    pub fn reserve_commit(size: usize) -> Result<Self> {
        let reserved =
            unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS) };
        if reserved.is_null() {
            return Err(Error::Os {
                call: "VirtualAlloc(MEM_RESERVE)",
                source: io::Error::last_os_error(),
            });
        }

        let committed =
            unsafe { VirtualAlloc(reserved, size, MEM_COMMIT, PAGE_EXECUTE_READWRITE) };
        if committed.is_null() {
            return Err(Error::Os {
                call: "VirtualAlloc(MEM_COMMIT)",
                source: io::Error::last_os_error(),
            });
        }

        Ok(MappedRegion {
            base: committed as usize,
            size,
        })
    }

    /// Returns the region's base address.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the region's size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the committed region as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must be the only writer for the duration of the borrow. The loader
    /// upholds this by populating the region before the owning [`crate::Library`] is
    /// ever shared.
    pub(crate) unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base as *mut u8, self.size)
    }
}
