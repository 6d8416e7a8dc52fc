//! Live export resolution with a process-wide cache.
//!
//! [`crate::resolve::proc_by_hash`] answers "where does the digest land in the copy of
//! this module the process has resident": the module handle comes from the loader
//! (loading the module on first use if absent), the export RVAs come from the module's
//! on-disk file, and the result is `handle + rva`. Re-deriving the same pointer on
//! every call would be wasteful and subtly wrong if module state changed between calls,
//! so results are cached per `(module, digest)` with explicit invalidation.

use std::io;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use widestring::U16CString;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleExW, LoadLibraryW};

use crate::{exports::find_export, hash::NameHash, image::Image, windir, Error, Result};

/// Cache of live resolutions, keyed by lowercased `(module, digest)`.
static PROC_CACHE: Lazy<DashMap<(String, String), ResolvedProc>> = Lazy::new(DashMap::new);

/// A function address resolved inside a resident module.
#[derive(Clone, Debug)]
pub struct ResolvedProc {
    /// Absolute address of the export in the resident module.
    pub address: usize,
    /// The export's actual name, as spelled in the export table.
    pub name: String,
}

/// Resolves `digest` inside the resident copy of `module`.
///
/// The module is loaded first if the process does not have it resident. Export names
/// and RVAs are read from the module's on-disk file in the system directory, then
/// rebased onto the live module handle. Hits are served from the cache.
///
/// # Errors
///
/// - [`crate::Error::Os`] when the module handle cannot be obtained
/// - file/parse errors from reading the on-disk copy
/// - [`crate::Error::ExportNotFound`] when no export matches the digest
pub fn proc_by_hash<H: NameHash + ?Sized>(
    module: &str,
    digest: &str,
    hasher: &H,
) -> Result<ResolvedProc> {
    let key = (module.to_ascii_lowercase(), digest.to_ascii_lowercase());
    if let Some(hit) = PROC_CACHE.get(&key) {
        return Ok(hit.value().clone());
    }

    let handle = module_handle(module)?;
    let image = Image::from_file(&windir::system32(module))?;
    let (rva, name) = find_export(&image, digest, hasher)?;

    let resolved = ResolvedProc {
        address: handle + rva as usize,
        name,
    };
    PROC_CACHE.insert(key, resolved.clone());

    Ok(resolved)
}

/// Drops the cached resolution for `(module, digest)`, if any.
///
/// Use after anything that can move or restore the module's exports, e.g. a fresh
/// manual re-map of the same library.
pub fn invalidate(module: &str, digest: &str) {
    let _ = PROC_CACHE.remove(&(module.to_ascii_lowercase(), digest.to_ascii_lowercase()));
}

/// Drops every cached resolution.
pub fn invalidate_cache() {
    PROC_CACHE.clear();
}

/// Returns the base address of the resident `module`, loading it if necessary.
fn module_handle(module: &str) -> Result<usize> {
    let wide = U16CString::from_str(module)
        .map_err(|_| malformed_error!("Module name contains an interior NUL: {}", module))?;

    let mut handle = 0;
    let found = unsafe { GetModuleHandleExW(0, wide.as_ptr(), &mut handle) };
    if found != 0 && handle != 0 {
        return Ok(handle as usize);
    }

    unsafe { LoadLibraryW(wide.as_ptr()) };

    let found = unsafe { GetModuleHandleExW(0, wide.as_ptr(), &mut handle) };
    if found == 0 || handle == 0 {
        return Err(Error::Os {
            call: "GetModuleHandleExW",
            source: io::Error::last_os_error(),
        });
    }

    Ok(handle as usize)
}
