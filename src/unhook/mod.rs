//! Clean disk re-mapping of system libraries.
//!
//! The copy of a system library the process loader has resident can be modified at run
//! time; its on-disk file cannot. [`crate::unhook::remap_from_disk`] opens that file
//! with the native file API, creates a section object over it in *image* mode - so the
//! memory manager applies the same section alignment and page-protection layout the
//! platform loader would - and maps a read-only view of it into the current process.
//! The view is a byte-exact, unmodified rendition of the library, independent of
//! whatever the resident copy currently looks like.
//!
//! The three NT entry points this takes (`NtCreateFile`, `NtCreateSection`,
//! `ZwMapViewOfSection`) are themselves resolved by digest rather than by name, and the
//! interim file and section handles are closed once the view exists; the view itself is
//! process-lifetime like every other mapping in this crate.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sysgate::{unhook, NameHash, Sha1Hash};
//!
//! let clean = unhook::remap_ntdll()?;
//! let digest = Sha1Hash.digest("NtOpenProcess");
//! let (address, name) = clean.find_export(&digest, &Sha1Hash)?;
//! println!("unmodified {name} prologue lives at {address:#x}");
//! # Ok::<(), sysgate::Error>(())
//! ```

use std::{ffi::c_void, mem, path::Path, ptr};

use obfstr::obfstr;
use widestring::U16CString;
use windows_sys::Win32::{
    Foundation::{GENERIC_READ, HANDLE, NTSTATUS, UNICODE_STRING},
    Storage::FileSystem::{FILE_OPEN, FILE_READ_ATTRIBUTES, FILE_SHARE_READ},
    System::Kernel::OBJ_CASE_INSENSITIVE,
    System::Memory::{PAGE_READONLY, SEC_IMAGE},
    System::WindowsProgramming::OBJECT_ATTRIBUTES,
};

use crate::{
    exports,
    hash::{NameHash, Sha1Hash},
    image::Image,
    resolve,
    syscall::{decode_stub, STUB_WINDOW},
    windir, Error, Result,
};

// SHA-1 digests of the lowercased NT export names this module resolves for itself.
// ntcreatefile
const NT_CREATE_FILE: &str = "ac19c01d8c27c421e0b8a7960ae6bad2f84f0ce5";
// ntcreatesection
const NT_CREATE_SECTION: &str = "747d342b80e4c1c9d4d3dcb4ee2da24dcce27801";
// zwmapviewofsection
const ZW_MAP_VIEW_OF_SECTION: &str = "da39da04447a22b747ac8e86b4773bbd6ea96f9b";
// ntclose
const NT_CLOSE: &str = "550ad3b8e33ee570e5f405ebe7ad2afeafc2fbcb";

// NT-level constants windows-sys does not surface alongside the Win32 ones.
const SYNCHRONIZE: u32 = 0x0010_0000;
const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;
const FILE_SYNCHRONOUS_IO_NONALERT: u32 = 0x0000_0020;
const STANDARD_RIGHTS_REQUIRED: u32 = 0x000F_0000;
const SECTION_QUERY: u32 = 0x0000_0001;
const SECTION_MAP_READ: u32 = 0x0000_0004;
const VIEW_SHARE: u32 = 1;
const NT_CURRENT_PROCESS: HANDLE = -1isize as HANDLE;

#[repr(C)]
struct IoStatusBlock {
    pointer: *mut c_void,
    information: usize,
}

type NtCreateFileFn = unsafe extern "system" fn(
    file_handle: *mut HANDLE,
    desired_access: u32,
    object_attributes: *mut OBJECT_ATTRIBUTES,
    io_status_block: *mut IoStatusBlock,
    allocation_size: *mut i64,
    file_attributes: u32,
    share_access: u32,
    create_disposition: u32,
    create_options: u32,
    ea_buffer: *mut c_void,
    ea_length: u32,
) -> NTSTATUS;

type NtCreateSectionFn = unsafe extern "system" fn(
    section_handle: *mut HANDLE,
    desired_access: u32,
    object_attributes: *mut OBJECT_ATTRIBUTES,
    maximum_size: *mut i64,
    page_protection: u32,
    allocation_attributes: u32,
    file_handle: HANDLE,
) -> NTSTATUS;

type NtMapViewOfSectionFn = unsafe extern "system" fn(
    section_handle: HANDLE,
    process_handle: HANDLE,
    base_address: *mut *mut c_void,
    zero_bits: usize,
    commit_size: usize,
    section_offset: *mut i64,
    view_size: *mut usize,
    inherit_disposition: u32,
    allocation_type: u32,
    win32_protect: u32,
) -> NTSTATUS;

type NtCloseFn = unsafe extern "system" fn(handle: HANDLE) -> NTSTATUS;

/// A pristine, read-only view of a system library mapped straight from disk.
///
/// Unlike a [`crate::Library`], the view is produced by the OS image-mapping primitive,
/// so its internal layout mirrors the platform loader's mapping of the file - headers
/// in place, sections at their virtual addresses, nothing relocated. Never unmapped.
#[derive(Debug)]
pub struct UnhookedModule {
    base: usize,
    size: usize,
}

impl UnhookedModule {
    /// Returns the view's base address.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the view's size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Scans the view's exports for `digest` and returns the matching function's
    /// absolute address along with its actual name.
    ///
    /// # Errors
    /// Returns parse errors from the view and [`crate::Error::ExportNotFound`] when no
    /// export matches.
    pub fn find_export<H: NameHash + ?Sized>(
        &self,
        digest: &str,
        hasher: &H,
    ) -> Result<(usize, String)> {
        let image = unsafe { Image::from_raw(self.base as *const u8, self.size) }?;
        let (rva, name) = exports::find_export(&image, digest, hasher)?;

        Ok((self.base + rva as usize, name))
    }

    /// Decodes the syscall identifier of the export matching `digest` from this clean
    /// view's bytes.
    ///
    /// Because the view reflects the on-disk file, the identifier agrees with
    /// [`crate::syscall::syscall_id`] for the same library version even when the
    /// resident copy's stub was rewritten.
    ///
    /// # Errors
    /// Same conditions as [`find_export`](Self::find_export), plus
    /// [`crate::Error::StubMismatch`] if even the on-disk stub has an unexpected shape.
    pub fn syscall_id<H: NameHash + ?Sized>(
        &self,
        digest: &str,
        hasher: &H,
    ) -> Result<(u16, String)> {
        let image = unsafe { Image::from_raw(self.base as *const u8, self.size) }?;
        let (rva, name) = exports::find_export(&image, digest, hasher)?;
        // In an image-layout view the RVA is the view offset.
        let window = image.data_slice(rva as usize, STUB_WINDOW)?;
        let id = decode_stub(window, &name)?;

        Ok((id, name))
    }
}

/// Maps a read-only, image-layout view of the file at `path` into the current process.
///
/// # Errors
///
/// Resolution errors for the NT entry points propagate, and each of the three OS calls
/// (open, create-section, map-view) surfaces a failing status as [`crate::Error::Nt`]
/// with the call's name. Handles opened before a failure are closed.
pub fn remap_from_disk(path: &Path) -> Result<UnhookedModule> {
    let ntdll = obfstr!("ntdll.dll").to_string();
    let nt_create_file: NtCreateFileFn = unsafe {
        mem::transmute(resolve::proc_by_hash(&ntdll, NT_CREATE_FILE, &Sha1Hash)?.address)
    };
    let nt_create_section: NtCreateSectionFn = unsafe {
        mem::transmute(resolve::proc_by_hash(&ntdll, NT_CREATE_SECTION, &Sha1Hash)?.address)
    };
    let nt_map_view: NtMapViewOfSectionFn = unsafe {
        mem::transmute(resolve::proc_by_hash(&ntdll, ZW_MAP_VIEW_OF_SECTION, &Sha1Hash)?.address)
    };
    let nt_close: NtCloseFn =
        unsafe { mem::transmute(resolve::proc_by_hash(&ntdll, NT_CLOSE, &Sha1Hash)?.address) };

    let nt_path = windir::nt_device_path(path);
    let wide = U16CString::from_str(&nt_path)
        .map_err(|_| malformed_error!("Path contains an interior NUL: {}", nt_path))?;

    let mut name = UNICODE_STRING {
        Length: (wide.len() * 2) as u16,
        MaximumLength: ((wide.len() + 1) * 2) as u16,
        Buffer: wide.as_ptr() as *mut u16,
    };

    let mut attributes: OBJECT_ATTRIBUTES = unsafe { mem::zeroed() };
    attributes.Length = mem::size_of::<OBJECT_ATTRIBUTES>() as u32;
    attributes.ObjectName = &mut name;
    attributes.Attributes = OBJ_CASE_INSENSITIVE as u32;

    let mut io_status = IoStatusBlock {
        pointer: ptr::null_mut(),
        information: 0,
    };

    let mut file: HANDLE = 0;
    let status = unsafe {
        nt_create_file(
            &mut file,
            FILE_READ_ATTRIBUTES | GENERIC_READ | SYNCHRONIZE,
            &mut attributes,
            &mut io_status,
            ptr::null_mut(),
            0,
            FILE_SHARE_READ,
            FILE_OPEN,
            FILE_NON_DIRECTORY_FILE | FILE_SYNCHRONOUS_IO_NONALERT,
            ptr::null_mut(),
            0,
        )
    };
    if status != 0 {
        return Err(Error::Nt {
            call: "NtCreateFile",
            status,
        });
    }

    let mut section: HANDLE = 0;
    let status = unsafe {
        nt_create_section(
            &mut section,
            STANDARD_RIGHTS_REQUIRED | SECTION_MAP_READ | SECTION_QUERY,
            ptr::null_mut(),
            ptr::null_mut(),
            PAGE_READONLY,
            SEC_IMAGE,
            file,
        )
    };
    if status != 0 {
        unsafe { nt_close(file) };
        return Err(Error::Nt {
            call: "NtCreateSection",
            status,
        });
    }

    let mut base: *mut c_void = ptr::null_mut();
    let mut view_size: usize = 0;
    let status = unsafe {
        nt_map_view(
            section,
            NT_CURRENT_PROCESS,
            &mut base,
            0,
            0,
            ptr::null_mut(),
            &mut view_size,
            VIEW_SHARE,
            0,
            PAGE_READONLY,
        )
    };

    // The view holds its own reference to the backing section; the interim handles
    // have served their purpose either way.
    unsafe {
        nt_close(section);
        nt_close(file);
    }

    if status != 0 {
        return Err(Error::Nt {
            call: "ZwMapViewOfSection",
            status,
        });
    }

    Ok(UnhookedModule {
        base: base as usize,
        size: view_size,
    })
}

/// Maps a clean view of the on-disk ntdll.
///
/// # Errors
/// Same conditions as [`remap_from_disk`].
pub fn remap_ntdll() -> Result<UnhookedModule> {
    remap_from_disk(&windir::system32(obfstr!("ntdll.dll")))
}
