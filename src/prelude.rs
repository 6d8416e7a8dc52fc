//! # sysgate Prelude
//!
//! A curated selection of the most frequently used types and functions, for glob
//! import:
//!
//! ```rust,no_run
//! use sysgate::prelude::*;
//!
//! let digest = Sha1Hash.digest("NtOpenFile");
//! let (id, _) = syscall::ntdll_syscall_id(&digest, &Sha1Hash)?;
//! # Ok::<(), sysgate::Error>(())
//! ```

/// The main error type for all sysgate operations
pub use crate::Error;

/// The result type used throughout sysgate
pub use crate::Result;

/// The name-digest capability and its SHA-1 reference implementation
pub use crate::hash::{NameHash, Sha1Hash};

/// Parsed PE image over a pluggable byte source
pub use crate::image::Image;

/// Dual-casing digest index and one-shot export scanning
pub use crate::exports::{find_export, ExportIndex};

/// Syscall identifier recovery (and, on Windows x86_64, direct dispatch)
pub use crate::syscall;

/// Manual mapping into the current process
#[cfg(windows)]
pub use crate::loader::{load_image, load_ntdll, Library};

/// Live resolution with a process-wide cache
#[cfg(windows)]
pub use crate::resolve::{proc_by_hash, ResolvedProc};

/// Clean disk re-mapping of system libraries
#[cfg(windows)]
pub use crate::unhook::{remap_from_disk, remap_ntdll, UnhookedModule};
