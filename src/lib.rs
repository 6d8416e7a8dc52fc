// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
// - 'image/mod.rs' builds a slice over an already-mapped section view
// - 'loader/region.rs' hands out a mutable slice over a committed region
// - 'syscall/mod.rs' issues the kernel-transition instruction inline

//! # sysgate
//!
//! A manual-mapping loader and direct-syscall resolution library for Windows.
//!
//! `sysgate` re-implements the narrow slice of the platform loader that security
//! tooling keeps needing under its own control: mapping a system library into the
//! process by hand, resolving its exports by an obfuscating digest instead of a
//! plaintext name, rebuilding a pristine copy of an on-disk library as a fresh image
//! section, recovering syscall identifiers from clean stub bytes, and entering the
//! kernel directly with an identifier and an argument list.
//!
//! ## Features
//!
//! - **Manual mapping** - reserve/commit, header and section placement, base
//!   relocations, symbol table materialization; no platform load service involved
//! - **Hashed export resolution** - exports are indexed under digests of both name
//!   casings; the digest scheme is a pluggable capability ([`NameHash`])
//! - **Clean re-mapping** - `SEC_IMAGE` views of on-disk libraries, immune to run-time
//!   modification of the resident copy
//! - **Syscall identifier recovery** - stub windows read from disk, validated against
//!   the clean encoding before anything is extracted
//! - **Direct dispatch** - a fixed x86_64 trampoline entering the kernel without any
//!   user-mode wrapper
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sysgate::prelude::*;
//!
//! // Identifier from the on-disk ntdll, then straight into the kernel.
//! let digest = Sha1Hash.digest("NtClose");
//! let (id, name) = syscall::ntdll_syscall_id(&digest, &Sha1Hash)?;
//! println!("{name} is service {id:#06x}");
//! # Ok::<(), sysgate::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`image`] - PE images over pluggable byte sources (disk mapping, owned buffer,
//!   raw in-process view); container parsing is delegated to `goblin`
//! - [`exports`] - dual-casing digest index and one-shot export scanning
//! - [`reloc`] - base relocation fixup collection
//! - [`hash`] - the digest capability and the SHA-1 reference implementation
//! - [`loader`] *(Windows)* - manual mapping into the current process
//! - [`unhook`] *(Windows)* - clean `SEC_IMAGE` re-mapping from disk
//! - [`resolve`] *(Windows)* - live resolution with a process-wide cache
//! - [`syscall`] - identifier recovery everywhere; dispatch on Windows x86_64
//!
//! ## Resource policy
//!
//! Mapped regions, section views and manually loaded libraries are never released;
//! they live for the remaining lifetime of the process. This is a deliberate,
//! documented contract - mapped code may be executing at any point, and there is no
//! unload operation anywhere in the crate. Interim file and section handles, by
//! contrast, are closed as soon as the mapping exists.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Resolution misses
//! ([`Error::ExportNotFound`]) and rewritten stubs ([`Error::StubMismatch`]) are
//! distinct from format and resource errors, and nothing in this crate logs -
//! presentation belongs to the caller.

#[macro_use]
pub(crate) mod error;
pub(crate) mod windir;

/// Convenient re-exports of the most commonly used types and functions.
pub mod prelude;

/// Hashed export indexing and one-shot export scanning.
pub mod exports;

/// The pluggable name-digest capability and its SHA-1 reference implementation.
pub mod hash;

/// PE image abstraction over pluggable byte sources.
pub mod image;

/// Base relocation fixup collection.
pub mod reloc;

/// Syscall identifier recovery and direct dispatch.
pub mod syscall;

/// Manual image mapping into the current process.
#[cfg(windows)]
pub mod loader;

/// Live export resolution with a process-wide cache.
#[cfg(windows)]
pub mod resolve;

/// Clean disk re-mapping of system libraries.
#[cfg(windows)]
pub mod unhook;

/// `sysgate` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`], used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `sysgate` Error type
///
/// The main error type for all operations in this crate. See [`error::Error`] for the
/// full taxonomy.
pub use error::Error;

/// Dual-casing digest index over an image's exports.
pub use exports::ExportIndex;

/// The name-digest capability and the SHA-1 reference implementation.
pub use hash::{NameHash, Sha1Hash};

/// Parsed PE image bound to its byte source.
pub use image::Image;

/// A manually mapped library and the operations that produce one.
#[cfg(windows)]
pub use loader::{load_image, load_ntdll, Library};

/// A pristine disk-mapped module view and the operations that produce one.
#[cfg(windows)]
pub use unhook::{remap_from_disk, remap_ntdll, UnhookedModule};
