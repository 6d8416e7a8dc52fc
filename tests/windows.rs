//! Mapping fidelity and live-system tests.
//!
//! These exercise the Windows-only half of the pipeline: manual mapping into the real
//! address space, clean `SEC_IMAGE` re-mapping of ntdll, live resolution, and the
//! dispatcher. The synthetic image keeps the fidelity checks deterministic; the ntdll
//! tests only assert properties stable across supported builds.
#![cfg(all(windows, target_arch = "x86_64"))]

mod common;

use common::{synthetic_dll, synthetic_dll32, RELOC_TARGET_RVA, STUB_RVA, TEXT_OFFSET, TEXT_RVA};
use sysgate::{
    loader, resolve, syscall, unhook, Error, NameHash, Sha1Hash,
};

const PREFERRED: u64 = 0x1_8000_0000;

const CLEAN_STUB: [u8; 11] = [
    0x4C, 0x8B, 0xD1, 0xB8, 0xC6, 0x01, 0x00, 0x00, 0x0F, 0x05, 0xC3,
];

fn mapped(base: usize, len: usize) -> &'static [u8] {
    unsafe { std::slice::from_raw_parts(base as *const u8, len) }
}

#[test]
fn manual_map_copies_headers_and_sections_faithfully() {
    let bytes = synthetic_dll(PREFERRED, &[("Foo", STUB_RVA)], Some(&CLEAN_STUB), true);
    let library = loader::load_image(&bytes, &Sha1Hash).unwrap();
    let view = mapped(library.base(), 0x4000);

    // Header copy fidelity: the first SizeOfHeaders bytes match the input image.
    assert_eq!(&view[..0x400], &bytes[..0x400]);

    // Section copy fidelity below the relocated slot.
    let section_span = (RELOC_TARGET_RVA - TEXT_RVA) as usize;
    assert_eq!(
        &view[TEXT_RVA as usize..TEXT_RVA as usize + section_span],
        &bytes[TEXT_OFFSET as usize..TEXT_OFFSET as usize + section_span]
    );

    // The fixed-up pointer equals preferredTarget + (actualBase - preferredBase).
    let slot = &view[RELOC_TARGET_RVA as usize..RELOC_TARGET_RVA as usize + 8];
    let value = u64::from_le_bytes(slot.try_into().unwrap());
    assert_eq!(value, library.base() as u64 + 0x2000);
}

#[test]
fn manual_map_resolves_digests_of_both_casings() {
    let bytes = synthetic_dll(PREFERRED, &[("Foo", STUB_RVA)], None, true);
    let library = loader::load_image(&bytes, &Sha1Hash).unwrap();

    let exact = library.find_proc(&Sha1Hash.digest("Foo")).unwrap();
    let lowered = library.find_proc(&Sha1Hash.digest("foo")).unwrap();
    assert_eq!(exact, library.base() + STUB_RVA as usize);
    assert_eq!(exact, lowered);

    let miss = library.find_proc(&Sha1Hash.digest("Bar"));
    assert!(matches!(miss.unwrap_err(), Error::ExportNotFound(_)));
}

#[test]
fn width_mismatch_fails_before_mapping() {
    let result = loader::load_image(&synthetic_dll32(0x40_0000), &Sha1Hash);
    assert!(matches!(
        result.unwrap_err(),
        Error::ArchMismatch {
            image_width: 32,
            host_width: 64
        }
    ));
}

#[test]
fn ntdll_can_be_manually_mapped_and_resolved() {
    let ntdll = loader::load_ntdll(&Sha1Hash).unwrap();
    assert_eq!(ntdll.name(), "ntdll");
    assert!(ntdll.base() != 0);

    let close = ntdll.find_proc(&Sha1Hash.digest("NtClose")).unwrap();
    assert!(close > ntdll.base());
}

#[test]
fn remapped_ntdll_exposes_clean_exports() {
    let clean = unhook::remap_ntdll().unwrap();
    assert!(clean.base() != 0);
    assert!(clean.size() > 0);

    let digest = Sha1Hash.digest("NtOpenProcess");
    let (address, name) = clean.find_export(&digest, &Sha1Hash).unwrap();
    assert_eq!(name, "NtOpenProcess");
    assert!(address > clean.base());
    assert!(address < clean.base() + clean.size());
}

#[test]
fn disk_and_clean_view_agree_on_identifiers() {
    let digest = Sha1Hash.digest("NtOpenFile");

    let (from_disk, disk_name) = syscall::ntdll_syscall_id(&digest, &Sha1Hash).unwrap();
    let clean = unhook::remap_ntdll().unwrap();
    let (from_view, view_name) = clean.syscall_id(&digest, &Sha1Hash).unwrap();

    assert_eq!(from_disk, from_view);
    assert_eq!(disk_name, view_name);
}

#[test]
fn live_resolution_is_cached_until_invalidated() {
    let digest = Sha1Hash.digest("NtQueryInformationProcess");

    let first = resolve::proc_by_hash("ntdll.dll", &digest, &Sha1Hash).unwrap();
    let second = resolve::proc_by_hash("ntdll.dll", &digest, &Sha1Hash).unwrap();
    assert_eq!(first.address, second.address);
    assert_eq!(first.name, "NtQueryInformationProcess");

    resolve::invalidate("ntdll.dll", &digest);
    let third = resolve::proc_by_hash("ntdll.dll", &digest, &Sha1Hash).unwrap();
    assert_eq!(first.address, third.address);
}

#[test]
fn dispatch_surfaces_the_kernel_status() {
    let digest = Sha1Hash.digest("NtClose");
    let (id, _) = syscall::ntdll_syscall_id(&digest, &Sha1Hash).unwrap();

    // Closing a handle value that cannot be open fails with a non-zero status.
    let result = unsafe { syscall::invoke(id, &[usize::MAX - 7]) };
    assert!(matches!(result.unwrap_err(), Error::Syscall { status } if status != 0));
}

#[test]
fn dispatch_rejects_oversized_argument_lists() {
    let args = [0usize; 17];
    let result = unsafe { syscall::invoke(0, &args) };
    assert!(matches!(result.unwrap_err(), Error::TooManyArgs(17)));
}
