//! Pipeline tests against synthetic images.
//!
//! Everything here runs on any platform: the image model, RVA translation, dual-casing
//! digest resolution, fixup collection and syscall-identifier decoding are pure reads
//! over bytes. Mapping fidelity against a live address space is covered separately by
//! the Windows-only tests.

mod common;

use common::{
    synthetic_dll, synthetic_dll32, RELOC_TARGET_RVA, SIZE_OF_IMAGE, STUB_RVA, TEXT_OFFSET,
    TEXT_RVA,
};
use sysgate::{
    exports::find_export,
    reloc::{collect_fixups, FixupKind},
    syscall, Error, ExportIndex, Image, NameHash, Sha1Hash,
};

const BASE: u64 = 0x1_8000_0000;

/// A clean stub for identifier 0x1C6: mov r10, rcx; mov eax, 0x1c6; syscall; ret.
const CLEAN_STUB: [u8; 11] = [
    0x4C, 0x8B, 0xD1, 0xB8, 0xC6, 0x01, 0x00, 0x00, 0x0F, 0x05, 0xC3,
];

#[test]
fn image_model_reads_the_synthetic_dll() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, true);
    let image = Image::from_mem(bytes).unwrap();

    assert!(image.is_64());
    assert_eq!(image.width(), 64);
    assert_eq!(image.preferred_base(), BASE);
    assert_eq!(image.size_of_image().unwrap(), SIZE_OF_IMAGE);
    assert_eq!(image.size_of_headers().unwrap(), 0x400);
    assert_eq!(image.sections().count(), 2);
    assert_eq!(image.exported(), vec![("Foo".to_string(), STUB_RVA)]);
    assert!(image.symbol_table().unwrap().is_none());
}

#[test]
fn rva_translation_walks_sections_and_falls_back_to_the_header_region() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, false);
    let image = Image::from_mem(bytes).unwrap();

    // Inside the section spanning [0x1000, 0x3000) at file offset 0x400.
    assert_eq!(
        image.rva_to_offset(0x1500),
        (0x1500 - TEXT_RVA + TEXT_OFFSET) as usize
    );
    assert_eq!(image.rva_to_offset(TEXT_RVA), TEXT_OFFSET as usize);

    // Before any section: the RVA already is a file offset.
    assert_eq!(image.rva_to_offset(0x200), 0x200);
}

#[test]
fn digests_of_both_name_casings_resolve() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, false);
    let image = Image::from_mem(bytes).unwrap();

    let (rva, name) = find_export(&image, &Sha1Hash.digest("Foo"), &Sha1Hash).unwrap();
    assert_eq!((rva, name.as_str()), (STUB_RVA, "Foo"));

    let (rva, _) = find_export(&image, &Sha1Hash.digest("foo"), &Sha1Hash).unwrap();
    assert_eq!(rva, STUB_RVA);

    let miss = find_export(&image, &Sha1Hash.digest("Bar"), &Sha1Hash);
    assert!(matches!(miss.unwrap_err(), Error::ExportNotFound(_)));
}

#[test]
fn export_index_resolves_against_a_base() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, false);
    let image = Image::from_mem(bytes).unwrap();
    let index = ExportIndex::build(&image.exported(), SIZE_OF_IMAGE, &Sha1Hash).unwrap();

    let mapped_at = 0x7FF8_0000_0000usize;
    assert_eq!(
        index
            .lookup(&Sha1Hash.digest("Foo"), mapped_at)
            .unwrap(),
        mapped_at + STUB_RVA as usize
    );
    assert!(index.lookup(&Sha1Hash.digest("Bar"), mapped_at).is_err());
}

#[test]
fn fixups_are_collected_from_the_relocation_directory() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, true);
    let image = Image::from_mem(bytes).unwrap();

    let fixups = collect_fixups(&image).unwrap();
    assert_eq!(fixups.len(), 1);
    assert_eq!(fixups[0].rva, RELOC_TARGET_RVA);
    assert_eq!(fixups[0].kind, FixupKind::Dir64);

    // The seeded target holds the preferred-base pointer before any load shifts it.
    let offset = image.rva_to_offset(RELOC_TARGET_RVA);
    let slot = image.data_slice(offset, 8).unwrap();
    assert_eq!(u64::from_le_bytes(slot.try_into().unwrap()), BASE + 0x2000);
}

#[test]
fn no_relocation_directory_means_no_fixups() {
    let bytes = synthetic_dll(BASE, &[("Foo", STUB_RVA)], None, false);
    let image = Image::from_mem(bytes).unwrap();

    assert!(collect_fixups(&image).unwrap().is_empty());
}

#[test]
fn syscall_identifier_is_decoded_from_a_clean_stub() {
    let bytes = synthetic_dll(BASE, &[("NtTestCall", STUB_RVA)], Some(&CLEAN_STUB), false);
    let image = Image::from_mem(bytes).unwrap();

    let digest = Sha1Hash.digest("NtTestCall");
    let (id, name) = syscall::syscall_id_in_image(&image, &digest, &Sha1Hash).unwrap();
    assert_eq!(id, 0x01C6);
    assert_eq!(name, "NtTestCall");

    // Lowercased-name digest resolves the same stub.
    let digest = Sha1Hash.digest("nttestcall");
    let (id, _) = syscall::syscall_id_in_image(&image, &digest, &Sha1Hash).unwrap();
    assert_eq!(id, 0x01C6);
}

#[test]
fn rewritten_stub_is_a_distinct_error() {
    // A jmp planted over the prologue, as an in-place rewrite would leave it.
    let patched = [0xE9, 0x56, 0x34, 0x12, 0x00, 0x90, 0x90, 0x90, 0x90, 0x90, 0xC3];
    let bytes = synthetic_dll(BASE, &[("NtTestCall", STUB_RVA)], Some(&patched), false);
    let image = Image::from_mem(bytes).unwrap();

    let digest = Sha1Hash.digest("NtTestCall");
    let result = syscall::syscall_id_in_image(&image, &digest, &Sha1Hash);
    assert!(matches!(
        result.unwrap_err(),
        Error::StubMismatch { name } if name == "NtTestCall"
    ));
}

#[test]
fn unresolvable_digest_never_yields_an_identifier() {
    let bytes = synthetic_dll(BASE, &[("NtTestCall", STUB_RVA)], Some(&CLEAN_STUB), false);
    let image = Image::from_mem(bytes).unwrap();

    let result = syscall::syscall_id_in_image(&image, "ffffffffffffffff", &Sha1Hash);
    assert!(matches!(result.unwrap_err(), Error::ExportNotFound(_)));
}

#[cfg(target_pointer_width = "64")]
#[test]
fn a_32_bit_image_does_not_match_a_64_bit_host() {
    let image = Image::from_mem(synthetic_dll32(0x40_0000)).unwrap();

    assert!(!image.is_64());
    assert_eq!(image.width(), 32);
    assert!(!image.matches_host());
}

#[test]
fn several_names_may_share_one_address() {
    let bytes = synthetic_dll(
        BASE,
        &[("Foo", STUB_RVA), ("FooAlias", STUB_RVA)],
        None,
        false,
    );
    let image = Image::from_mem(bytes).unwrap();

    let index = ExportIndex::build(&image.exported(), SIZE_OF_IMAGE, &Sha1Hash).unwrap();
    let base = 0x1000_0000usize;
    assert_eq!(
        index.lookup(&Sha1Hash.digest("Foo"), base).unwrap(),
        index.lookup(&Sha1Hash.digest("FooAlias"), base).unwrap()
    );
}
