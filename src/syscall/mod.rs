//! Syscall identifier resolution and raw dispatch.
//!
//! A clean user-mode syscall stub on x86_64 starts with a fixed encoding:
//!
//! ```text
//! 4C 8B D1          mov r10, rcx
//! B8 ?? ?? 00 00    mov eax, <identifier>
//! ```
//!
//! so the 16-bit identifier sits little-endian in bytes 4..6 of the function's first
//! bytes. [`crate::syscall::syscall_id`] recovers it from the *on-disk* copy of a
//! system library: hash-match the export, translate its RVA to a file offset, read a
//! ten-byte window, decode. Reading from disk sidesteps whatever the resident copy of
//! the library currently looks like, and the decode refuses prologues that do not match
//! the clean encoding instead of extracting garbage from a rewritten function.
//!
//! Once an identifier is known, [`crate::syscall::invoke`] enters the kernel directly:
//! identifier into `eax`, arguments marshalled per the x64 syscall convention, `syscall`
//! issued inline. No user-mode wrapper is involved, so modifications to the named entry
//! point are irrelevant.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sysgate::{syscall, NameHash, Sha1Hash};
//!
//! let digest = Sha1Hash.digest("NtClose");
//! let (id, name) = syscall::ntdll_syscall_id(&digest, &Sha1Hash)?;
//! println!("{name} -> {id:#06x}");
//! # Ok::<(), sysgate::Error>(())
//! ```

use obfstr::obfstr;

use crate::{
    exports::find_export,
    hash::NameHash,
    image::Image,
    windir,
    Error, Result,
};

/// Bytes read at a resolved export's file offset when decoding an identifier.
pub(crate) const STUB_WINDOW: usize = 10;

/// Maximum number of arguments the dispatch trampoline marshals.
pub const MAX_ARGS: usize = 16;

/// `mov r10, rcx; mov eax, imm32` - the prologue every clean stub begins with.
const STUB_PROLOGUE: [u8; 4] = [0x4C, 0x8B, 0xD1, 0xB8];

/// Decodes the syscall identifier from a stub window.
///
/// The window must begin with the clean-stub prologue and the identifier's high bytes
/// must be zero; anything else means the function was rewritten in place and the bytes
/// at the identifier's position are not trustworthy.
pub(crate) fn decode_stub(window: &[u8], name: &str) -> Result<u16> {
    if window.len() < 8
        || window[..4] != STUB_PROLOGUE
        || window[6] != 0
        || window[7] != 0
    {
        return Err(Error::StubMismatch {
            name: name.to_string(),
        });
    }

    Ok(u16::from_le_bytes([window[4], window[5]]))
}

/// Resolves a syscall identifier from an already-parsed image.
///
/// This is the pure core of [`syscall_id`]: hash-match an export, translate its RVA to
/// an offset into the image bytes, read the stub window, decode.
///
/// # Errors
///
/// - [`crate::Error::ExportNotFound`] when no export matches the digest
/// - [`crate::Error::StubMismatch`] when the matched function does not start with a
///   clean stub
/// - [`crate::Error::OutOfBounds`] when the stub window extends past the image bytes
pub fn syscall_id_in_image<H: NameHash + ?Sized>(
    image: &Image,
    digest: &str,
    hasher: &H,
) -> Result<(u16, String)> {
    let (rva, name) = find_export(image, digest, hasher)?;
    let offset = image.rva_to_offset(rva);
    let window = image.data_slice(offset, STUB_WINDOW)?;
    let id = decode_stub(window, &name)?;

    Ok((id, name))
}

/// Resolves a syscall identifier from the on-disk copy of a system library.
///
/// Always reads the static file under the system directory, never the resident copy;
/// run-time patches to the loaded module do not reach this path by design.
///
/// # Arguments
/// * `module` - file name of the system library, e.g. `"ntdll.dll"`
/// * `digest` - digest of the wanted export's name, in either name casing
/// * `hasher` - the digest capability the caller hashed with
///
/// # Errors
/// Propagates file and parse errors, plus the conditions of
/// [`syscall_id_in_image`]. A resolution miss never yields a zero identifier; it is
/// always the distinct not-found error.
pub fn syscall_id<H: NameHash + ?Sized>(
    module: &str,
    digest: &str,
    hasher: &H,
) -> Result<(u16, String)> {
    let image = Image::from_file(&windir::system32(module))?;
    syscall_id_in_image(&image, digest, hasher)
}

/// Resolves a syscall identifier from the on-disk ntdll.
///
/// # Errors
/// Same conditions as [`syscall_id`].
pub fn ntdll_syscall_id<H: NameHash + ?Sized>(digest: &str, hasher: &H) -> Result<(u16, String)> {
    syscall_id(obfstr!("ntdll.dll"), digest, hasher)
}

/// Enters the kernel directly with `id` and up to [`MAX_ARGS`] native-width arguments.
///
/// The trampoline loads the identifier into `eax`, places the first four arguments in
/// `r10`/`rdx`/`r8`/`r9`, spills the rest to the stack slots the kernel expects, and
/// issues `syscall`. Missing arguments are passed as zero, mirroring how variadic
/// wrappers pad. A non-zero status is surfaced as [`crate::Error::Syscall`]; the crate
/// does not interpret status values beyond that.
///
/// # Safety
///
/// This hands the kernel an arbitrary service number and raw arguments. The caller must
/// guarantee `id` is valid for the running system and that every argument is what the
/// corresponding service expects (including pointer validity and lifetimes). A wrong
/// identifier or argument can corrupt or terminate the process.
///
/// # Errors
///
/// - [`crate::Error::TooManyArgs`] when more than [`MAX_ARGS`] arguments are supplied
/// - [`crate::Error::Syscall`] when the kernel returns a non-zero status
#[cfg(all(windows, target_arch = "x86_64"))]
pub unsafe fn invoke(id: u16, args: &[usize]) -> Result<u32> {
    if args.len() > MAX_ARGS {
        return Err(Error::TooManyArgs(args.len()));
    }

    let mut frame = [0usize; MAX_ARGS];
    frame[..args.len()].copy_from_slice(args);

    let status = dispatch(id, &frame);
    if status != 0 {
        return Err(Error::Syscall { status });
    }

    Ok(status)
}

#[cfg(all(windows, target_arch = "x86_64"))]
unsafe fn dispatch(id: u16, frame: &[usize; MAX_ARGS]) -> u32 {
    let status: u32;

    // x64 syscall convention: identifier in eax, first four arguments in
    // r10/rdx/r8/r9, the rest where the kernel reads stack parameters - at
    // [rsp+0x28] upwards, past the return-address slot and the shadow space.
    // rcx and r11 are clobbered by the instruction itself.
    core::arch::asm!(
        "sub rsp, 0x88",
        "mov r10, [{frame}]",
        "mov rdx, [{frame} + 0x08]",
        "mov r8,  [{frame} + 0x10]",
        "mov r9,  [{frame} + 0x18]",
        "mov {t}, [{frame} + 0x20]",
        "mov [rsp + 0x28], {t}",
        "mov {t}, [{frame} + 0x28]",
        "mov [rsp + 0x30], {t}",
        "mov {t}, [{frame} + 0x30]",
        "mov [rsp + 0x38], {t}",
        "mov {t}, [{frame} + 0x38]",
        "mov [rsp + 0x40], {t}",
        "mov {t}, [{frame} + 0x40]",
        "mov [rsp + 0x48], {t}",
        "mov {t}, [{frame} + 0x48]",
        "mov [rsp + 0x50], {t}",
        "mov {t}, [{frame} + 0x50]",
        "mov [rsp + 0x58], {t}",
        "mov {t}, [{frame} + 0x58]",
        "mov [rsp + 0x60], {t}",
        "mov {t}, [{frame} + 0x60]",
        "mov [rsp + 0x68], {t}",
        "mov {t}, [{frame} + 0x68]",
        "mov [rsp + 0x70], {t}",
        "mov {t}, [{frame} + 0x70]",
        "mov [rsp + 0x78], {t}",
        "mov {t}, [{frame} + 0x78]",
        "mov [rsp + 0x80], {t}",
        "mov eax, {id:e}",
        "syscall",
        "add rsp, 0x88",
        frame = in(reg) frame.as_ptr(),
        id = in(reg) u32::from(id),
        t = out(reg) _,
        lateout("rax") status,
        out("rdx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("rcx") _,
        out("r11") _,
    );

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_stub_decodes() {
        // mov r10, rcx; mov eax, 0x1c6; syscall
        let window = [0x4C, 0x8B, 0xD1, 0xB8, 0xC6, 0x01, 0x00, 0x00, 0x0F, 0x05];
        assert_eq!(decode_stub(&window, "NtTestCall").unwrap(), 0x01C6);
    }

    #[test]
    fn zero_identifier_is_valid_when_the_stub_is_clean() {
        // Identifier 0 is a real service number; only the prologue decides validity.
        let window = [0x4C, 0x8B, 0xD1, 0xB8, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x05];
        assert_eq!(decode_stub(&window, "NtTestCall").unwrap(), 0);
    }

    #[test]
    fn rewritten_prologue_is_refused() {
        // jmp rel32 planted over the stub.
        let window = [0xE9, 0x10, 0x20, 0x30, 0x40, 0x01, 0x00, 0x00, 0x0F, 0x05];
        let result = decode_stub(&window, "NtTestCall");
        assert!(matches!(
            result.unwrap_err(),
            Error::StubMismatch { name } if name == "NtTestCall"
        ));
    }

    #[test]
    fn nonzero_identifier_high_bytes_are_refused() {
        // Valid prologue bytes but an identifier that cannot fit 16 bits.
        let window = [0x4C, 0x8B, 0xD1, 0xB8, 0xC6, 0x01, 0x01, 0x00, 0x0F, 0x05];
        assert!(decode_stub(&window, "NtTestCall").is_err());
    }

    #[test]
    fn short_window_is_refused() {
        let window = [0x4C, 0x8B, 0xD1];
        assert!(decode_stub(&window, "NtTestCall").is_err());
    }
}
