use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure surfaces of the loading pipeline: parsing the image
/// container, gating on architecture width, acquiring OS resources (memory regions, file
/// handles, section objects, mapped views), resolving hashed exports, decoding syscall
/// stubs, and dispatching raw syscalls. A resolution miss is deliberately distinct from a
/// format or resource error so callers can fall back to another module or digest without
/// treating the image as broken.
///
/// # Examples
///
/// ```rust,no_run
/// use sysgate::{Error, Sha1Hash, syscall};
///
/// match syscall::ntdll_syscall_id("not-a-real-digest", &Sha1Hash) {
///     Ok((id, name)) => println!("{name} is syscall {id:#x}"),
///     Err(Error::ExportNotFound(digest)) => eprintln!("no export hashes to {digest}"),
///     Err(Error::StubMismatch { name }) => eprintln!("{name} does not look like a clean stub"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file in which the error was detected
    /// * `line` - Source line in which the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading the image.
    #[error("Out of bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The image's bit-width disagrees with the running process's bit-width.
    ///
    /// Always fatal for the load in question; no memory is reserved before this check.
    #[error("Cannot load a {image_width}-bit image from a {host_width}-bit process")]
    ArchMismatch {
        /// Bit-width the image was linked for
        image_width: u32,
        /// Bit-width of the running process
        host_width: u32,
    },

    /// No export of the inspected image hashes to the requested digest.
    ///
    /// This is a resolution miss, not a format error; the image itself parsed fine.
    #[error("No export matches digest {0}")]
    ExportNotFound(String),

    /// The resolved export does not begin with the expected clean syscall stub encoding.
    ///
    /// Extracting an identifier from a rewritten prologue would silently produce a wrong
    /// value, so the decode refuses instead.
    #[error("Export {name} does not begin with a clean syscall stub (likely rewritten in place)")]
    StubMismatch {
        /// Name of the export whose prologue did not match
        name: String,
    },

    /// A Win32 call failed; carries the failing call and the thread's last OS error.
    #[error("{call} failed: {source}")]
    Os {
        /// The API that failed
        call: &'static str,
        /// The OS error reported for the failure
        source: std::io::Error,
    },

    /// A native NT call returned a failure status.
    #[error("{call} returned NTSTATUS {status:#010x}")]
    Nt {
        /// The NT entry point that failed
        call: &'static str,
        /// The raw NTSTATUS value
        status: i32,
    },

    /// A dispatched syscall returned a non-zero status.
    ///
    /// The status is not interpreted further; decoding platform status semantics is the
    /// caller's concern.
    #[error("Syscall returned NTSTATUS {status:#010x}")]
    Syscall {
        /// The raw status returned by the kernel
        status: u32,
    },

    /// More arguments were supplied than the dispatch trampoline can marshal.
    #[error("Syscall dispatch supports at most 16 arguments, got {0}")]
    TooManyArgs(usize),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
