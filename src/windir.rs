//! System library path construction.
//!
//! The resolver and the remapper always read system libraries from the canonical
//! system directory; the literals are kept out of the binary's string table via
//! `obfstr`, the crate's documented string-obfuscation primitive.

use obfstr::obfstr;
use std::path::{Path, PathBuf};

/// Returns the full path of `file` inside the system library directory.
pub(crate) fn system32(file: &str) -> PathBuf {
    let mut path = PathBuf::from(obfstr!(r"C:\Windows\System32").to_string());
    path.push(file);
    path
}

/// Renders `path` as an NT-namespace device path for native file APIs.
#[cfg(windows)]
pub(crate) fn nt_device_path(path: &Path) -> String {
    format!(r"{}{}", obfstr!(r"\??\"), path.display())
}

#[cfg(not(windows))]
#[allow(unused)]
pub(crate) fn nt_device_path(path: &Path) -> String {
    format!(r"\??\{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system32_appends_the_file_name() {
        let path = system32("ntdll.dll");
        assert!(path.to_string_lossy().ends_with("ntdll.dll"));
        assert!(path.to_string_lossy().contains("System32"));
    }

    #[test]
    fn nt_device_path_prefixes_the_namespace() {
        let path = nt_device_path(&system32("ntdll.dll"));
        assert!(path.starts_with(r"\??\"));
    }
}
