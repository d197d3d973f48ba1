//! PATH lookup for configured provider executables.
//!
//! Used at server startup to warn about providers whose CLI is not installed;
//! the supervisor still reports `cli_not_found` per request.

use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Returns true when `executable` is a path to an executable file, or a bare
/// name found in one of the `PATH` directories.
pub fn is_executable_available(executable: &str) -> bool {
    let name = executable.trim();
    if name.is_empty() {
        return false;
    }

    if name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(Path::new(name));
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| is_executable_file(&dir.join(name)))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::is_executable_available;

    #[test]
    fn unit_blank_executable_is_unavailable() {
        assert!(!is_executable_available("   "));
    }

    #[cfg(unix)]
    #[test]
    fn functional_explicit_path_requires_execute_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("codex");
        std::fs::write(&script, "#!/bin/sh\necho ok\n").expect("write script");
        let path = script.display().to_string();

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644))
            .expect("chmod 644");
        assert!(!is_executable_available(&path));

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod 755");
        assert!(is_executable_available(&path));
    }

    #[test]
    fn unit_missing_explicit_path_is_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("does-not-exist");
        assert!(!is_executable_available(&missing.display().to_string()));
    }
}
