use std::path::{Path, PathBuf};

#[cfg(target_os = "windows")]
const ARCH_DIRS: &[&str] = &["x86_64-win", "arm64x-win", "arm64-win"];
#[cfg(target_os = "linux")]
const ARCH_DIRS: &[&str] = &["x86_64-linux", "aarch64-linux"];
#[cfg(target_os = "macos")]
const ARCH_DIRS: &[&str] = &["MacOS"];
#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
const ARCH_DIRS: &[&str] = &[];

#[cfg(target_os = "windows")]
const BINARY_EXTENSION: &str = "vst3";
#[cfg(target_os = "linux")]
const BINARY_EXTENSION: &str = "so";
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
const BINARY_EXTENSION: &str = "";

/// Resolves the loadable binary behind a `.vst3` path.
///
/// A plain file (the legacy single-DLL layout) is returned as is. A bundle
/// directory is searched under `Contents/<arch>/` for `<stem>.<ext>`, then for
/// any binary with the platform extension.
pub fn resolve_module_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if !path.is_dir() {
        return None;
    }

    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let contents = path.join("Contents");

    for arch in ARCH_DIRS {
        let arch_dir = contents.join(arch);
        let expected = if BINARY_EXTENSION.is_empty() {
            arch_dir.join(&stem)
        } else {
            arch_dir.join(format!("{stem}.{BINARY_EXTENSION}"))
        };
        if expected.is_file() {
            return Some(expected);
        }

        // Fallback: some vendors name the binary differently from the bundle.
        if let Ok(entries) = std::fs::read_dir(&arch_dir) {
            let found = entries.flatten().map(|e| e.path()).find(|p| {
                p.is_file()
                    && (BINARY_EXTENSION.is_empty()
                        || p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case(BINARY_EXTENSION)))
            });
            if found.is_some() {
                return found;
            }
        }
    }
    None
}

/// `<bundle>/Contents`, or the binary's directory for single-file plugins.
pub fn resource_root(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        return Some(path.join("Contents"));
    }
    path.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_module_path(&dir.path().join("Nope.vst3")), None);
    }

    #[test]
    fn single_file_plugin_is_its_own_module() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Flat.vst3");
        std::fs::write(&file, b"").unwrap();
        assert_eq!(resolve_module_path(&file), Some(file.clone()));
        assert_eq!(resource_root(&file).as_deref(), Some(dir.path()));
    }

    #[cfg(any(target_os = "windows", target_os = "linux", target_os = "macos"))]
    #[test]
    fn bundle_binary_is_found_under_contents() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Delay.vst3");
        let arch_dir = bundle.join("Contents").join(ARCH_DIRS[0]);
        std::fs::create_dir_all(&arch_dir).unwrap();
        let binary = if BINARY_EXTENSION.is_empty() {
            arch_dir.join("Delay")
        } else {
            arch_dir.join(format!("Delay.{BINARY_EXTENSION}"))
        };
        std::fs::write(&binary, b"").unwrap();

        assert_eq!(resolve_module_path(&bundle), Some(binary));
        assert_eq!(resource_root(&bundle), Some(bundle.join("Contents")));
    }

    #[test]
    fn empty_bundle_does_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Empty.vst3");
        std::fs::create_dir_all(bundle.join("Contents")).unwrap();
        assert_eq!(resolve_module_path(&bundle), None);
    }
}
