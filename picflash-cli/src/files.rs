//! Positional file arguments, classified by extension.

use std::path::{Path, PathBuf};

/// Kind of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// Intel HEX firmware.
    Hex,
    /// Prebuilt image.
    Image,
    /// Encryption key.
    Key,
}

impl FileKind {
    /// Classify `path` by its extension, ignoring case.
    pub(crate) fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "hex" => Some(Self::Hex),
            "img" => Some(Self::Image),
            "key" => Some(Self::Key),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Image => "image",
            Self::Key => "key",
        }
    }
}

/// The first file of each kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileSet {
    /// Hex file.
    pub hex: Option<PathBuf>,
    /// Image file.
    pub image: Option<PathBuf>,
    /// Key file.
    pub key: Option<PathBuf>,
}

impl FileSet {
    /// Sort `paths` into a set. The first file of each kind wins; later ones
    /// and unknown extensions come back as warnings.
    pub(crate) fn classify(paths: &[PathBuf]) -> (Self, Vec<String>) {
        let mut set = Self::default();
        let mut warnings = Vec::new();

        for path in paths {
            let Some(kind) = FileKind::of(path) else {
                warnings.push(format!("Ignoring {}: unknown file type", path.display()));
                continue;
            };
            let slot = match kind {
                FileKind::Hex => &mut set.hex,
                FileKind::Image => &mut set.image,
                FileKind::Key => &mut set.key,
            };
            match slot {
                Some(first) => warnings.push(format!(
                    "Ignoring {}: {} file already given ({})",
                    path.display(),
                    kind.label(),
                    first.display()
                )),
                None => *slot = Some(path.clone()),
            }
        }

        (set, warnings)
    }

    /// Whether there is something to flash.
    pub(crate) fn has_firmware(&self) -> bool {
        self.hex.is_some() || self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(FileKind::of(Path::new("app.HEX")), Some(FileKind::Hex));
        assert_eq!(FileKind::of(Path::new("out/app.img")), Some(FileKind::Image));
        assert_eq!(FileKind::of(Path::new("secret.Key")), Some(FileKind::Key));
        assert_eq!(FileKind::of(Path::new("README")), None);
        assert_eq!(FileKind::of(Path::new("app.bin")), None);
    }

    #[test]
    fn test_first_file_wins() {
        let (set, warnings) = FileSet::classify(&paths(&["a.hex", "b.hex", "a.img", "k.key"]));
        assert_eq!(set.hex, Some(PathBuf::from("a.hex")));
        assert_eq!(set.image, Some(PathBuf::from("a.img")));
        assert_eq!(set.key, Some(PathBuf::from("k.key")));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("b.hex"));
    }

    #[test]
    fn test_unknown_extension_warns() {
        let (set, warnings) = FileSet::classify(&paths(&["notes.txt", "app.img"]));
        assert!(set.has_firmware());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("notes.txt"));
    }

    #[test]
    fn test_key_alone_is_not_firmware() {
        let (set, warnings) = FileSet::classify(&paths(&["k.key"]));
        assert!(!set.has_firmware());
        assert!(warnings.is_empty());
    }
}
