//! Turning import paths into program text.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Program text together with the identity used for cycle detection and
/// for resolving imports made from inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub id: PathBuf,
    pub text: String,
}

pub trait SourceResolver {
    /// Resolves `path`, as written in an import, relative to the directory of
    /// the importing program (`None` for the root program).
    fn resolve(&self, path: &str, relative_to: Option<&Path>) -> io::Result<Source>;
}

/// Reads programs from the filesystem.
#[derive(Clone, Debug, Default)]
pub struct FsResolver;

impl SourceResolver for FsResolver {
    fn resolve(&self, path: &str, relative_to: Option<&Path>) -> io::Result<Source> {
        let path = match relative_to {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };
        let id = fs::canonicalize(&path)?;
        let text = fs::read_to_string(&id)?;
        Ok(Source { id, text })
    }
}

/// Serves programs from an in-memory table keyed by normalized path.
#[derive(Clone, Debug, Default)]
pub struct MemoryResolver {
    files: HashMap<PathBuf, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), text.into());
    }
}

impl SourceResolver for MemoryResolver {
    fn resolve(&self, path: &str, relative_to: Option<&Path>) -> io::Result<Source> {
        let id = normalize(&relative_to.unwrap_or_else(|| Path::new("")).join(path));
        match self.files.get(&id) {
            Some(text) => Ok(Source {
                id,
                text: text.clone(),
            }),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no program at {}", id.display()),
            )),
        }
    }
}

/// Removes `.` and resolves `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_memory_resolver_is_relative_to_importer() {
        let resolver = MemoryResolver::new()
            .with_file("rules/main.edt", "a = 1")
            .with_file("shared/common.edt", "b = 2");
        let main = resolver.resolve("./rules/main.edt", None).unwrap();
        assert_eq!(main.id, PathBuf::from("rules/main.edt"));

        let dir = main.id.parent().unwrap();
        let common = resolver.resolve("../shared/common.edt", Some(dir)).unwrap();
        assert_eq!(common.text, "b = 2");
        assert_eq!(common.id, PathBuf::from("shared/common.edt"));
    }

    #[test]
    fn test_memory_resolver_missing_file() {
        let err = MemoryResolver::new().resolve("nope.edt", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_fs_resolver_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("common.edt")).unwrap();
        writeln!(file, "account = \"Expenses:Misc\"").unwrap();

        let source = FsResolver.resolve("common.edt", Some(dir.path())).unwrap();
        assert!(source.text.contains("Expenses:Misc"));
        assert!(source.id.is_absolute());
        assert!(FsResolver.resolve("missing.edt", Some(dir.path())).is_err());
    }
}
