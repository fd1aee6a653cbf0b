use std::{collections::BTreeMap, path::PathBuf};

use crate::error::{FramewrightError, FramewrightResult};

/// Injected collaborator that resolves opaque resource ids (fonts, images,
/// audio tracks) to raw bytes.
///
/// The core never guesses at missing resources: a failed resolve fails the
/// job, keeping output deterministic.
pub trait ResourceLoader: Send + Sync {
    fn resolve(&self, id: &str) -> FramewrightResult<Vec<u8>>;
}

/// Loads resources from files under a root directory, treating ids as
/// normalized relative paths.
#[derive(Clone, Debug)]
pub struct FsResourceLoader {
    root: PathBuf,
}

impl FsResourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceLoader for FsResourceLoader {
    fn resolve(&self, id: &str) -> FramewrightResult<Vec<u8>> {
        let rel = normalize_rel_path(id)?;
        let path = self.root.join(rel);
        std::fs::read(&path).map_err(|e| {
            FramewrightError::resource_missing(format!(
                "'{}' ({}): {e}",
                id,
                path.display()
            ))
        })
    }
}

/// In-memory loader keyed by id. Used by tests and embedding callers.
#[derive(Clone, Debug, Default)]
pub struct MemoryResourceLoader {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(id.into(), bytes);
    }
}

impl ResourceLoader for MemoryResourceLoader {
    fn resolve(&self, id: &str) -> FramewrightResult<Vec<u8>> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| FramewrightError::resource_missing(format!("'{id}'")))
    }
}

/// Normalize and validate loader-relative resource ids.
///
/// The normalized result uses `/` separators, removes `.` segments, and
/// rejects absolute paths or parent traversals (`..`).
pub fn normalize_rel_path(source: &str) -> FramewrightResult<String> {
    let s = source.replace('\\', "/");
    if s.starts_with('/') {
        return Err(FramewrightError::validation(
            "resource ids must be relative paths",
        ));
    }
    if s.is_empty() {
        return Err(FramewrightError::validation("resource id must be non-empty"));
    }

    let mut out = Vec::<&str>::new();
    for part in s.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(FramewrightError::validation(
                "resource ids must not contain '..'",
            ));
        }
        out.push(part);
    }

    if out.is_empty() {
        return Err(FramewrightError::validation(
            "resource id must contain a file name",
        ));
    }

    Ok(out.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(normalize_rel_path("a/./b//c.png").unwrap(), "a/b/c.png");
        assert_eq!(normalize_rel_path("a\\b.ttf").unwrap(), "a/b.ttf");
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert!(normalize_rel_path("/abs/path.png").is_err());
        assert!(normalize_rel_path("../up.png").is_err());
        assert!(normalize_rel_path("a/../../b.png").is_err());
        assert!(normalize_rel_path("").is_err());
        assert!(normalize_rel_path("./").is_err());
    }

    #[test]
    fn memory_loader_hits_and_misses() {
        let mut loader = MemoryResourceLoader::new();
        loader.insert("font.ttf", vec![1, 2, 3]);
        assert_eq!(loader.resolve("font.ttf").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            loader.resolve("absent.ttf"),
            Err(FramewrightError::ResourceMissing(_))
        ));
    }

    #[test]
    fn fs_loader_missing_file_is_resource_missing() {
        let loader = FsResourceLoader::new(std::env::temp_dir().join("framewright-nonexistent"));
        assert!(matches!(
            loader.resolve("missing.png"),
            Err(FramewrightError::ResourceMissing(_))
        ));
    }
}
