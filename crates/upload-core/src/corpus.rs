use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CorpusError;

/// One file read from the corpus directory.
#[derive(Debug)]
pub struct CorpusEntry {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Ordered, read-only set of upload payloads cycled through by request number.
#[derive(Debug, Clone)]
pub struct Corpus {
    entries: Vec<Arc<CorpusEntry>>,
}

/// A single logical upload: the request ordinal and the payload it carries.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub request_num: u64,
    pub corpus_index: usize,
    pub entry: Arc<CorpusEntry>,
}

impl WorkItem {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.entry.payload
    }
}

impl Corpus {
    /// Build a corpus from in-memory `(name, payload)` pairs, keeping their order.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, CorpusError>
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        let entries: Vec<Arc<CorpusEntry>> = entries
            .into_iter()
            .map(|(name, payload)| {
                Arc::new(CorpusEntry {
                    name: name.into(),
                    payload,
                })
            })
            .collect();
        if entries.is_empty() {
            return Err(CorpusError::NoValidItems {
                path: "<memory>".into(),
                extensions: String::new(),
            });
        }
        Ok(Self { entries })
    }

    /// Read every regular file in `dir` whose extension is in `extensions`.
    ///
    /// Extensions are compared case-sensitively, so `photo.JPG` does not match
    /// `jpg`. Entries are ordered by file name. Unreadable files are skipped with
    /// a warning; an empty result is an error.
    pub fn load(dir: impl AsRef<Path>, extensions: &[String]) -> Result<Self, CorpusError> {
        let dir = dir.as_ref();
        let read_dir = std::fs::read_dir(dir).map_err(|source| CorpusError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| CorpusError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| extensions.iter().any(|e| e == ext))
                .unwrap_or(false);
            if matches {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let name = match path.file_name().and_then(|s| s.to_str()) {
                Some(n) => n.to_string(),
                None => {
                    warn!(path = ?path, "skipping file with non-UTF-8 name");
                    continue;
                }
            };
            match std::fs::read(&path) {
                Ok(payload) => {
                    debug!(file = %name, bytes = payload.len(), "loaded corpus file");
                    entries.push(Arc::new(CorpusEntry { name, payload }));
                }
                Err(e) => warn!(file = %name, error = %e, "couldn't read corpus file, skipping"),
            }
        }

        if entries.is_empty() {
            return Err(CorpusError::NoValidItems {
                path: dir.to_path_buf(),
                extensions: extensions.join(","),
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.payload.len() as u64).sum()
    }

    /// Work item for `request_num`, using entry `request_num mod len`.
    pub fn item(&self, request_num: u64) -> WorkItem {
        let corpus_index = (request_num % self.entries.len() as u64) as usize;
        WorkItem {
            request_num,
            corpus_index,
            entry: Arc::clone(&self.entries[corpus_index]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["jpg".into(), "jpeg".into(), "png".into()]
    }

    #[test]
    fn test_cyclic_selection() {
        let corpus =
            Corpus::from_entries([("a.png", vec![1]), ("b.png", vec![2]), ("c.png", vec![3])])
                .unwrap();

        let used: Vec<usize> = (0..7).map(|i| corpus.item(i).corpus_index).collect();
        assert_eq!(used, vec![0, 1, 2, 0, 1, 2, 0]);

        let item = corpus.item(4);
        assert_eq!(item.request_num, 4);
        assert_eq!(item.name(), "b.png");
        assert_eq!(item.payload(), &[2]);
    }

    #[test]
    fn test_load_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("c.jpeg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"txt").unwrap();
        std::fs::write(dir.path().join("upper.JPG"), b"upper").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let corpus = Corpus::load(dir.path(), &exts()).unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.item(0).name(), "a.jpg");
        assert_eq!(corpus.item(1).name(), "b.png");
        assert_eq!(corpus.item(2).name(), "c.jpeg");
        assert_eq!(corpus.total_bytes(), 10);
    }

    #[test]
    fn test_load_no_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"#").unwrap();

        let err = Corpus::load(dir.path(), &exts()).unwrap_err();
        assert!(matches!(err, CorpusError::NoValidItems { .. }), "got {err:?}");
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Corpus::load(dir.path().join("absent"), &exts()).unwrap_err();
        assert!(matches!(err, CorpusError::ReadDir { .. }), "got {err:?}");
    }

    #[test]
    fn test_from_entries_rejects_empty() {
        let empty: Vec<(String, Vec<u8>)> = Vec::new();
        assert!(Corpus::from_entries(empty).is_err());
    }
}
