use serde::{Deserialize, Serialize};

/// One complete file record extracted from a model response.
///
/// Content is always the full file; there are no partial patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

impl FileEdit {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A project file: slash-delimited path plus full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
}

/// The project's file table. Paths are unique; insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTable {
    files: Vec<ProjectFile>,
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from stored entries. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_files(files: impl IntoIterator<Item = ProjectFile>) -> Self {
        let mut table = Self::new();
        for f in files {
            table.put(&f.path, &f.content);
        }
        table
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectFile> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Replace the content at `path` or append a new entry.
    /// Returns `true` when the table changed.
    pub(crate) fn put(&mut self, path: &str, content: &str) -> bool {
        if let Some(existing) = self.files.iter_mut().find(|f| f.path == path) {
            if existing.content == content {
                return false;
            }
            content.clone_into(&mut existing.content);
            return true;
        }
        self.files.push(ProjectFile {
            path: path.to_string(),
            content: content.to_string(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_appends_then_replaces() {
        let mut t = FileTable::new();
        assert!(t.put("src/App.tsx", "a"));
        assert!(t.put("src/index.css", "b"));
        assert!(t.put("src/App.tsx", "c"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.get("src/App.tsx"), Some("c"));
        assert_eq!(t.paths().collect::<Vec<_>>(), ["src/App.tsx", "src/index.css"]);
    }

    #[test]
    fn put_same_content_is_unchanged() {
        let mut t = FileTable::new();
        t.put("a.ts", "x");
        assert!(!t.put("a.ts", "x"));
    }

    #[test]
    fn from_files_keeps_last_duplicate() {
        let t = FileTable::from_files(vec![
            ProjectFile {
                path: "a".into(),
                content: "1".into(),
            },
            ProjectFile {
                path: "a".into(),
                content: "2".into(),
            },
        ]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("a"), Some("2"));
    }

    #[test]
    fn serializes_as_list() {
        let mut t = FileTable::new();
        t.put("a", "1");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"[{"path":"a","content":"1"}]"#);
    }
}
