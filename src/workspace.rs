//! Moving file tables between the store and a directory on disk.

use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PreviewError, Result};
use crate::models::{FileTable, ProjectFile};
use crate::pipeline::canonical_path;

const IMPORT_EXTENSIONS: [&str; 9] = ["tsx", "ts", "jsx", "js", "mjs", "css", "json", "html", "md"];

/// Files larger than this are not imported.
const MAX_IMPORT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub written: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

/// Read a source tree into a file table, respecting .gitignore.
pub fn import_dir(root: &Path) -> Result<FileTable> {
    if !root.is_dir() {
        return Err(PreviewError::FileNotFound {
            path: root.display().to_string(),
        });
    }
    let mut entries: Vec<PathBuf> = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .follow_links(false)
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !matches!(
                name.as_ref(),
                "node_modules" | ".livepreview" | ".git" | "dist" | "build" | ".next" | "coverage"
            )
        })
        .build()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMPORT_EXTENSIONS.contains(&ext))
        })
        .map(ignore::DirEntry::into_path)
        .collect();
    entries.sort();

    let files: Vec<ProjectFile> = entries
        .par_iter()
        .filter_map(|path| {
            let size = path.metadata().ok()?.len();
            if size > MAX_IMPORT_BYTES {
                warn!(path = %path.display(), size, "skipping large file");
                return None;
            }
            let content = std::fs::read_to_string(path).ok()?;
            let relative = path.strip_prefix(root).ok()?;
            Some(ProjectFile {
                path: canonical_path(&relative.to_string_lossy()),
                content,
            })
        })
        .collect();
    debug!(root = %root.display(), files = files.len(), "imported directory");
    Ok(FileTable::from_files(files))
}

/// Write every file below `dest`. Each write goes to a temp file first and is
/// renamed into place. Paths escaping `dest` are skipped.
pub fn export_dir(files: &FileTable, dest: &Path) -> Result<ExportReport> {
    let mut report = ExportReport::default();
    for file in files.iter() {
        let Some(target) = resolve_inside(dest, &file.path) else {
            warn!(path = %file.path, "refusing to export path outside the destination");
            report.skipped.push(file.path.clone());
            continue;
        };
        write_atomic(&target, &file.content)?;
        report.written += 1;
    }
    Ok(report)
}

fn resolve_inside(dest: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    let normal = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (normal && !path.is_empty()).then(|| dest.join(relative))
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(
        ".livepreview_tmp_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    std::fs::write(&temp_path, content)?;

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
