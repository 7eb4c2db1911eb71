use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::bundle::diagnostics::{self, Diagnostic};
use crate::bundle::normalizer::{default_export_name, LexicalNormalizer, Normalizer};
use crate::bundle::preamble;
use crate::bundle::stylesheet::strip_build_at_rules;
use crate::config::PipelineSettings;
use crate::models::FileTable;

/// Root component used when the entry file has no recognizable default export.
const FALLBACK_ROOT: &str = "App";

const SCRIPT_EXTENSIONS: [&str; 4] = [".js", ".jsx", ".ts", ".tsx"];

/// One self-contained, executable preview page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewDocument {
    pub html: String,
    /// SHA-256 of `html`, hex-encoded.
    pub digest: String,
}

impl PreviewDocument {
    fn new(html: String) -> Self {
        let digest = hash_bytes(html.as_bytes());
        Self { html, digest }
    }
}

/// What went into a document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub components: Vec<String>,
    pub entry_present: bool,
    pub stylesheet_present: bool,
    pub root_component: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    pub document: PreviewDocument,
    pub report: AssemblyReport,
}

/// Builds preview documents from a file table.
///
/// Assembly is pure: the same table always yields a byte-identical document.
#[derive(Debug, Clone)]
pub struct BundleAssembler<N = LexicalNormalizer> {
    layout: PipelineSettings,
    normalizer: N,
    diagnostics: bool,
}

impl BundleAssembler<LexicalNormalizer> {
    #[must_use]
    pub fn new(layout: PipelineSettings) -> Self {
        Self::with_normalizer(layout, LexicalNormalizer)
    }
}

impl<N: Normalizer> BundleAssembler<N> {
    #[must_use]
    pub fn with_normalizer(layout: PipelineSettings, normalizer: N) -> Self {
        Self {
            layout,
            normalizer,
            diagnostics: true,
        }
    }

    /// Enable or disable the post-normalization syntax check.
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &PipelineSettings {
        &self.layout
    }

    pub fn assemble(&self, files: &FileTable) -> Assembly {
        let stylesheet_src = files.get(&self.layout.stylesheet_path);
        let stylesheet = stylesheet_src.map(strip_build_at_rules).unwrap_or_default();

        let mut components: Vec<(&str, &str)> = files
            .iter()
            .filter(|f| self.is_component(&f.path))
            .map(|f| (f.path.as_str(), f.content.as_str()))
            .collect();
        components.sort_unstable_by(|a, b| a.0.cmp(b.0));

        // Order is preserved by the indexed collect.
        let normalized: Vec<(&str, String)> = components
            .par_iter()
            .map(|(path, content)| (*path, self.normalizer.normalize(content)))
            .collect();

        let entry_src = files.get(&self.layout.entry_path);
        let entry = entry_src.map(|src| self.normalizer.normalize(src)).unwrap_or_default();
        let root_component = entry_src
            .and_then(default_export_name)
            .unwrap_or_else(|| FALLBACK_ROOT.to_string());

        let mut source = String::new();
        for (path, code) in &normalized {
            push_section(&mut source, path, code);
        }
        if entry_src.is_some() {
            push_section(&mut source, &self.layout.entry_path, &entry);
        }

        let diagnostics = if self.diagnostics {
            self.check(&normalized, entry_src.map(|_| entry.as_str()))
        } else {
            Vec::new()
        };

        let html = preamble::render(&stylesheet, &source, &root_component);
        let document = PreviewDocument::new(html);
        debug!(
            components = normalized.len(),
            entry = entry_src.is_some(),
            digest = %document.digest,
            "assembled preview document"
        );

        Assembly {
            document,
            report: AssemblyReport {
                components: normalized.iter().map(|(p, _)| (*p).to_string()).collect(),
                entry_present: entry_src.is_some(),
                stylesheet_present: stylesheet_src.is_some(),
                root_component,
                diagnostics,
            },
        }
    }

    fn is_component(&self, path: &str) -> bool {
        let dir = self.layout.components_dir.trim_end_matches('/');
        path.strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
            && SCRIPT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    fn check(&self, components: &[(&str, String)], entry: Option<&str>) -> Vec<Diagnostic> {
        let mut found: Vec<Diagnostic> = components
            .par_iter()
            .filter_map(|(path, code)| diagnostics::check(path, code))
            .collect();
        if let Some(code) = entry {
            found.extend(diagnostics::check(&self.layout.entry_path, code));
        }
        for d in &found {
            warn!(path = %d.path, lines = ?d.error_lines, "normalized source does not parse cleanly");
        }
        found
    }
}

fn push_section(out: &mut String, path: &str, code: &str) {
    out.push_str("// ---- ");
    out.push_str(path);
    out.push_str(" ----\n");
    out.push_str(code);
    if !code.ends_with('\n') {
        out.push('\n');
    }
}

/// Compute SHA-256 hash of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
