//! Post-normalization syntax check.
//!
//! Findings are advisory: a file that fails to parse is still bundled and any
//! real failure shows up as a preview crash.

use serde::Serialize;
use tree_sitter::{Language, Parser};

/// A file whose normalized source did not parse cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: String,
    /// 1-based lines holding error or missing nodes.
    pub error_lines: Vec<u32>,
}

fn language_for(path: &str) -> Option<Language> {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext {
        "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" | "mjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        _ => None,
    }
}

/// Parse `source` with the grammar matching `path`.
/// Returns `None` for clean sources and unknown extensions.
#[must_use]
pub fn check(path: &str, source: &str) -> Option<Diagnostic> {
    let language = language_for(path)?;
    let mut parser = Parser::new();
    parser.set_language(&language).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }
    Some(Diagnostic {
        path: path.to_string(),
        error_lines: find_error_lines(root),
    })
}

fn find_error_lines(root: tree_sitter::Node) -> Vec<u32> {
    let mut errors = Vec::new();
    let mut cursor = root.walk();

    fn visit(cursor: &mut tree_sitter::TreeCursor, errors: &mut Vec<u32>) {
        loop {
            let node = cursor.node();
            if node.is_error() || node.is_missing() {
                let line = node.start_position().row as u32 + 1;
                if !errors.contains(&line) {
                    errors.push(line);
                }
            }
            if cursor.goto_first_child() {
                visit(cursor, errors);
                cursor.goto_parent();
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }

    visit(&mut cursor, &mut errors);
    errors.sort_unstable();
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_tsx_has_no_diagnostic() {
        let src = "function App(): JSX.Element {\n  const [n, setN] = useState<number>(0);\n  return <h1 onClick={() => setN(n + 1)}>Hello {n}</h1>;\n}\n";
        assert_eq!(check("src/App.tsx", src), None);
    }

    #[test]
    fn broken_source_reports_lines() {
        let src = "function App() {\n  return <div>;\n";
        let diag = check("src/App.jsx", src).unwrap();
        assert_eq!(diag.path, "src/App.jsx");
        assert!(!diag.error_lines.is_empty());
    }

    #[test]
    fn unknown_extension_is_skipped() {
        assert_eq!(check("README.md", "{{{"), None);
    }
}
