//! Lexical removal of module syntax from generated UI sources.
//!
//! Only top-level lines (column 0) are considered. A line that does not match
//! one of the recognized forms is copied byte-for-byte.
//!
//! | form | result |
//! | --- | --- |
//! | `import 'x'` / `import A from 'x'` / `import { a } from 'x'` / `import * as N from 'x'` | removed |
//! | multi-line `import { … } from 'x'` | removed through the line holding the path |
//! | `export default function Name(` | `function Name(` |
//! | `export default Name;` | removed |
//! | `export { a, b }` / `export { a } from 'x'` | removed |
//! | `export const` / `function` / `class` / `let` / `type` / `interface` / `enum` | qualifier stripped |
//!
//! Dynamic or conditional imports are outside this grammar and stay as written.
//! Lines that start inside a template literal or a block comment are copied
//! unchanged; string and comment boundaries are tracked across lines for that.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

/// Longest multi-line statement the normalizer will join before giving up.
const MAX_STATEMENT_LINES: usize = 200;

const IDENT: &str = r"[A-Za-z_$][\w$]*";

static IMPORT_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    let named = r"\{[^}]*\}";
    let namespace = format!(r"\*\s*as\s+{IDENT}");
    let clause = format!(
        r"(?:type\s+)?(?:{IDENT}(?:\s*,\s*(?:{named}|{namespace}))?|{named}|{namespace})"
    );
    let pattern = format!(
        r#"^import(?:\s+{clause}\s*from\s*|\s*)['"][^'"\n]+['"]\s*;?\s*(?://[^\n]*)?$"#
    );
    Regex::new(&pattern).expect("import regex must compile")
});

/// First line of an import whose binding list continues on later lines.
static IMPORT_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^import\s+(?:type\s+)?(?:{IDENT}\s*,\s*)?\{{[^}}]*$"
    ))
    .expect("import-open regex must compile")
});

static EXPORT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^export\s*(?:type\s+)?\{[^}]*\}\s*(?:from\s*['"][^'"\n]+['"])?\s*;?\s*(?://[^\n]*)?$"#,
    )
    .expect("export-list regex must compile")
});

static EXPORT_LIST_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^export\s+(?:type\s+)?\{[^}]*$").expect("export-list-open regex must compile")
});

static EXPORT_DEFAULT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^export\s+default\s+((?:async\s+)?function\s*\*?\s*{IDENT}|(?:abstract\s+)?class\s+{IDENT})"
    ))
    .expect("export-default-decl regex must compile")
});

static EXPORT_DEFAULT_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^export\s+default\s+({IDENT})\s*;?\s*(?://.*)?$"
    ))
    .expect("export-default-ident regex must compile")
});

static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^export\s+((?:const|let|var|function|async\s+function|class|abstract\s+class|interface|type|enum|declare)\b)",
    )
    .expect("export-decl regex must compile")
});

/// Rewrites one source file so it runs without a module loader.
///
/// Implementations must leave every line they do not recognize untouched.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, source: &str) -> String;
}

/// Pattern-based normalizer (no parse).
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalNormalizer;

impl Normalizer for LexicalNormalizer {
    fn normalize(&self, source: &str) -> String {
        normalize(source)
    }
}

/// Normalize with the default lexical rules.
#[must_use]
pub fn normalize(source: &str) -> String {
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let mut out = String::with_capacity(source.len());
    let mut lexer = LineLexer::default();
    let mut removed = 0usize;
    let mut rewritten = 0usize;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if lexer.inside_literal() {
            out.push_str(line);
            lexer.scan(line);
            i += 1;
            continue;
        }

        let next = match rewrite(&lines, i) {
            Rewrite::Remove(end) => {
                removed += end - i + 1;
                end + 1
            }
            Rewrite::Replace(offset) => {
                out.push_str(&line[offset..]);
                rewritten += 1;
                i + 1
            }
            Rewrite::Keep => {
                out.push_str(line);
                i + 1
            }
        };
        for consumed in &lines[i..next] {
            lexer.scan(consumed);
        }
        i = next;
    }

    trace!(removed, rewritten, "normalized source");
    out
}

enum Rewrite {
    /// Drop lines through the given index.
    Remove(usize),
    /// Keep the line from this byte offset on.
    Replace(usize),
    Keep,
}

fn rewrite(lines: &[&str], i: usize) -> Rewrite {
    let bare = strip_eol(lines[i]);

    if IMPORT_STATEMENT.is_match(bare)
        || EXPORT_LIST.is_match(bare)
        || EXPORT_DEFAULT_IDENT.is_match(bare)
    {
        return Rewrite::Remove(i);
    }
    if IMPORT_OPEN.is_match(bare) {
        if let Some(end) = statement_end(lines, i, &IMPORT_STATEMENT) {
            return Rewrite::Remove(end);
        }
    }
    if EXPORT_LIST_OPEN.is_match(bare) {
        if let Some(end) = statement_end(lines, i, &EXPORT_LIST) {
            return Rewrite::Remove(end);
        }
    }
    for pattern in [&*EXPORT_DEFAULT_DECL, &*EXPORT_DECL] {
        if let Some(decl) = pattern.captures(bare).and_then(|c| c.get(1)) {
            return Rewrite::Replace(decl.start());
        }
    }
    Rewrite::Keep
}

/// Tracks template literals, `${}` substitutions and block comments across lines.
///
/// Quoted strings and line comments end at the line break. Regex literals are
/// not recognized.
#[derive(Debug, Default)]
struct LineLexer {
    nesting: Vec<Nesting>,
    block_comment: bool,
}

#[derive(Debug, Clone, Copy)]
enum Nesting {
    Template,
    /// Open braces inside a `${` substitution.
    Substitution(u32),
}

impl LineLexer {
    fn inside_literal(&self) -> bool {
        self.block_comment || matches!(self.nesting.last(), Some(Nesting::Template))
    }

    fn scan(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let next = bytes.get(i + 1).copied();
            if self.block_comment {
                if b == b'*' && next == Some(b'/') {
                    self.block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            if let Some(Nesting::Template) = self.nesting.last() {
                match b {
                    b'\\' => i += 1,
                    b'`' => {
                        self.nesting.pop();
                    }
                    b'$' if next == Some(b'{') => {
                        self.nesting.push(Nesting::Substitution(0));
                        i += 1;
                    }
                    _ => {}
                }
                i += 1;
                continue;
            }
            match b {
                b'/' if next == Some(b'/') => return,
                b'/' if next == Some(b'*') => {
                    self.block_comment = true;
                    i += 1;
                }
                b'\'' | b'"' => i = skip_quoted(bytes, i),
                b'`' => self.nesting.push(Nesting::Template),
                b'{' => {
                    if let Some(Nesting::Substitution(depth)) = self.nesting.last_mut() {
                        *depth += 1;
                    }
                }
                b'}' => match self.nesting.last_mut() {
                    Some(Nesting::Substitution(0)) => {
                        self.nesting.pop();
                    }
                    Some(Nesting::Substitution(depth)) => *depth -= 1,
                    _ => {}
                },
                _ => {}
            }
            i += 1;
        }
    }
}

/// Index of the closing quote for the string opening at `start`, or the last byte.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' => return i,
            b if b == quote => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len().saturating_sub(1)
}

/// Find the line that completes a multi-line statement starting at `start`.
///
/// Lines are joined until the joined text matches `complete`. Returns `None`
/// if no such line exists within [`MAX_STATEMENT_LINES`].
fn statement_end(lines: &[&str], start: usize, complete: &Regex) -> Option<usize> {
    let mut joined = String::new();
    let last = lines.len().min(start + MAX_STATEMENT_LINES);
    for (offset, line) in lines[start..last].iter().enumerate() {
        if offset > 0 {
            joined.push('\n');
        }
        joined.push_str(strip_eol(line));
        if offset > 0 && complete.is_match(&joined) {
            return Some(start + offset);
        }
    }
    None
}

fn strip_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Name of the component the entry file exports as default, if declared lexically.
#[must_use]
pub fn default_export_name(source: &str) -> Option<String> {
    static NAMED_DECL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(
            r"(?m)^export\s+default\s+(?:async\s+)?(?:function\s*\*?|class)\s+({IDENT})"
        ))
        .expect("default-name regex must compile")
    });
    for line in source.lines() {
        if let Some(caps) = NAMED_DECL.captures(line) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
        if let Some(caps) = EXPORT_DEFAULT_IDENT.captures(line) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (input, expected) pairs covering every recognized form.
    const CASES: &[(&str, &str)] = &[
        // whole-module (side effect)
        ("import './index.css';\nconst a = 1;\n", "const a = 1;\n"),
        // default binding
        ("import React from 'react';\nconst a = 1;\n", "const a = 1;\n"),
        // namespace binding
        ("import * as Icons from \"lucide-react\"\nx();\n", "x();\n"),
        // named bindings
        ("import { useState, useEffect } from 'react';\n", ""),
        // default + named
        ("import React, { useState } from 'react'; // hooks\nok\n", "ok\n"),
        // type-only import
        ("import type { Props } from './types';\nok\n", "ok\n"),
        // multi-line import, matched through its path string
        (
            "import {\n  Card,\n  CardHeader,\n} from './components/Card';\nrender();\n",
            "render();\n",
        ),
        // export default function declaration
        (
            "export default function App() {\n  return null;\n}\n",
            "function App() {\n  return null;\n}\n",
        ),
        // async default function
        (
            "export default async function load() {}\n",
            "async function load() {}\n",
        ),
        // bare default export of an identifier
        ("function App() {}\nexport default App;\n", "function App() {}\n"),
        // named re-export list
        ("const a = 1;\nexport { a };\nexport { b as c } from './b';\n", "const a = 1;\n"),
        // multi-line export list
        ("export {\n  a,\n  b,\n};\nx\n", "x\n"),
        // exported const / function / class / type
        (
            "export const Button = () => null;\nexport function helper() {}\nexport class Store {}\nexport interface Props { a: string }\nexport type Id = string;\n",
            "const Button = () => null;\nfunction helper() {}\nclass Store {}\ninterface Props { a: string }\ntype Id = string;\n",
        ),
    ];

    #[test]
    fn recognized_forms_transform_exactly() {
        for (input, expected) in CASES {
            assert_eq!(&normalize(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn source_without_module_syntax_is_byte_identical() {
        let src = "const a = 1;\r\nfunction b() {\n  return `import x from 'y'`;\n}\n\n  // export default nothing\nlet c = a + 1;";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn template_literal_lines_pass_through() {
        let src = "const snippet = `\nimport x from 'y';\nexport const z = 1;\n`;\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn code_after_a_closed_template_is_normalized() {
        let src = "const a = `line ${`inner`} ${b}\nexport const kept = 1;\n`;\nexport const c = 2;\n";
        assert_eq!(
            normalize(src),
            "const a = `line ${`inner`} ${b}\nexport const kept = 1;\n`;\nconst c = 2;\n"
        );
    }

    #[test]
    fn substitution_braces_do_not_end_the_template() {
        let src = "const s = `${fn({ a: 1 })}\nimport y from 'z';\n`;\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn block_comment_lines_pass_through() {
        let src = "/*\nimport a from 'a';\n*/\nimport b from 'b';\nok\n";
        assert_eq!(normalize(src), "/*\nimport a from 'a';\n*/\nok\n");
    }

    #[test]
    fn backtick_in_string_or_comment_opens_nothing() {
        let src = "const q = '`'; // `\nexport const a = 1;\n";
        assert_eq!(normalize(src), "const q = '`'; // `\nconst a = 1;\n");
    }

    #[test]
    fn indented_forms_are_not_top_level() {
        let src = "function f() {\n  import('./lazy');\n  export const x = 1;\n}\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn dynamic_and_conditional_imports_stay() {
        let src = "const mod = await import('./mod');\nif (x) require('y');\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn anonymous_default_export_stays() {
        let src = "export default function () {}\nexport default () => <div/>;\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn unterminated_multiline_import_passes_through() {
        let src = "import {\n  a,\n  b\nconst x = 1;\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn crlf_lines_keep_their_endings() {
        let src = "import a from 'a';\r\nexport const b = 1;\r\n";
        assert_eq!(normalize(src), "const b = 1;\r\n");
    }

    #[test]
    fn trait_object_delegates() {
        let n: &dyn Normalizer = &LexicalNormalizer;
        assert_eq!(n.normalize("export const a = 1;"), "const a = 1;");
    }

    #[test]
    fn default_export_name_forms() {
        assert_eq!(
            default_export_name("export default function Home() {}").as_deref(),
            Some("Home")
        );
        assert_eq!(
            default_export_name("function Page() {}\nexport default Page;\n").as_deref(),
            Some("Page")
        );
        assert_eq!(default_export_name("export default () => null;"), None);
    }
}
