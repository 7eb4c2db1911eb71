//! Removes stylesheet at-rules that only work inside a CSS build pipeline.

use tracing::debug;

/// At-rules removed as `@name …;` statements.
const STATEMENT_RULES: [&str; 5] = ["import", "tailwind", "config", "plugin", "apply"];

/// At-rules removed together with their `{ … }` block.
const BLOCK_RULES: [&str; 2] = ["theme", "layer"];

/// Strip build-time at-rules. Every other byte passes through.
#[must_use]
pub fn strip_build_at_rules(css: &str) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut i = 0;
    let mut copied_from = 0;
    let mut stripped = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = css[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            continue;
        }
        if bytes[i] != b'@' || !at_boundary(bytes, i) {
            i += 1;
            continue;
        }
        let name_end = i + 1 + css[i + 1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(bytes.len() - i - 1);
        let name = &css[i + 1..name_end];

        let end = if STATEMENT_RULES.contains(&name) {
            statement_end(css, name_end)
        } else if BLOCK_RULES.contains(&name) {
            block_end(css, name_end)
        } else {
            i = name_end;
            continue;
        };

        out.push_str(&css[copied_from..i]);
        let line_start = trim_trailing_indent(&mut out);
        let mut resume = end;
        if line_start {
            resume = skip_rest_of_blank_line(css, end);
        }
        stripped += 1;
        i = resume;
        copied_from = resume;
    }
    out.push_str(&css[copied_from..]);
    if stripped > 0 {
        debug!(stripped, "removed build-time at-rules from stylesheet");
    }
    out
}

fn at_boundary(bytes: &[u8], i: usize) -> bool {
    i == 0 || matches!(bytes[i - 1], b' ' | b'\t' | b'\n' | b'\r' | b';' | b'{' | b'}')
}

/// End (exclusive) of a `;`-terminated statement, or the end of its line.
fn statement_end(css: &str, from: usize) -> usize {
    let rest = &css[from..];
    match (rest.find(';'), rest.find(['{', '}', '\n'])) {
        (Some(semi), Some(other)) if other < semi => from + other,
        (Some(semi), _) => from + semi + 1,
        (None, Some(other)) => from + other,
        (None, None) => css.len(),
    }
}

/// End (exclusive) of a block at-rule including its braces.
fn block_end(css: &str, from: usize) -> usize {
    let rest = &css[from..];
    let Some(open) = rest.find(['{', ';']) else {
        return css.len();
    };
    if rest.as_bytes()[open] == b';' {
        return from + open + 1;
    }
    let mut depth = 0usize;
    for (offset, b) in rest.as_bytes()[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return from + open + offset + 1;
                }
            }
            _ => {}
        }
    }
    css.len()
}

/// Drop indentation already copied for the current line.
/// Returns true when the stripped rule starts its line.
fn trim_trailing_indent(out: &mut String) -> bool {
    let trimmed_len = out.trim_end_matches([' ', '\t']).len();
    let at_line_start = trimmed_len == 0 || out[..trimmed_len].ends_with('\n');
    if at_line_start {
        out.truncate(trimmed_len);
    }
    at_line_start
}

fn skip_rest_of_blank_line(css: &str, from: usize) -> usize {
    let rest = &css[from..];
    let spaces = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    let after = &rest[spaces..];
    if let Some(stripped) = after.strip_prefix("\r\n") {
        css.len() - stripped.len()
    } else if let Some(stripped) = after.strip_prefix('\n') {
        css.len() - stripped.len()
    } else if after.is_empty() {
        css.len()
    } else {
        from
    }
}
