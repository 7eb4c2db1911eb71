//! Classifies a captured DOM as rendered or crashed.

use std::sync::LazyLock;

use regex::Regex;

use crate::bundle::preamble::ERROR_MARKER;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script regex must compile")
});

/// Opening iframe tag; quoted attribute values may hold `>` (a framed `srcdoc`).
static IFRAME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<iframe\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("iframe regex must compile")
});

static PANEL_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<pre id="__preview_error_message">(.*?)</pre>"#)
        .expect("panel regex must compile")
});

static BOUNDARY_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)data-preview-error="visible"[^>]*>.*?<pre>(.*?)</pre>"#)
        .expect("boundary regex must compile")
});

static ROOT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div id="root"[^>]*>(.*?)</div>\s*<div id="__preview_error""#)
        .expect("root regex must compile")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex must compile"));

/// Verdict for one captured DOM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Rendered,
    Crashed { message: String },
}

/// Look for a visible error panel, ignoring script bodies and framed documents.
#[must_use]
pub fn classify(dom: &str) -> Probe {
    let markup = host_markup(dom);
    if !markup.contains(ERROR_MARKER) {
        return Probe::Rendered;
    }
    let message = PANEL_MESSAGE
        .captures(&markup)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|m| !m.is_empty())
        .or_else(|| {
            BOUNDARY_MESSAGE
                .captures(&markup)
                .map(|c| decode_entities(c[1].trim()))
        })
        .unwrap_or_else(|| "preview crashed".to_string());
    Probe::Crashed { message }
}

/// Text content of the root element, tags removed and whitespace collapsed.
#[must_use]
pub fn root_text(dom: &str) -> String {
    let markup = host_markup(dom);
    let Some(caps) = ROOT_BLOCK.captures(&markup) else {
        return String::new();
    };
    let text = TAG.replace_all(&caps[1], " ");
    decode_entities(&text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn host_markup(dom: &str) -> String {
    let markup = SCRIPT_BLOCK.replace_all(dom, "");
    IFRAME_TAG.replace_all(&markup, "<iframe>").into_owned()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
