//! Script-only permission set and iframe embedding.

use crate::bundle::preamble::{ERROR_PANEL_ID, ROOT_ID, STATUS_MESSAGE};
use crate::bundle::PreviewDocument;

/// Capabilities granted to the preview context.
///
/// Storage, same-origin access and top-level navigation stay off; only
/// scripts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub allow_scripts: bool,
    pub allow_modals: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_scripts: true,
            allow_modals: false,
        }
    }
}

impl SandboxPolicy {
    /// Value for the iframe `sandbox` attribute.
    #[must_use]
    pub fn attribute(&self) -> String {
        let mut tokens = Vec::new();
        if self.allow_scripts {
            tokens.push("allow-scripts");
        }
        if self.allow_modals {
            tokens.push("allow-modals");
        }
        tokens.join(" ")
    }
}

/// Markup for hosting the document inside a sandboxed iframe.
#[must_use]
pub fn embed_markup(document: &PreviewDocument, policy: &SandboxPolicy) -> String {
    format!(
        "<iframe title=\"Preview\" sandbox=\"{}\" referrerpolicy=\"no-referrer\" data-digest=\"{}\" srcdoc=\"{}\"></iframe>",
        policy.attribute(),
        document.digest,
        escape_attribute(&document.html)
    )
}

/// Top-level page the sandbox loads: the document framed under `policy`, plus
/// a mirror of the frame's reported status.
///
/// The framed preview cannot touch the host page, so it posts its outcome and
/// root text; the host writes them into its own root and error panel where a
/// DOM snapshot can read them.
#[must_use]
pub fn host_page(document: &PreviewDocument, policy: &SandboxPolicy) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<title>Preview host</title>
</head>
<body>
{frame}
<div id="{ROOT_ID}"></div>
<div id="{ERROR_PANEL_ID}" hidden>
<pre id="{ERROR_PANEL_ID}_message"></pre>
</div>
<script>
(function () {{
  var frame = document.querySelector("iframe");
  window.addEventListener("message", function (e) {{
    if (!frame || e.source !== frame.contentWindow) return;
    var status = e.data;
    if (!status || status.type !== "{STATUS_MESSAGE}") return;
    document.getElementById("{ROOT_ID}").textContent = status.text || "";
    var panel = document.getElementById("{ERROR_PANEL_ID}");
    if (status.state === "crashed") {{
      document.getElementById("{ERROR_PANEL_ID}_message").textContent = status.message || "preview crashed";
      panel.hidden = false;
      panel.setAttribute("data-preview-error", "visible");
    }} else {{
      panel.hidden = true;
      panel.removeAttribute("data-preview-error");
    }}
  }});
}})();
</script>
</body>
</html>
"#,
        frame = embed_markup(document, policy),
    )
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + value.len() / 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
