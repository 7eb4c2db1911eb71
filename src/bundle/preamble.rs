//! Fixed runtime wrapped around every assembled preview.
//!
//! The page loads React, ReactDOM and an in-browser TSX transpiler, installs a
//! global error listener and a crash boundary, then compiles and runs the
//! bundled source inside a guarded `try`. When framed, the page posts a
//! [`STATUS_MESSAGE`] with its outcome to the parent window.

/// Attribute set on whichever error panel is showing. The sandbox probe looks for it.
pub const ERROR_MARKER: &str = r#"data-preview-error="visible""#;

/// Id of the global error panel.
pub const ERROR_PANEL_ID: &str = "__preview_error";

/// Id of the element the root component renders into.
pub const ROOT_ID: &str = "root";

/// `type` of the status message a framed preview posts to its parent.
pub const STATUS_MESSAGE: &str = "livepreview-status";

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1" />
<title>Preview</title>
<script src="https://cdn.tailwindcss.com"></script>
<script crossorigin src="https://unpkg.com/react@18.3.1/umd/react.development.js"></script>
<script crossorigin src="https://unpkg.com/react-dom@18.3.1/umd/react-dom.development.js"></script>
<script src="https://unpkg.com/@babel/standalone@7.26.4/babel.min.js"></script>
<style id="__preview_base">
#__preview_error { position: fixed; inset: 0; overflow: auto; padding: 24px; background: #1f1416; color: #ffd7d7; font: 13px/1.5 ui-monospace, SFMono-Regular, Menlo, monospace; }
#__preview_error h2 { margin: 0 0 12px; font-size: 15px; color: #ff8a8a; }
#__preview_error pre, .__preview_boundary pre { white-space: pre-wrap; word-break: break-word; }
.__preview_boundary { margin: 16px; padding: 16px; border: 1px solid #f3a5a5; border-radius: 8px; background: #fff4f4; color: #8a1c1c; font: 13px/1.5 ui-monospace, monospace; }
</style>
"#;

const BODY_OPEN: &str = r#"</head>
<body>
<div id="root"></div>
<div id="__preview_error" hidden>
<h2>Preview crashed</h2>
<pre id="__preview_error_message"></pre>
</div>
"#;

const RUNTIME: &str = r#"<script>
(function () {
  function format(err) {
    if (!err) return "Unknown error";
    if (err.stack) return String(err.stack);
    if (err.message) return String(err.message);
    return String(err);
  }
  function showError(err) {
    var root = document.getElementById("root");
    if (root) root.style.display = "none";
    var panel = document.getElementById("__preview_error");
    document.getElementById("__preview_error_message").textContent = format(err);
    panel.hidden = false;
    panel.setAttribute("data-preview-error", "visible");
    report();
  }
  function report() {
    if (window.parent === window) return;
    var root = document.getElementById("root");
    var panel = document.getElementById("__preview_error");
    var boundary = document.querySelector(".__preview_boundary pre");
    var status = { type: "livepreview-status", state: "rendered", message: "", text: root ? root.textContent : "" };
    if (panel && !panel.hidden) {
      status.state = "crashed";
      status.message = document.getElementById("__preview_error_message").textContent;
    } else if (boundary) {
      status.state = "crashed";
      status.message = boundary.textContent;
    }
    window.parent.postMessage(status, "*");
  }
  window.addEventListener("error", function (e) { showError(e.error || e.message); });
  window.addEventListener("unhandledrejection", function (e) { showError(e.reason); });
  var CrashBoundary = null;
  if (window.React) {
    CrashBoundary = class extends React.Component {
      constructor(props) { super(props); this.state = { error: null }; }
      static getDerivedStateFromError(error) { return { error: error }; }
      componentDidCatch(error) { console.error(error); setTimeout(report, 0); }
      render() {
        if (!this.state.error) return this.props.children;
        return React.createElement("div", { className: "__preview_boundary", "data-preview-error": "visible" },
          React.createElement("strong", null, "A component failed to render"),
          React.createElement("pre", null, format(this.state.error)));
      }
    };
  }
  window.__preview = { showError: showError, report: report, CrashBoundary: CrashBoundary };
})();
</script>
"#;

const BOOT: &str = r#"<script>
(function () {
  var helpers = "const { useState, useEffect, useRef, useMemo, useCallback, useContext, useReducer, useLayoutEffect, createContext, forwardRef, memo, Fragment } = React;\n";
  try {
    var compiled = Babel.transform(window.__PREVIEW_SOURCE__, {
      presets: [["typescript", { isTSX: true, allExtensions: true }], "react"],
      filename: "preview.tsx"
    }).code;
    var rootName = window.__PREVIEW_ROOT__;
    var factory = new Function("React", "ReactDOM",
      helpers + compiled + "\nreturn typeof " + rootName + " !== 'undefined' ? " + rootName + " : undefined;");
    var Root = factory(React, ReactDOM);
    if (typeof Root !== "function") throw new Error("Root component `" + rootName + "` is not defined");
    var tree = React.createElement(Root);
    if (window.__preview.CrashBoundary) tree = React.createElement(window.__preview.CrashBoundary, null, tree);
    ReactDOM.createRoot(document.getElementById("root")).render(tree);
    setTimeout(window.__preview.report, 250);
  } catch (err) {
    window.__preview.showError(err);
  }
})();
</script>
</body>
</html>
"#;

/// Render the full document from its already-prepared parts.
pub(crate) fn render(stylesheet: &str, source: &str, root_component: &str) -> String {
    let mut html = String::with_capacity(HEAD.len() + RUNTIME.len() + BOOT.len() + stylesheet.len() + source.len() + 256);
    html.push_str(HEAD);
    html.push_str("<style id=\"__preview_styles\">\n");
    html.push_str(&stylesheet.replace("</style", "<\\/style"));
    html.push_str("\n</style>\n");
    html.push_str(BODY_OPEN);
    html.push_str(RUNTIME);
    html.push_str("<script>\nwindow.__PREVIEW_SOURCE__ = ");
    html.push_str(&script_string(source));
    html.push_str(";\nwindow.__PREVIEW_ROOT__ = ");
    html.push_str(&script_string(root_component));
    html.push_str(";\n</script>\n");
    html.push_str(BOOT);
    html
}

/// JSON string literal that is safe inside an inline `<script>`.
fn script_string(text: &str) -> String {
    serde_json::Value::String(text.to_string())
        .to_string()
        .replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_string_cannot_close_the_tag() {
        let s = script_string("</script><script>alert(1)</script>");
        assert!(!s.contains("</script"));
        assert!(s.starts_with('"') && s.ends_with('"'));
    }

    #[test]
    fn render_embeds_parts_in_order() {
        let html = render("body{}", "function App(){}", "App");
        let css = html.find("body{}").unwrap();
        let src = html.find("function App(){}").unwrap();
        let boot = html.find("Babel.transform").unwrap();
        assert!(css < src && src < boot);
        assert!(html.contains("window.__PREVIEW_ROOT__ = \"App\""));
        assert!(html.contains(ERROR_PANEL_ID));
    }

    #[test]
    fn runtime_reports_status_to_parent() {
        let html = render("", "function App(){}", "App");
        assert!(html.contains(&format!("type: \"{STATUS_MESSAGE}\"")));
        assert!(html.contains("window.parent.postMessage(status, \"*\")"));
    }

    #[test]
    fn stylesheet_cannot_close_style_tag() {
        let html = render("a{}</style><script>x()</script>", "", "App");
        assert!(!html.contains("</style><script>x()"));
    }
}
