use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bundle::Assembly;
use crate::sandbox::browser::{ContextFactory, ExecutionContext};
use crate::sandbox::policy::{host_page, SandboxPolicy};
use crate::sandbox::probe::{self, Probe};

/// What the preview pane currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SandboxState {
    /// No entry file yet.
    Empty,
    /// Document assigned, load pending.
    Rendering,
    /// Loaded without an error signal.
    Rendered,
    /// An error panel is visible, or the context could not run the document.
    Crashed { message: String },
}

/// Sole owner of the preview execution context.
///
/// Every mount discards the previous context and builds a new one; nothing
/// carries over between documents. Documents always run framed under the
/// host's [`SandboxPolicy`].
pub struct SandboxHost<F: ContextFactory> {
    factory: F,
    policy: SandboxPolicy,
    context: Option<F::Context>,
    state: SandboxState,
    generation: u64,
    digest: Option<String>,
    dom: Option<String>,
}

impl<F: ContextFactory> SandboxHost<F> {
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self::with_policy(factory, SandboxPolicy::default())
    }

    #[must_use]
    pub fn with_policy(factory: F, policy: SandboxPolicy) -> Self {
        Self {
            factory,
            policy,
            context: None,
            state: SandboxState::Empty,
            generation: 0,
            digest: None,
            dom: None,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    #[must_use]
    pub fn state(&self) -> &SandboxState {
        &self.state
    }

    /// Counter identifying the current mount.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Digest of the mounted document.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Visible text of the root element from the last snapshot.
    #[must_use]
    pub fn visible_text(&self) -> Option<String> {
        self.dom.as_deref().map(probe::root_text)
    }

    /// Tear down the current context and render `assembly` in a new one.
    ///
    /// Never fails: backend problems are reported as [`SandboxState::Crashed`].
    pub async fn mount(&mut self, assembly: &Assembly) -> &SandboxState {
        self.teardown();
        self.generation += 1;
        let generation = self.generation;

        if !assembly.report.entry_present {
            debug!(generation, "no entry file; preview stays empty");
            self.state = SandboxState::Empty;
            return &self.state;
        }

        self.state = SandboxState::Rendering;
        self.digest = Some(assembly.document.digest.clone());
        info!(generation, digest = %assembly.document.digest, "mounting preview");

        let page = host_page(&assembly.document, &self.policy);
        let loaded = match self.factory.create() {
            Ok(context) => {
                let context = self.context.insert(context);
                context.load(&page).await
            }
            Err(e) => Err(e),
        };

        self.state = match loaded {
            Ok(dom) => {
                let verdict = probe::classify(&dom);
                self.dom = Some(dom);
                match verdict {
                    Probe::Rendered => SandboxState::Rendered,
                    Probe::Crashed { message } => SandboxState::Crashed { message },
                }
            }
            Err(e) => SandboxState::Crashed {
                message: e.to_string(),
            },
        };
        match &self.state {
            SandboxState::Crashed { message } => warn!(generation, %message, "preview crashed"),
            state => info!(generation, ?state, "preview mounted"),
        }
        &self.state
    }

    /// Drop the current context, if any.
    pub fn teardown(&mut self) {
        if self.context.take().is_some() {
            debug!(generation = self.generation, "execution context torn down");
        }
        self.dom = None;
        self.digest = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bundle::preamble::ERROR_MARKER;
    use crate::bundle::BundleAssembler;
    use crate::config::PipelineSettings;
    use crate::error::{PreviewError, Result};
    use crate::models::{FileTable, ProjectFile};

    /// Scripted stand-in for a browser.
    ///
    /// Reads the framed document out of the host page. A source that throws
    /// during render is mirrored as a crash; otherwise the first `<h1>` in the
    /// source becomes the host root's text.
    #[derive(Clone, Default)]
    struct ScriptedFactory {
        live: Arc<AtomicUsize>,
        created: Arc<AtomicUsize>,
        fail_launch: bool,
        loaded: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedContext {
        live: Arc<AtomicUsize>,
        loaded: Arc<Mutex<Vec<String>>>,
    }

    impl Drop for ScriptedContext {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ContextFactory for ScriptedFactory {
        type Context = ScriptedContext;

        fn create(&self) -> Result<ScriptedContext> {
            if self.fail_launch {
                return Err(PreviewError::Sandbox {
                    detail: "browser not found".into(),
                });
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedContext {
                live: Arc::clone(&self.live),
                loaded: Arc::clone(&self.loaded),
            })
        }
    }

    impl ExecutionContext for ScriptedContext {
        async fn load(&mut self, html: &str) -> Result<String> {
            self.loaded.lock().unwrap().push(html.to_string());
            let framed = html
                .split("srcdoc=\"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .map(unescape_attribute)
                .unwrap_or_default();
            let source = framed
                .split("window.__PREVIEW_SOURCE__ = ")
                .nth(1)
                .and_then(|rest| rest.split(";\nwindow.__PREVIEW_ROOT__").next())
                .map(|json| serde_json::from_str::<String>(json).unwrap())
                .unwrap_or_default();
            if let Some(at) = source.find("throw new Error(\"") {
                let rest = &source[at + 17..];
                let message = &rest[..rest.find('"').unwrap_or(rest.len())];
                return Ok(format!(
                    "<div id=\"root\"></div>\n<div id=\"__preview_error\" {ERROR_MARKER}><pre id=\"__preview_error_message\">Error: {message}</pre></div>"
                ));
            }
            let heading = source
                .find("<h1>")
                .and_then(|s| source[s..].find("</h1>").map(|e| &source[s..s + e + 5]))
                .unwrap_or("");
            Ok(format!(
                "<div id=\"root\">{heading}</div>\n<div id=\"__preview_error\" hidden=\"\"><pre id=\"__preview_error_message\"></pre></div>"
            ))
        }
    }

    fn unescape_attribute(value: &str) -> String {
        value
            .replace("&quot;", "\"")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
    }

    fn assemble(files: &[(&str, &str)]) -> Assembly {
        let table = FileTable::from_files(files.iter().map(|(p, c)| ProjectFile {
            path: (*p).to_string(),
            content: (*c).to_string(),
        }));
        BundleAssembler::new(PipelineSettings::default()).assemble(&table)
    }

    #[tokio::test]
    async fn no_entry_file_stays_empty() {
        let mut host = SandboxHost::new(ScriptedFactory::default());
        let state = host
            .mount(&assemble(&[("src/components/A.tsx", "const A = 1;")]))
            .await;
        assert_eq!(state, &SandboxState::Empty);
    }

    #[tokio::test]
    async fn hello_page_renders() {
        let mut host = SandboxHost::new(ScriptedFactory::default());
        let assembly = assemble(&[(
            "src/App.tsx",
            "export default function App() {\n  return <h1>Hello</h1>;\n}\n",
        )]);
        assert_eq!(host.mount(&assembly).await, &SandboxState::Rendered);
        assert_eq!(host.visible_text().as_deref(), Some("Hello"));
        assert_eq!(host.digest(), Some(assembly.document.digest.as_str()));
    }

    #[tokio::test]
    async fn throwing_component_is_contained() {
        let mut host = SandboxHost::new(ScriptedFactory::default());
        let assembly = assemble(&[(
            "src/App.tsx",
            "export default function App() {\n  throw new Error(\"boom\");\n}\n",
        )]);
        let state = host.mount(&assembly).await.clone();
        assert_eq!(
            state,
            SandboxState::Crashed {
                message: "Error: boom".into()
            }
        );
    }

    #[tokio::test]
    async fn every_mount_replaces_the_context() {
        let factory = ScriptedFactory::default();
        let mut host = SandboxHost::new(factory.clone());
        let assembly = assemble(&[("src/App.tsx", "export default function App() { return null; }")]);

        host.mount(&assembly).await;
        host.mount(&assembly).await;
        host.mount(&assembly).await;

        assert_eq!(host.generation(), 3);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert_eq!(factory.live.load(Ordering::SeqCst), 1);

        host.teardown();
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn launch_failure_becomes_crashed_state() {
        let factory = ScriptedFactory {
            fail_launch: true,
            ..ScriptedFactory::default()
        };
        let mut host = SandboxHost::new(factory);
        let assembly = assemble(&[("src/App.tsx", "export default function App() { return null; }")]);
        match host.mount(&assembly).await {
            SandboxState::Crashed { message } => assert!(message.contains("browser not found")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_runs_framed_under_the_policy() {
        let factory = ScriptedFactory::default();
        let mut host = SandboxHost::new(factory.clone());
        let assembly = assemble(&[(
            "src/App.tsx",
            "export default function App() {\n  localStorage.setItem(\"k\", \"v\");\n  return <h1>Hi</h1>;\n}\n",
        )]);
        host.mount(&assembly).await;

        let loaded = factory.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        let page = &loaded[0];
        assert_ne!(page, &assembly.document.html);
        assert!(page.contains("sandbox=\"allow-scripts\""));
        assert!(!page.contains("allow-same-origin"));
        assert!(!page.contains("allow-top-navigation"));
        assert!(!page.contains("<script>\nwindow.__PREVIEW_SOURCE__"));
        assert_eq!(host.policy(), &SandboxPolicy::default());
    }
}
