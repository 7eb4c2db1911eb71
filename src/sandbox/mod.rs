pub mod browser;
pub mod host;
pub mod policy;
pub mod probe;

pub use browser::{BrowserContext, BrowserFactory, ContextFactory, ExecutionContext};
pub use host::{SandboxHost, SandboxState};
pub use policy::{embed_markup, host_page, SandboxPolicy};
pub use probe::Probe;
