use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PreviewError, Result};

/// Default directory name for livepreview state.
const STATE_DIR: &str = ".livepreview";
/// Default database filename.
const DB_FILE: &str = "projects.db";
/// Config filename.
const CONFIG_FILE: &str = "config.toml";

/// Workspace-level configuration resolved from the working directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the CLI was started in.
    pub workspace_root: PathBuf,
    /// Path to the `.livepreview/` directory.
    pub state_dir: PathBuf,
    /// Path to the `SQLite` project store.
    pub db_path: PathBuf,
    /// Path to the config file.
    pub config_path: PathBuf,
    /// User settings loaded from config.toml.
    pub settings: UserSettings,
}

/// User-configurable settings from .livepreview/config.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Owner recorded on newly created projects.
    pub owner: OwnerSettings,
    /// Well-known project paths.
    pub pipeline: PipelineSettings,
    /// Fallback phase timers.
    pub phases: PhaseSettings,
    /// Preview sandbox.
    pub sandbox: SandboxSettings,
    /// Text-completion collaborator.
    pub completion: CompletionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerSettings {
    pub name: String,
}

impl Default for OwnerSettings {
    fn default() -> Self {
        Self {
            name: "local".into(),
        }
    }
}

/// Fixed paths the assembler and aggregator look for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Root of the generated UI.
    pub entry_path: String,
    /// Stylesheet inlined into the preview.
    pub stylesheet_path: String,
    /// Every script file below this directory is bundled.
    pub components_dir: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            entry_path: "src/App.tsx".into(),
            stylesheet_path: "src/index.css".into(),
            components_dir: "src/components/".into(),
        }
    }
}

/// Delays (from turn start) after which the phase advances without markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    pub thinking_to_planning_ms: u64,
    pub planning_to_coding_ms: u64,
    /// How often the read loop wakes to check the timers while idle.
    pub tick_ms: u64,
    /// A flagged turn younger than this may still be streaming elsewhere and
    /// cannot be acknowledged as interrupted.
    pub turn_stale_after_ms: u64,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            thinking_to_planning_ms: 3_000,
            planning_to_coding_ms: 8_000,
            tick_ms: 250,
            turn_stale_after_ms: 600_000,
        }
    }
}

impl PhaseSettings {
    #[must_use]
    pub fn thinking_timeout(&self) -> Duration {
        Duration::from_millis(self.thinking_to_planning_ms)
    }

    #[must_use]
    pub fn planning_timeout(&self) -> Duration {
        Duration::from_millis(self.planning_to_coding_ms)
    }

    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(10))
    }

    #[must_use]
    pub fn turn_stale_after(&self) -> Duration {
        Duration::from_millis(self.turn_stale_after_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Headless browser executable.
    pub browser: String,
    /// Extra arguments appended after the defaults.
    pub extra_args: Vec<String>,
    /// Virtual time the page gets to run scripts before the DOM is captured.
    pub render_budget_ms: u64,
    /// Hard limit on the browser process.
    pub timeout_ms: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            browser: "chromium".into(),
            extra_args: Vec::new(),
            render_budget_ms: 5_000,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Streaming endpoint of the text-completion service.
    pub endpoint: String,
    /// Default model id.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/v1/generate".into(),
            model: "default".into(),
            api_key_env: "LIVEPREVIEW_API_KEY".into(),
        }
    }
}

impl CompletionSettings {
    /// API key from the configured environment variable, if set.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

impl Config {
    /// Create config for a given workspace root.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let state_dir = workspace_root.join(STATE_DIR);
        let db_path = state_dir.join(DB_FILE);
        let config_path = state_dir.join(CONFIG_FILE);

        // Try to load settings from config.toml
        let settings = Self::load_settings(&config_path).unwrap_or_default();

        Self {
            workspace_root,
            state_dir,
            db_path,
            config_path,
            settings,
        }
    }

    /// Create config from the current working directory.
    pub fn from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| PreviewError::Config(format!("cannot get cwd: {e}")))?;
        Ok(Self::new(cwd))
    }

    /// Load settings from config.toml if it exists.
    fn load_settings(config_path: &Path) -> Option<UserSettings> {
        if !config_path.exists() {
            return None;
        }
        let content = std::fs::read_to_string(config_path).ok()?;
        match toml::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(path = %config_path.display(), error = %e, "invalid config, using defaults");
                None
            }
        }
    }

    /// Save current settings to config.toml.
    pub fn save_settings(&self) -> Result<()> {
        self.ensure_state_dir()?;
        let content = toml::to_string_pretty(&self.settings)
            .map_err(|e| PreviewError::Config(format!("failed to serialize settings: {e}")))?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Ensure the `.livepreview/` directory exists.
    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }

    /// Check whether the project store exists.
    #[must_use]
    pub fn store_exists(&self) -> bool {
        self.db_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_new_sets_paths() {
        let cfg = Config::new("/tmp/project");
        assert_eq!(cfg.workspace_root, PathBuf::from("/tmp/project"));
        assert_eq!(cfg.state_dir, PathBuf::from("/tmp/project/.livepreview"));
        assert_eq!(
            cfg.db_path,
            PathBuf::from("/tmp/project/.livepreview/projects.db")
        );
    }

    #[test]
    fn ensure_state_dir_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::new(tmp.path());
        assert!(!cfg.state_dir.exists());
        cfg.ensure_state_dir().unwrap();
        assert!(cfg.state_dir.exists());
        assert!(!cfg.store_exists());
    }

    #[test]
    fn save_and_load_settings() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::new(tmp.path());

        cfg.settings.pipeline.entry_path = "app/Main.tsx".to_string();
        cfg.settings.phases.thinking_to_planning_ms = 100;
        cfg.settings.sandbox.browser = "google-chrome".to_string();

        cfg.save_settings().unwrap();
        assert!(cfg.config_path.exists());

        let cfg2 = Config::new(tmp.path());
        assert_eq!(cfg2.settings.pipeline.entry_path, "app/Main.tsx");
        assert_eq!(cfg2.settings.phases.thinking_to_planning_ms, 100);
        assert_eq!(cfg2.settings.sandbox.browser, "google-chrome");
    }

    #[test]
    fn default_settings() {
        let settings = UserSettings::default();
        assert_eq!(settings.pipeline.entry_path, "src/App.tsx");
        assert_eq!(settings.pipeline.stylesheet_path, "src/index.css");
        assert_eq!(settings.pipeline.components_dir, "src/components/");
        assert_eq!(settings.phases.thinking_timeout(), Duration::from_secs(3));
        assert_eq!(settings.phases.planning_timeout(), Duration::from_secs(8));
        assert_eq!(settings.owner.name, "local");
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::new(tmp.path());
        cfg.ensure_state_dir().unwrap();
        std::fs::write(&cfg.config_path, "[sandbox]\nrender_budget_ms = 42\n").unwrap();

        let cfg = Config::new(tmp.path());
        assert_eq!(cfg.settings.sandbox.render_budget_ms, 42);
        assert_eq!(cfg.settings.sandbox.browser, "chromium");
        assert_eq!(cfg.settings.pipeline.entry_path, "src/App.tsx");
    }

    #[test]
    fn load_invalid_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let state_dir = tmp.path().join(".livepreview");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("config.toml"), "invalid toml {{{{").unwrap();

        let cfg = Config::new(tmp.path());
        assert_eq!(cfg.settings.phases.tick_ms, 250);
    }

    #[test]
    fn tick_has_floor() {
        let phases = PhaseSettings {
            tick_ms: 0,
            ..PhaseSettings::default()
        };
        assert_eq!(phases.tick(), Duration::from_millis(10));
    }

    #[test]
    fn turn_staleness_defaults_to_ten_minutes() {
        let phases = PhaseSettings::default();
        assert_eq!(phases.turn_stale_after(), Duration::from_secs(600));
    }
}
