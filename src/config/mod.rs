pub mod merge;
pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::Context;

/// Load configuration by merging global, explicit, and CLI sources.
/// Precedence: CLI > explicit config file > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(explicit: Option<&Path>, cli: PartialConfig) -> AppConfig {
    // Layer 1: Global config (~/.config/propcheck/propcheck.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Explicitly supplied config file
    let explicit = explicit
        .and_then(|path| load_toml_file(path))
        .unwrap_or_default();

    // Merge: CLI > explicit > global > defaults
    cli.with_fallback(explicit).with_fallback(global).finalize()
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(path) => load_toml_file(&path).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged, not fatal.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            match toml::from_str::<ConfigFile>(&contents)
                .context(format!("Failed to parse {}", path.display()))
            {
                Ok(config_file) => {
                    tracing::info!("Loaded config from {}", path.display());
                    Some(config_file.to_partial())
                }
                Err(e) => {
                    tracing::warn!("Config parse error: {:#}", e);
                    None
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/propcheck/propcheck.toml
/// macOS: ~/Library/Application Support/propcheck/propcheck.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "propcheck")
        .map(|dirs| dirs.config_dir().join("propcheck.toml"))
}
