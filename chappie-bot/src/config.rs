use std::env;
use std::path::{Path, PathBuf};

/// Environment variable names - single source of truth
pub mod env_vars {
    /// WebSocket URL of the messaging bridge process.
    pub const BRIDGE_URL: &str = "CHAPPIE_BRIDGE_URL";
    /// Path to `bot_config.ron`.
    pub const CONFIG_PATH: &str = "CHAPPIE_CONFIG_PATH";
    /// Directory holding command descriptor manifests (`*.toml`).
    pub const COMMANDS_DIR: &str = "CHAPPIE_COMMANDS_DIR";
    /// Credential blob written on every credential update.
    pub const AUTH_FILE: &str = "CHAPPIE_AUTH_FILE";
}

/// Default values
pub mod defaults {
    pub const BRIDGE_URL: &str = "ws://127.0.0.1:8787";
    pub const CONFIG_FILE: &str = "config/bot_config.ron";
    pub const COMMANDS_DIR: &str = "commands";
    pub const AUTH_FILE: &str = "auth_info.json";
}

/// Returns the absolute path to the chappie-bot crate directory.
/// Uses CARGO_MANIFEST_DIR at compile time, so relative defaults resolve
/// the same way regardless of the working directory at runtime.
pub fn backend_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Process-level locations, read once from the environment.
///
/// Bot behaviour (owner, prefixes, quotas, notices) lives in
/// [`crate::models::BotConfig`]; this only says where things are.
#[derive(Debug, Clone)]
pub struct Config {
    pub bridge_url: String,
    pub bot_config_path: PathBuf,
    pub commands_dir: PathBuf,
    pub auth_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bridge_url: env::var(env_vars::BRIDGE_URL)
                .unwrap_or_else(|_| defaults::BRIDGE_URL.to_string()),
            bot_config_path: path_from_env(env_vars::CONFIG_PATH, defaults::CONFIG_FILE),
            commands_dir: path_from_env(env_vars::COMMANDS_DIR, defaults::COMMANDS_DIR),
            auth_file: path_from_env(env_vars::AUTH_FILE, defaults::AUTH_FILE),
        }
    }
}

/// Env override taken as given; the default is anchored at [`backend_dir`].
fn path_from_env(var: &str, default: &str) -> PathBuf {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => resolve_default(&backend_dir(), default),
    }
}

fn resolve_default(base: &Path, default: &str) -> PathBuf {
    let path = Path::new(default);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_default_is_anchored() {
        let base = Path::new("/srv/bot");
        assert_eq!(
            resolve_default(base, defaults::COMMANDS_DIR),
            PathBuf::from("/srv/bot/commands")
        );
    }

    #[test]
    fn test_absolute_default_kept() {
        let base = Path::new("/srv/bot");
        assert_eq!(resolve_default(base, "/var/lib/auth.json"), PathBuf::from("/var/lib/auth.json"));
    }
}
