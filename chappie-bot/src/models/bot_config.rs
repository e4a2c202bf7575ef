//! Bot configuration model backed by a RON file.
//!
//! Owner identity, command prefixes, quota limits, user-facing notices and
//! reconnect policy. Loaded once at startup from `config/bot_config.ron`,
//! wrapped in an `Arc` and handed to every component; never mutated after.

use crate::error::BotError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Server suffix appended to a bare phone number to address a direct chat.
pub const DIRECT_CHAT_SUFFIX: &str = "@s.whatsapp.net";

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_name: String,
    /// Owner identifier: a bare number ("5215512345678") or a full actor id.
    pub owner_id: String,
    /// Command prefixes, tried in order.
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub messages: NoticeMessages,
    #[serde(default = "default_auto_replies")]
    pub auto_replies: Vec<AutoReply>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_reload_debounce_ms")]
    pub reload_debounce_ms: u64,
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    #[serde(default)]
    pub notify_owner_on_connect: bool,
}

/// Rolling-window usage limit for non-exempt commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_limit")]
    pub limit: u32,
    #[serde(default = "default_quota_window_secs")]
    pub window_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: default_quota_limit(),
            window_secs: default_quota_window_secs(),
        }
    }
}

/// Fixed user-facing notices. Never include diagnostics in these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeMessages {
    pub owner_only: String,
    pub admin_only: String,
    pub group_only: String,
    pub private_only: String,
    pub limit_reached: String,
    pub error: String,
}

impl Default for NoticeMessages {
    fn default() -> Self {
        Self {
            owner_only: "🔐 Solo el owner puede usar este comando.".to_string(),
            admin_only: "⚠️ Solo admins pueden usar este comando.".to_string(),
            group_only: "👥 Este comando solo funciona en grupos.".to_string(),
            private_only: "💬 Este comando solo funciona en privado.".to_string(),
            limit_reached: "⚠️ Has alcanzado tu límite diario, espera al reinicio.".to_string(),
            error: "❌ Ocurrió un error ejecutando el comando.".to_string(),
        }
    }
}

/// Keyword-triggered reply. `reply` may use `{sender}` and `{botname}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReply {
    pub trigger: String,
    pub reply: String,
}

/// Bounded exponential backoff between automatic reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Consecutive attempts without reaching Connected before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_quota_limit() -> u32 { 25 }
fn default_quota_window_secs() -> u64 { 24 * 60 * 60 }
fn default_send_timeout_secs() -> u64 { 20 }
fn default_handler_timeout_secs() -> u64 { 60 }
fn default_reload_debounce_ms() -> u64 { 300 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 60_000 }
fn default_jitter_ms() -> u64 { 500 }
fn default_max_attempts() -> u32 { 8 }

fn default_auto_replies() -> Vec<AutoReply> {
    vec![
        AutoReply {
            trigger: "hola".to_string(),
            reply: "Hola {sender}! 👋 Soy {botname}".to_string(),
        },
        AutoReply {
            trigger: "chappie".to_string(),
            reply: "Sí! Estoy activo 😉".to_string(),
        },
        AutoReply {
            trigger: "gracias".to_string(),
            reply: "De nada! 😎".to_string(),
        },
    ]
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: "CHAPPIE BOT".to_string(),
            owner_id: String::new(),
            prefixes: vec!["!".to_string(), ".".to_string(), "/".to_string(), "#".to_string()],
            quota: QuotaConfig::default(),
            messages: NoticeMessages::default(),
            auto_replies: default_auto_replies(),
            reconnect: ReconnectConfig::default(),
            send_timeout_secs: default_send_timeout_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            reload_debounce_ms: default_reload_debounce_ms(),
            disabled_plugins: Vec::new(),
            notify_owner_on_connect: false,
        }
    }
}

impl BotConfig {
    /// Load from `path`, falling back to `Default` when the file is missing
    /// or unparsable.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::debug!("Could not read {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        ron::from_str::<BotConfig>(content).map_err(|e| e.to_string())
    }

    /// Reject configurations the dispatcher cannot work with.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.owner_id.trim().is_empty() {
            return Err(BotError::Config("owner_id must be set".to_string()));
        }
        if self.prefixes.is_empty() || self.prefixes.iter().any(|p| p.is_empty()) {
            return Err(BotError::Config(
                "prefixes must be a non-empty list of non-empty strings".to_string(),
            ));
        }
        if self.quota.window_secs == 0 {
            return Err(BotError::Config("quota.window_secs must be greater than 0".to_string()));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(BotError::Config(
                "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota.window_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }

    /// Conversation id of the owner's direct chat.
    pub fn owner_conversation_id(&self) -> String {
        let owner = self.owner_id.trim();
        if owner.contains('@') {
            owner.to_string()
        } else {
            format!("{}{}", owner, DIRECT_CHAT_SUFFIX)
        }
    }

    /// First prefix, used when rendering command names back to users.
    pub fn primary_prefix(&self) -> &str {
        self.prefixes.first().map(String::as_str).unwrap_or("!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config = BotConfig::parse(
            r#"(
                bot_name: "Test",
                owner_id: "5215512345678",
                prefixes: ["!"],
            )"#,
        )
        .unwrap();
        assert_eq!(config.bot_name, "Test");
        assert_eq!(config.quota.limit, 25);
        assert_eq!(config.quota.window_secs, 86_400);
        assert_eq!(config.auto_replies.len(), 3);
        assert_eq!(config.reconnect.max_attempts, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let config = BotConfig::parse(
            r#"(
                bot_name: "Test",
                owner_id: "1",
                prefixes: ["!", "."],
                quota: (limit: 3, window_secs: 60),
                auto_replies: [],
                disabled_plugins: ["activity-log"],
            )"#,
        )
        .unwrap();
        assert_eq!(config.quota.limit, 3);
        assert_eq!(config.quota_window(), Duration::from_secs(60));
        assert!(config.auto_replies.is_empty());
        assert_eq!(config.disabled_plugins, vec!["activity-log"]);
    }

    #[test]
    fn test_validate_rejects_missing_owner_and_prefixes() {
        let config = BotConfig::default();
        assert!(config.validate().is_err());

        let config = BotConfig {
            owner_id: "1".to_string(),
            prefixes: vec![String::new()],
            ..BotConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_owner_conversation_id() {
        let mut config = BotConfig {
            owner_id: "5215512345678".to_string(),
            ..BotConfig::default()
        };
        assert_eq!(config.owner_conversation_id(), "5215512345678@s.whatsapp.net");
        config.owner_id = "42@lid".to_string();
        assert_eq!(config.owner_conversation_id(), "42@lid");
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = BotConfig::parse(include_str!("../../config/bot_config.ron")).unwrap();
        config.validate().unwrap();
        assert!(config.notify_owner_on_connect);
    }

    #[test]
    fn test_load_from_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig::load_from(&dir.path().join("nope.ron"));
        assert_eq!(config.bot_name, "CHAPPIE BOT");
    }
}
