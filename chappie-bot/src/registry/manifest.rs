//! Command manifest parsing. One `*.toml` file per command.
//!
//! ```toml
//! name = "tagall"
//! aliases = ["everyone", "all"]
//! description = "Mention every group member"
//! category = "group"
//! admin = true
//! group_only = true
//! kind = "builtin"
//! handler = "tagall"
//! ```
//!
//! `kind = "reply"` commands carry a `text` template instead of `handler`.

use super::builtin::{HandlerCatalog, ReplyHandler};
use super::CommandDescriptor;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    /// Reply with a fixed template.
    Reply,
    /// Delegate to a compiled handler from the catalog.
    Builtin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandManifest {
    pub name: String,
    #[serde(default, alias = "alias")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub admin: bool,
    #[serde(default, alias = "premium")]
    pub quota_exempt: bool,
    #[serde(default)]
    pub group_only: bool,
    #[serde(default)]
    pub private_only: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub kind: ManifestKind,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

impl CommandManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str::<CommandManifest>(content).map_err(|e| format!("invalid manifest: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read: {}", e))?;
        Self::parse(&content)
    }

    /// Validate the manifest and bind it to its handler.
    pub fn into_descriptor(
        self,
        source: &Path,
        catalog: &HandlerCatalog,
    ) -> Result<CommandDescriptor, String> {
        let name = self.name.trim().to_lowercase();
        if name.is_empty() {
            return Err("command name is required".to_string());
        }
        if name.chars().any(char::is_whitespace) {
            return Err(format!("command name '{}' contains whitespace", name));
        }
        if self.group_only && self.private_only {
            return Err("group_only and private_only are mutually exclusive".to_string());
        }

        let mut aliases: Vec<String> = Vec::new();
        for alias in &self.aliases {
            let alias = alias.trim().to_lowercase();
            if alias.is_empty() || alias.chars().any(char::is_whitespace) {
                return Err(format!("invalid alias '{}'", alias));
            }
            if alias != name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }

        let handler = match self.kind {
            ManifestKind::Reply => {
                let text = self
                    .text
                    .filter(|t| !t.trim().is_empty())
                    .ok_or("reply commands need a non-empty `text`")?;
                Arc::new(ReplyHandler::new(text)) as Arc<dyn super::CommandHandler>
            }
            ManifestKind::Builtin => {
                let handler_name = self
                    .handler
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or("builtin commands need a `handler`")?;
                catalog
                    .get(handler_name)
                    .ok_or_else(|| format!("unknown builtin handler '{}'", handler_name))?
            }
        };

        Ok(CommandDescriptor {
            name,
            aliases,
            requires_owner: self.owner,
            requires_admin: self.admin,
            quota_exempt: self.quota_exempt,
            group_only: self.group_only,
            private_only: self.private_only,
            description: self.description,
            category: self.category,
            source: source.to_path_buf(),
            handler,
        })
    }
}
