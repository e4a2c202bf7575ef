//! Compiled command handlers that manifests can bind to by name.

use super::handler::{CommandContext, CommandHandler};
use crate::error::HandlerError;
use crate::models::{OutboundContent, Role};
use crate::template;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Invisible left-to-right mark: lets a mention-only message carry no text.
const BLANK_TEXT: &str = "\u{200E}";

/// Name → handler table consulted while binding manifests.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every handler shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("ping", Arc::new(PingHandler));
        catalog.register("tagall", Arc::new(TagAllHandler));
        catalog.register("menu", Arc::new(MenuHandler));
        catalog.register("reload", Arc::new(ReloadHandler));
        catalog.register("echo", Arc::new(EchoHandler));
        catalog
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.to_lowercase(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// `kind = "reply"`: templated text. Placeholders: `{sender}`, `{args}`,
/// `{botname}`, `{prefix}`.
pub struct ReplyHandler {
    template: String,
}

impl ReplyHandler {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl CommandHandler for ReplyHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        let args = ctx.args.join(" ");
        let text = template::render(&self.template, &[
            ("sender", ctx.event.sender_label()),
            ("args", args.as_str()),
            ("botname", ctx.config.bot_name.as_str()),
            ("prefix", ctx.prefix),
        ]);
        ctx.reply(text).await
    }
}

pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        let latency_ms = (Utc::now() - ctx.event.timestamp).num_milliseconds().max(0);
        ctx.reply(format!("🏓 pong ({} ms)", latency_ms)).await
    }
}

/// Mention every participant, then react to the triggering message.
pub struct TagAllHandler;

#[async_trait]
impl CommandHandler for TagAllHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        if !ctx.event.is_group {
            return ctx.reply(ctx.config.messages.group_only.clone()).await;
        }

        let group = ctx.messenger.fetch_group_context(ctx.conversation_id).await?;
        let mentions = group.sorted_participants();
        let text = if ctx.args.is_empty() {
            BLANK_TEXT.to_string()
        } else {
            ctx.args.join(" ")
        };
        log::info!(
            "[TAGALL] Mentioning {} participants in {}",
            mentions.len(),
            ctx.conversation_id
        );
        ctx.send(OutboundContent::with_mentions(text, mentions)).await?;

        if let Some(message_id) = &ctx.event.message_id {
            ctx.send(OutboundContent::reaction("👻", message_id.clone())).await?;
        }
        Ok(())
    }
}

/// Lists the commands of the current registry snapshot by category.
pub struct MenuHandler;

#[async_trait]
impl CommandHandler for MenuHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        let snapshot = ctx.registry.snapshot();
        let mut by_category: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for cmd in snapshot.commands() {
            let mut line = format!("{}{}", ctx.prefix, cmd.name);
            if !cmd.description.is_empty() {
                line.push_str(&format!(" - {}", cmd.description));
            }
            by_category.entry(cmd.category.as_str()).or_default().push(line);
        }

        let mut text = format!("*{}*\n", ctx.config.bot_name);
        for (category, mut lines) in by_category {
            lines.sort();
            text.push_str(&format!("\n*{}*\n", category.to_uppercase()));
            for line in lines {
                text.push_str(&format!("• {}\n", line));
            }
        }
        ctx.reply(text.trim_end().to_string()).await
    }
}

/// Rebuilds the registry from disk. Owner only, whatever the manifest says.
pub struct ReloadHandler;

#[async_trait]
impl CommandHandler for ReloadHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        if ctx.role != Role::Owner {
            return ctx.reply(ctx.config.messages.owner_only.clone()).await;
        }

        let report = ctx.registry.reload();
        let mut text = format!("🔄 {} comandos cargados", report.loaded);
        if !report.errors.is_empty() {
            text.push_str(&format!("\n⚠️ {} archivos rechazados:", report.errors.len()));
            for err in &report.errors {
                let file = err
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| err.path.display().to_string());
                text.push_str(&format!("\n- {}", file));
            }
        }
        ctx.reply(text).await
    }
}

pub struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<(), HandlerError> {
        if ctx.args.is_empty() {
            return ctx.reply(format!("Uso: {}echo <texto>", ctx.prefix)).await;
        }
        ctx.reply(ctx.args.join(" ")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BotConfig, GroupContext, InboundEvent};
    use crate::registry::HandlerRegistry;
    use crate::testing::{write_manifest, RecordingMessenger};

    const GROUP: &str = "120363@g.us";

    async fn run_handler(
        handler: &dyn CommandHandler,
        messenger: &RecordingMessenger,
        event: &InboundEvent,
        args: &[String],
        role: Role,
        registry: &HandlerRegistry,
    ) -> Result<(), HandlerError> {
        let config = BotConfig::default();
        let ctx = CommandContext {
            messenger,
            event,
            args,
            conversation_id: &event.conversation_id,
            prefix: "!",
            role,
            config: &config,
            registry,
        };
        handler.run(&ctx).await
    }

    fn empty_registry() -> (tempfile::TempDir, HandlerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandlerRegistry::new(dir.path(), HandlerCatalog::with_builtins());
        (dir, registry)
    }

    #[test]
    fn test_catalog_names() {
        let catalog = HandlerCatalog::with_builtins();
        assert_eq!(catalog.names(), vec!["echo", "menu", "ping", "reload", "tagall"]);
        assert!(catalog.get("PING").is_some());
        assert!(catalog.get("pong").is_none());
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let (_dir, registry) = empty_registry();
        let messenger = RecordingMessenger::new();
        let event = InboundEvent::new("1@s.whatsapp.net", "1@s.whatsapp.net", "!ping", false);
        run_handler(&PingHandler, &messenger, &event, &[], Role::Member, &registry)
            .await
            .unwrap();
        assert!(messenger.texts()[0].contains("pong"));
    }

    #[tokio::test]
    async fn test_reply_handler_renders_template() {
        let (_dir, registry) = empty_registry();
        let messenger = RecordingMessenger::new();
        let event = InboundEvent::new("1@s.whatsapp.net", "1@s.whatsapp.net", "!hi a b", false)
            .with_sender_name("Ana");
        let handler = ReplyHandler::new("{sender} dijo {args} a {botname}");
        let args = vec!["a".to_string(), "b".to_string()];
        run_handler(&handler, &messenger, &event, &args, Role::Member, &registry)
            .await
            .unwrap();
        assert_eq!(messenger.texts(), vec!["Ana dijo a b a CHAPPIE BOT"]);
    }

    #[tokio::test]
    async fn test_tagall_mentions_everyone_and_reacts() {
        let (_dir, registry) = empty_registry();
        let messenger = RecordingMessenger::new().with_group(
            GroupContext::new(GROUP)
                .with_admin("1@s.whatsapp.net")
                .with_member("2@s.whatsapp.net")
                .with_member("3@s.whatsapp.net"),
        );
        let event = InboundEvent::new(GROUP, "1@s.whatsapp.net", "!tagall", true)
            .with_message_id("MSG1");
        run_handler(&TagAllHandler, &messenger, &event, &[], Role::Admin, &registry)
            .await
            .unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].content,
            OutboundContent::with_mentions(
                BLANK_TEXT,
                vec![
                    "1@s.whatsapp.net".to_string(),
                    "2@s.whatsapp.net".to_string(),
                    "3@s.whatsapp.net".to_string()
                ]
            )
        );
        assert_eq!(sent[1].content, OutboundContent::reaction("👻", "MSG1"));
    }

    #[tokio::test]
    async fn test_menu_lists_snapshot() {
        let (dir, registry) = empty_registry();
        write_manifest(dir.path(), "a_ping.toml", "ping", "kind = \"builtin\"\nhandler = \"ping\"\ndescription = \"Latency\"");
        write_manifest(dir.path(), "b_menu.toml", "menu", "kind = \"builtin\"\nhandler = \"menu\"");
        registry.reload();

        let messenger = RecordingMessenger::new();
        let event = InboundEvent::new("1@s.whatsapp.net", "1@s.whatsapp.net", "!menu", false);
        run_handler(&MenuHandler, &messenger, &event, &[], Role::Member, &registry)
            .await
            .unwrap();
        let text = &messenger.texts()[0];
        assert!(text.contains("!ping - Latency"));
        assert!(text.contains("!menu"));
        assert!(text.contains("GENERAL"));
    }

    #[tokio::test]
    async fn test_reload_requires_owner() {
        let (dir, registry) = empty_registry();
        let messenger = RecordingMessenger::new();
        let event = InboundEvent::new("1@s.whatsapp.net", "1@s.whatsapp.net", "!reload", false);

        write_manifest(dir.path(), "ping.toml", "ping", "kind = \"builtin\"\nhandler = \"ping\"");
        run_handler(&ReloadHandler, &messenger, &event, &[], Role::Admin, &registry)
            .await
            .unwrap();
        assert!(registry.lookup("ping").is_none());

        run_handler(&ReloadHandler, &messenger, &event, &[], Role::Owner, &registry)
            .await
            .unwrap();
        assert!(registry.lookup("ping").is_some());
        assert!(messenger.texts()[1].contains("1 comandos"));
    }
}
