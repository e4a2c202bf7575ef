//! Inbound event dispatch: prefix parsing, registry lookup, the permission
//! and quota gates, handler execution and keyword auto replies.

use crate::error::{panic_message, HandlerError};
use crate::messenger::Messenger;
use crate::models::{BotConfig, InboundEvent, OutboundContent, Role, SendOptions};
use crate::permissions::{Denial, PermissionResolver};
use crate::quota::{QuotaDecision, QuotaStore};
use crate::registry::{CommandContext, HandlerRegistry};
use crate::template;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Empty text or the broadcast pseudo-conversation.
    Ignored,
    NotACommand,
    /// Prefixed, but nothing is registered under that name. No reply is sent.
    UnknownCommand(String),
    Denied(Denial),
    QuotaExceeded,
    Completed { command: String },
    /// The handler failed, panicked or timed out; the generic notice was sent.
    Failed { command: String },
}

/// A prefixed message split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub prefix: String,
    /// Lower-cased.
    pub name: String,
    pub args: Vec<String>,
}

/// Match the first configured prefix, then split on whitespace.
pub fn parse_command(text: &str, prefixes: &[String]) -> Option<ParsedCommand> {
    let prefix = prefixes.iter().find(|p| !p.is_empty() && text.starts_with(p.as_str()))?;
    let mut tokens = text[prefix.len()..].split_whitespace();
    let name = tokens.next()?.to_lowercase();
    Some(ParsedCommand {
        prefix: prefix.clone(),
        name,
        args: tokens.map(str::to_string).collect(),
    })
}

pub struct Dispatcher {
    config: Arc<BotConfig>,
    registry: Arc<HandlerRegistry>,
    quota: Arc<dyn QuotaStore>,
    permissions: PermissionResolver,
}

impl Dispatcher {
    pub fn new(
        config: Arc<BotConfig>,
        registry: Arc<HandlerRegistry>,
        quota: Arc<dyn QuotaStore>,
    ) -> Self {
        let permissions = PermissionResolver::new(&config.owner_id);
        Self {
            config,
            registry,
            quota,
            permissions,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Process one event to completion. Never fails: every error is turned
    /// into an outcome, a log line and at most a fixed notice.
    pub async fn on_inbound_event(
        &self,
        event: &InboundEvent,
        messenger: &dyn Messenger,
    ) -> DispatchOutcome {
        if event.raw_text.trim().is_empty() || event.is_broadcast() {
            return DispatchOutcome::Ignored;
        }

        let outcome = self.dispatch_command(event, messenger).await;

        match &outcome {
            DispatchOutcome::Denied(_) | DispatchOutcome::QuotaExceeded => {}
            _ => self.auto_reply(event, messenger).await,
        }
        outcome
    }

    async fn dispatch_command(
        &self,
        event: &InboundEvent,
        messenger: &dyn Messenger,
    ) -> DispatchOutcome {
        let Some(parsed) = parse_command(&event.raw_text, &self.config.prefixes) else {
            return DispatchOutcome::NotACommand;
        };

        let Some(descriptor) = self.registry.lookup(&parsed.name) else {
            log::debug!("[DISPATCH] Unknown command '{}' from {}", parsed.name, event.actor_id);
            return DispatchOutcome::UnknownCommand(parsed.name);
        };

        let role = self
            .permissions
            .resolve_role(&event.actor_id, &event.conversation_id, event.is_group, messenger)
            .await;

        let gate = PermissionResolver::authorize(&descriptor, role)
            .and_then(|_| PermissionResolver::check_context(&descriptor, event.is_group));
        if let Err(denial) = gate {
            log::info!(
                "[DISPATCH] {} denied '{}' as {} ({:?})",
                event.actor_id,
                descriptor.name,
                role,
                denial
            );
            self.notify(event, messenger, denial.notice(&self.config.messages)).await;
            return DispatchOutcome::Denied(denial);
        }

        if !descriptor.quota_exempt && role != Role::Owner {
            let decision = self
                .quota
                .try_consume(&event.actor_id, self.config.quota_window(), self.config.quota.limit)
                .await;
            match decision {
                QuotaDecision::Allowed { used, remaining } => {
                    log::debug!(
                        "[QUOTA] {} used {} ({} remaining)",
                        event.actor_id,
                        used,
                        remaining
                    );
                }
                QuotaDecision::Exceeded { limit } => {
                    log::info!("[QUOTA] {} reached the limit of {}", event.actor_id, limit);
                    self.notify(event, messenger, &self.config.messages.limit_reached).await;
                    return DispatchOutcome::QuotaExceeded;
                }
            }
        }

        log::info!(
            "[DISPATCH] {} from {} ({})",
            descriptor.name,
            event.sender_label(),
            event.conversation_id
        );

        let ctx = CommandContext {
            messenger,
            event,
            args: &parsed.args,
            conversation_id: &event.conversation_id,
            prefix: &parsed.prefix,
            role,
            config: &self.config,
            registry: &self.registry,
        };

        let timeout = self.config.handler_timeout();
        let run = AssertUnwindSafe(descriptor.handler.run(&ctx)).catch_unwind();
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(HandlerError::TimedOut(timeout)),
        };

        match result {
            Ok(()) => DispatchOutcome::Completed {
                command: descriptor.name.clone(),
            },
            Err(e) => {
                log::error!("[DISPATCH] Command '{}' failed: {}", descriptor.name, e);
                self.notify(event, messenger, &self.config.messages.error).await;
                DispatchOutcome::Failed {
                    command: descriptor.name.clone(),
                }
            }
        }
    }

    /// Fixed notice quoting the triggering message. Send failures are logged.
    async fn notify(&self, event: &InboundEvent, messenger: &dyn Messenger, text: &str) {
        if let Err(e) = messenger
            .send(
                &event.conversation_id,
                OutboundContent::text(text),
                SendOptions::quoting(event),
            )
            .await
        {
            log::warn!("[DISPATCH] Failed to send notice to {}: {}", event.conversation_id, e);
        }
    }

    /// Every configured trigger contained in the text fires once.
    async fn auto_reply(&self, event: &InboundEvent, messenger: &dyn Messenger) {
        let text = event.raw_text.to_lowercase();
        for auto in &self.config.auto_replies {
            let trigger = auto.trigger.to_lowercase();
            if trigger.is_empty() || !text.contains(&trigger) {
                continue;
            }
            let reply = template::render(&auto.reply, &[
                ("sender", event.sender_label()),
                ("botname", self.config.bot_name.as_str()),
            ]);
            if let Err(e) = messenger
                .send(
                    &event.conversation_id,
                    OutboundContent::text(reply),
                    SendOptions::quoting(event),
                )
                .await
            {
                log::debug!("[DISPATCH] Auto reply '{}' not sent: {}", auto.trigger, e);
            }
        }
    }
}
