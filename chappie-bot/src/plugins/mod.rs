//! Extension plugins attached to the session once it first comes online.
//!
//! Plugins are not commands: they are not gated by role or quota and see the
//! session through a [`SessionHandle`].

mod activity_log;
mod owner_notify;

pub use activity_log::ActivityLogPlugin;
pub use owner_notify::OwnerNotifyPlugin;

use crate::connection::SessionHandle;
use crate::error::{panic_message, HandlerError};
use crate::models::BotConfig;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    /// Called once per process. Long-running work must be spawned.
    async fn attach(&self, session: SessionHandle) -> Result<(), HandlerError>;
}

pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
    attached: AtomicBool,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins,
            attached: AtomicBool::new(false),
        }
    }

    /// Plugins shipped with the bot, minus `disabled_plugins`.
    pub fn builtin(config: &BotConfig) -> Self {
        let mut plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(ActivityLogPlugin)];
        if config.notify_owner_on_connect {
            plugins.push(Arc::new(OwnerNotifyPlugin::new(
                config.owner_conversation_id(),
                config.bot_name.clone(),
            )));
        }
        plugins.retain(|p| {
            let disabled = config.disabled_plugins.iter().any(|d| d == p.id());
            if disabled {
                log::info!("[PLUGIN] {} disabled by config", p.id());
            }
            !disabled
        });
        Self::new(plugins)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Attach every plugin, only the first time this is called. Each plugin
    /// is isolated: an error or panic is logged and the rest still attach.
    /// Returns how many attached successfully.
    pub async fn attach_all(&self, session: SessionHandle) -> usize {
        if self.attached.swap(true, Ordering::SeqCst) {
            log::debug!("[PLUGIN] Already attached, skipping");
            return 0;
        }

        let mut ok = 0;
        for plugin in &self.plugins {
            let result = AssertUnwindSafe(plugin.attach(session.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));
            match result {
                Ok(()) => {
                    log::info!("[PLUGIN] ✨ {} attached", plugin.id());
                    ok += 1;
                }
                Err(e) => log::error!("[PLUGIN] {} failed to attach: {}", plugin.id(), e),
            }
        }
        ok
    }
}
