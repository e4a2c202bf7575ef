//! Role classification and command authorization.

use crate::messenger::GroupDirectory;
use crate::models::bot_config::DIRECT_CHAT_SUFFIX;
use crate::models::{NoticeMessages, Role};
use crate::registry::CommandDescriptor;

/// Why a command was refused. Each maps to a fixed notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    OwnerOnly,
    AdminOnly,
    GroupOnly,
    PrivateOnly,
}

impl Denial {
    pub fn notice<'a>(&self, messages: &'a NoticeMessages) -> &'a str {
        match self {
            Denial::OwnerOnly => &messages.owner_only,
            Denial::AdminOnly => &messages.admin_only,
            Denial::GroupOnly => &messages.group_only,
            Denial::PrivateOnly => &messages.private_only,
        }
    }
}

/// Canonical form of an actor id: the `:device` suffix is dropped, the
/// domain is kept, and a bare number gets the direct-chat domain.
/// `5215512345678:12@s.whatsapp.net` → `5215512345678@s.whatsapp.net`.
pub fn normalize_id(id: &str) -> String {
    let id = id.trim();
    let (user, domain) = match id.split_once('@') {
        Some((user, domain)) => (user, Some(domain)),
        None => (id, None),
    };
    let user = user.split(':').next().unwrap_or(user);
    if user.is_empty() {
        return String::new();
    }
    match domain {
        Some(domain) => format!("{}@{}", user, domain),
        None => format!("{}{}", user, DIRECT_CHAT_SUFFIX),
    }
}

pub struct PermissionResolver {
    owner_id: String,
}

impl PermissionResolver {
    pub fn new(owner_id: &str) -> Self {
        Self {
            owner_id: normalize_id(owner_id),
        }
    }

    /// Exact comparison of normalized ids. Neither containment nor a shared
    /// number under another domain makes somebody the owner.
    pub fn is_owner(&self, actor_id: &str) -> bool {
        !self.owner_id.is_empty() && normalize_id(actor_id) == self.owner_id
    }

    pub async fn resolve_role<G: GroupDirectory + ?Sized>(
        &self,
        actor_id: &str,
        conversation_id: &str,
        is_group: bool,
        groups: &G,
    ) -> Role {
        if self.is_owner(actor_id) {
            return Role::Owner;
        }
        if !is_group {
            return Role::Member;
        }

        match groups.fetch_group_context(conversation_id).await {
            Ok(group) if group.is_admin(actor_id) => Role::Admin,
            Ok(_) => Role::Member,
            Err(e) => {
                log::warn!(
                    "[PERMISSIONS] Could not fetch group {} ({}), treating {} as member",
                    conversation_id,
                    e,
                    actor_id
                );
                Role::Member
            }
        }
    }

    pub fn authorize(descriptor: &CommandDescriptor, role: Role) -> Result<(), Denial> {
        if descriptor.requires_owner && role != Role::Owner {
            return Err(Denial::OwnerOnly);
        }
        if descriptor.requires_admin && !role.is_admin_or_owner() {
            return Err(Denial::AdminOnly);
        }
        Ok(())
    }

    /// Conversation-kind restriction (`group_only` / `private_only`).
    pub fn check_context(descriptor: &CommandDescriptor, is_group: bool) -> Result<(), Denial> {
        if descriptor.group_only && !is_group {
            return Err(Denial::GroupOnly);
        }
        if descriptor.private_only && is_group {
            return Err(Denial::PrivateOnly);
        }
        Ok(())
    }
}
