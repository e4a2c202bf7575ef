use std::collections::HashSet;

/// Membership of a group conversation at the moment it was fetched.
///
/// Admin status can change between messages, so this is requested per gated
/// invocation and never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupContext {
    pub conversation_id: String,
    pub participants: HashSet<String>,
    pub admins: HashSet<String>,
}

impl GroupContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Self::default()
        }
    }

    pub fn with_member(mut self, id: impl Into<String>) -> Self {
        self.participants.insert(id.into());
        self
    }

    /// Adds `id` as a participant and an admin.
    pub fn with_admin(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.participants.insert(id.clone());
        self.admins.insert(id);
        self
    }

    pub fn is_admin(&self, actor_id: &str) -> bool {
        self.admins.contains(actor_id)
    }

    /// Participants in a stable order, for mentions.
    pub fn sorted_participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.participants.iter().cloned().collect();
        ids.sort();
        ids
    }
}
