use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "group" => ConversationKind::Group,
            _ => ConversationKind::Direct,
        }
    }
}

/// Durable conversation record. Participants are kept sorted so a direct
/// pair has exactly one canonical representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub participant_ids: Vec<Uuid>,
    pub last_message_id: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_ids.contains(&user_id)
    }

    pub fn other_participants(&self, user_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.participant_ids
            .iter()
            .copied()
            .filter(move |id| *id != user_id)
    }
}

/// Canonical ordering of a direct pair, used as the find-or-create key.
pub fn direct_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Conversation as seen by one participant, for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_pair(a, b), direct_pair(b, a));
    }
}
