//! Presence ("who is connected") types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use taskgrid_core::{CurrentUser, Timestamp, UserId};

/// Metadata a client publishes about itself on the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub online_at: Timestamp,
}

impl PresenceMeta {
    pub fn for_user(user: &CurrentUser, online_at: Timestamp) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name().to_string(),
            online_at,
        }
    }
}

/// Full presence snapshot keyed by connection identity. A user connected
/// from several places appears under several keys.
pub type PresenceState = BTreeMap<String, Vec<PresenceMeta>>;

/// One entry per connection key (the first meta of each), in key order.
pub fn online_users(state: &PresenceState) -> Vec<&PresenceMeta> {
    state.values().filter_map(|metas| metas.first()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskgrid_core::EntityIdType;

    #[test]
    fn test_online_users_skips_empty_keys() {
        let user = CurrentUser::new(UserId::now_v7(), "a@example.com");
        let mut state = PresenceState::new();
        state.insert("k1".to_string(), vec![PresenceMeta::for_user(&user, Utc::now())]);
        state.insert("k2".to_string(), Vec::new());
        let users = online_users(&state);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "a@example.com");
    }
}
