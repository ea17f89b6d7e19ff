//! Session context: who the local user is.
//!
//! Passed explicitly to every component that needs the current user instead
//! of being read from process-wide state.

use crate::{AuthorizationError, UserId};
use serde::{Deserialize, Serialize};

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// Per-session context shared by the sync components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    user: Option<CurrentUser>,
}

impl SessionContext {
    pub fn signed_in(user: CurrentUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    /// The signed-in user, or an authorization error.
    pub fn require_user(&self) -> Result<&CurrentUser, AuthorizationError> {
        self.user.as_ref().ok_or(AuthorizationError::NotSignedIn)
    }

    /// Email of the signed-in user, `"Guest"` otherwise.
    pub fn email_or_guest(&self) -> &str {
        self.user.as_ref().map(|u| u.email.as_str()).unwrap_or("Guest")
    }

    /// Whether a change authored by `actor` is an echo of our own write.
    /// Without a signed-in user nothing is treated as an echo.
    pub fn is_own_change(&self, actor: Option<UserId>) -> bool {
        match (self.user_id(), actor) {
            (Some(me), Some(actor)) => me == actor,
            _ => false,
        }
    }

    pub fn sign_out(&mut self) {
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_own_change_requires_matching_actor() {
        let me = UserId::now_v7();
        let session = SessionContext::signed_in(CurrentUser::new(me, "me@example.com"));
        assert!(session.is_own_change(Some(me)));
        assert!(!session.is_own_change(Some(UserId::now_v7())));
        assert!(!session.is_own_change(None));
    }

    #[test]
    fn test_anonymous_session_never_owns_changes() {
        let session = SessionContext::anonymous();
        assert!(!session.is_own_change(Some(UserId::now_v7())));
        assert_eq!(session.email_or_guest(), "Guest");
        assert!(session.require_user().is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = CurrentUser::new(UserId::now_v7(), "a@b.c");
        assert_eq!(user.display_name(), "a@b.c");
        let user = user.with_display_name("Aiko");
        assert_eq!(user.display_name(), "Aiko");
    }
}
