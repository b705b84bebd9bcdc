//! Per-request identity and the execution context handlers receive.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Caller identity asserted by the trigger source.
///
/// Built once per inbound trigger request and never mutated. `user_id` is
/// `None` when the caller carried no (or a nil/unparseable) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    user_id: Option<Uuid>,
    role: String,
}

impl Session {
    pub fn new(user_id: Option<Uuid>, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }

    /// Build a session from raw session variables.
    ///
    /// The role is copied verbatim (including an empty string). The user id is
    /// kept only when it parses as a non-nil UUID.
    pub fn from_variables(user_id: Option<&str>, role: &str) -> Self {
        let user_id = user_id
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .filter(|id| !id.is_nil());
        Self::new(user_id, role)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn has_identity(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Request-scoped execution context passed as the first argument to every handler.
///
/// A `RequestCtx` cannot exist without a [`Session`], so handlers never have
/// to deal with a missing one.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl RequestCtx {
    pub fn new(session: Session, cancel: CancellationToken) -> Self {
        Self {
            session: Arc::new(session),
            cancel,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancelled when the host shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_id_means_no_identity() {
        let s = Session::from_variables(Some(""), "user");
        assert_eq!(s.user_id(), None);
        assert_eq!(s.role(), "user");
        assert!(!s.has_identity());
    }

    #[test]
    fn absent_user_id_means_no_identity() {
        let s = Session::from_variables(None, "anonymous");
        assert_eq!(s.user_id(), None);
        assert_eq!(s.role(), "anonymous");
    }

    #[test]
    fn nil_and_malformed_ids_are_dropped() {
        let nil = Session::from_variables(Some("00000000-0000-0000-0000-000000000000"), "user");
        assert_eq!(nil.user_id(), None);

        let junk = Session::from_variables(Some("not-a-uuid"), "user");
        assert_eq!(junk.user_id(), None);
    }

    #[test]
    fn well_formed_id_is_kept() {
        let id = Uuid::new_v4();
        let s = Session::from_variables(Some(&id.to_string()), "admin");
        assert_eq!(s.user_id(), Some(id));
        assert!(s.has_identity());
    }

    #[test]
    fn role_is_copied_verbatim() {
        let s = Session::from_variables(None, "");
        assert_eq!(s.role(), "");

        let s = Session::from_variables(None, " Power User ");
        assert_eq!(s.role(), " Power User ");
    }
}
