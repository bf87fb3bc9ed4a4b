//! Caller identity and the injected admin policy.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Identity handed over by the identity provider after sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Sign-in method ("password", "google.com", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Identity {
    pub fn new(uid: UserId) -> Self {
        Self { uid, email: None, provider: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Decides which identities may use the authoring screens.
///
/// Supplied at startup so each deployment (and each test) chooses its own.
pub trait AdminPolicy: Send + Sync {
    fn is_admin(&self, identity: &Identity) -> bool;
}

/// Grants admin to a fixed set of e-mail addresses, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowlist {
    emails: HashSet<String>,
}

impl AdminAllowlist {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl AdminPolicy for AdminAllowlist {
    fn is_admin(&self, identity: &Identity) -> bool {
        if identity.uid.is_anonymous() {
            return false;
        }
        identity
            .email
            .as_deref()
            .map(|e| self.emails.contains(&e.trim().to_lowercase()))
            .unwrap_or(false)
    }
}

/// Policy for deployments without an authoring surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdmins;

impl AdminPolicy for NoAdmins {
    fn is_admin(&self, _identity: &Identity) -> bool {
        false
    }
}

/// What the UI layer learns about its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub logged_in: bool,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<UserId>,
}

impl Session {
    pub fn resolve(identity: Option<&Identity>, policy: &dyn AdminPolicy) -> Self {
        match identity {
            Some(id) if !id.uid.is_anonymous() => Self {
                logged_in: true,
                is_admin: policy.is_admin(id),
                uid: Some(id.uid.clone()),
            },
            _ => Self { logged_in: false, is_admin: false, uid: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(uid: &str, email: &str) -> Identity {
        Identity::new(UserId::new(uid)).with_email(email)
    }

    #[test]
    fn test_allowlist_case_insensitive() {
        let policy = AdminAllowlist::new(["Editor@OpsHub.gg", "  "]);
        assert_eq!(policy.len(), 1);
        assert!(policy.is_admin(&ident("u1", "editor@opshub.gg")));
        assert!(!policy.is_admin(&ident("u2", "reader@opshub.gg")));
    }

    #[test]
    fn test_allowlist_requires_email_and_uid() {
        let policy = AdminAllowlist::new(["editor@opshub.gg"]);
        assert!(!policy.is_admin(&Identity::new(UserId::new("u1"))));
        assert!(!policy.is_admin(&ident("", "editor@opshub.gg")));
    }

    #[test]
    fn test_session_resolution() {
        let policy = AdminAllowlist::new(["editor@opshub.gg"]);
        let anon = Session::resolve(None, &policy);
        assert!(!anon.logged_in && !anon.is_admin);

        let admin = Session::resolve(Some(&ident("u1", "editor@opshub.gg")), &policy);
        assert!(admin.logged_in && admin.is_admin);

        let reader = Session::resolve(Some(&ident("u2", "x@y.z")), &NoAdmins);
        assert!(reader.logged_in && !reader.is_admin);
    }
}
