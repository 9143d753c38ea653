//! The authenticated caller and its canonical wire form.
//!
//! An [`Identity`] is built once at ingress and then only read. Between
//! services it travels as JSON in the identity header; the bytes of that JSON
//! are what the signature covers, so [`Identity::to_canonical_bytes`] must be
//! deterministic for a given identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A group the caller belongs to, with the rights granted inside it.
///
/// Memberships are resolved at ingress and are not forwarded to other
/// services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: u64,
    pub name: String,
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

/// The caller on whose behalf a request runs.
///
/// The default value is the anonymous identity (id `0`, no email, no roles).
///
/// # Examples
///
/// ```
/// use trustgate::identity::Identity;
///
/// let user = Identity::new(42, "a@b.c").with_session("s-1").with_role("meter.read");
/// assert!(user.has_role("meter.read"));
/// assert!(!user.is_anonymous());
/// assert_eq!(
///     user.to_canonical_bytes(),
///     br#"{"id":42,"email":"a@b.c","sessionKey":"s-1","roles":["meter.read"]}"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: u32,
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "sessionKey")]
    pub session_token: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(skip)]
    pub groups: Vec<GroupMembership>,
}

impl Identity {
    pub fn new(id: u32, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = token.into();
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: GroupMembership) -> Self {
        self.groups.push(group);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// `true` for the default identity that carries no caller.
    pub fn is_anonymous(&self) -> bool {
        self.id == 0 && self.email.is_empty() && self.session_token.is_empty()
    }

    /// Serializes the fields forwarded between services.
    ///
    /// Group memberships are dropped; roles are emitted in sorted order.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        // A struct of strings, integers and a string set always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parses the identity header payload.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identity_has_stable_form() {
        let anon = Identity::default();
        assert!(anon.is_anonymous());
        assert_eq!(
            anon.to_canonical_bytes(),
            br#"{"id":0,"email":"","sessionKey":"","roles":[]}"#
        );
    }

    #[test]
    fn groups_are_not_forwarded() {
        let user = Identity::new(7, "ops@example.com").with_group(GroupMembership {
            group_id: 3,
            name: "north".into(),
            can_update: true,
            ..GroupMembership::default()
        });
        let wire = user.to_canonical_bytes();
        assert!(!String::from_utf8_lossy(&wire).contains("north"));

        let back = Identity::from_canonical_bytes(&wire).unwrap();
        assert_eq!(back.id, 7);
        assert!(back.groups.is_empty());
    }

    #[test]
    fn role_order_does_not_change_bytes() {
        let a = Identity::new(1, "x@y.z").with_role("b").with_role("a");
        let b = Identity::new(1, "x@y.z").with_role("a").with_role("b");
        assert_eq!(a.to_canonical_bytes(), b.to_canonical_bytes());
    }

    #[test]
    fn missing_optional_fields_default() {
        let parsed = Identity::from_canonical_bytes(br#"{"id":9}"#).unwrap();
        assert_eq!(parsed.id, 9);
        assert!(parsed.email.is_empty());
        assert!(parsed.roles.is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Identity::from_canonical_bytes(b"not json").is_err());
    }
}
