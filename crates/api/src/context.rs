use kiln_auth::Identity;

/// Identity the access layer attached to a request.
///
/// Only present when an allow-list is enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    identity: Identity,
}

impl IdentityContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn account_number(&self) -> &str {
        &self.identity.account_number
    }

    pub fn org_id(&self) -> Option<&str> {
        self.identity.org_id.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
