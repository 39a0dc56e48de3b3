use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{AssertionError, BearerValidator, Identity, TokenValidationError, decode_assertion};

/// Why a request was refused.
///
/// Every variant surfaces to callers as "not found"; the distinction exists
/// for logs only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("no identity assertion or bearer token present")]
    MissingCredentials,

    #[error("identity assertion rejected: {0}")]
    Assertion(#[from] AssertionError),

    #[error("bearer token rejected: {0}")]
    Bearer(#[from] TokenValidationError),

    #[error("account '{0}' is not allowed")]
    AccountNotAllowed(String),
}

/// Credentials found on a request, as raw strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Credentials<'a> {
    /// Value of the identity assertion header.
    pub assertion: Option<&'a str>,
    /// Bearer token from the `Authorization` header, prefix stripped.
    pub bearer: Option<&'a str>,
}

/// Allow-list based access policy.
///
/// An empty allow-list disables enforcement entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    allowed_accounts: BTreeSet<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(allowed_accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_accounts: allowed_accounts
                .into_iter()
                .map(Into::<String>::into)
                .filter(|a| !a.trim().is_empty())
                .collect(),
        }
    }

    /// Policy that lets everything through.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn is_enforced(&self) -> bool {
        !self.allowed_accounts.is_empty()
    }

    pub fn allows(&self, account_number: &str) -> bool {
        self.allowed_accounts.contains(account_number)
    }

    /// Authenticate one request.
    ///
    /// - Enforcement off: `Ok(None)`, credentials are not inspected.
    /// - Assertion present: it decides, bearer is ignored.
    /// - Otherwise a bearer token is tried when a validator is configured.
    pub fn authenticate(
        &self,
        credentials: Credentials<'_>,
        bearer_validator: Option<&dyn BearerValidator>,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AccessError> {
        if !self.is_enforced() {
            return Ok(None);
        }

        let identity = match (credentials.assertion, credentials.bearer, bearer_validator) {
            (Some(assertion), _, _) => decode_assertion(assertion)?,
            (None, Some(token), Some(validator)) => validator.validate(token, now)?.into_identity(),
            _ => return Err(AccessError::MissingCredentials),
        };

        if !self.allows(&identity.account_number) {
            return Err(AccessError::AccountNotAllowed(identity.account_number));
        }

        Ok(Some(identity))
    }
}
