use std::collections::BTreeMap;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header an authenticating proxy uses to pass the caller's identity.
pub const IDENTITY_HEADER: &str = "x-rh-identity";

/// Standard alphabet, padding optional: proxies are not consistent about it.
const ASSERTION_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Identity of the caller for one request.
///
/// Derived from a trusted assertion (or a verified bearer token) per request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_number: String,
    pub org_id: Option<String>,
    /// Free-form caller type as reported by the proxy ("User", "System", ...).
    pub kind: Option<String>,
    pub entitlements: BTreeMap<String, bool>,
}

impl Identity {
    pub fn new(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            org_id: None,
            kind: None,
            entitlements: BTreeMap::new(),
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn is_entitled(&self, name: &str) -> bool {
        self.entitlements.get(name).copied().unwrap_or(false)
    }

    /// Encode this identity the way an authenticating proxy would.
    ///
    /// Used by tests and by tooling that sits in front of the server.
    pub fn to_assertion(&self) -> String {
        let wire = AssertionWire {
            identity: IdentityWire {
                account_number: self.account_number.clone(),
                kind: self.kind.clone(),
                internal: InternalWire {
                    org_id: self.org_id.clone(),
                },
            },
            entitlements: self
                .entitlements
                .iter()
                .map(|(k, v)| (k.clone(), EntitlementWire { is_entitled: *v }))
                .collect(),
        };
        // Serializing plain strings/maps cannot fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        base64::engine::general_purpose::STANDARD.encode(json)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("identity assertion is not valid base64")]
    Encoding,

    #[error("identity assertion is not valid JSON: {0}")]
    Json(String),

    #[error("identity assertion has an empty account number")]
    MissingAccount,
}

/// Decode the identity header value.
///
/// The proxy is trusted; no signature is checked here. Structure only.
pub fn decode_assertion(header_value: &str) -> Result<Identity, AssertionError> {
    let raw = ASSERTION_ENGINE
        .decode(header_value.trim())
        .map_err(|_| AssertionError::Encoding)?;

    let wire: AssertionWire =
        serde_json::from_slice(&raw).map_err(|e| AssertionError::Json(e.to_string()))?;

    if wire.identity.account_number.trim().is_empty() {
        return Err(AssertionError::MissingAccount);
    }

    Ok(Identity {
        account_number: wire.identity.account_number,
        org_id: wire.identity.internal.org_id,
        kind: wire.identity.kind,
        entitlements: wire
            .entitlements
            .into_iter()
            .map(|(k, v)| (k, v.is_entitled))
            .collect(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionWire {
    identity: IdentityWire,
    #[serde(default)]
    entitlements: BTreeMap<String, EntitlementWire>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityWire {
    #[serde(default)]
    account_number: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    internal: InternalWire,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InternalWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    org_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntitlementWire {
    #[serde(default)]
    is_entitled: bool,
}
