//! `kiln-auth`: access-control primitives for the dispatch protocol.
//!
//! This crate is intentionally decoupled from HTTP and storage: it decodes
//! credentials, applies the allow-list, and decides token freshness. Wiring
//! those decisions into requests is the API/client crates' job.

pub mod access_token;
pub mod authorize;
pub mod claims;
pub mod identity;

pub use access_token::{AccessToken, REFRESH_MARGIN_SECS};
pub use authorize::{AccessError, AccessPolicy, Credentials};
pub use claims::{BearerClaims, BearerValidator, Hs256BearerValidator, TokenValidationError, validate_claims};
pub use identity::{AssertionError, IDENTITY_HEADER, Identity, decode_assertion};
