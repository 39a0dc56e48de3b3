//! Worker-side client for the dispatch protocol.
//!
//! `WorkerClient` asks the server for work; each claim comes back as a
//! `ClaimedJob` handle that polls cancellation, uploads artifacts, and
//! reports the outcome. With an `OAuthConfig` every call carries a bearer
//! token obtained by trading a refresh credential.

pub mod client;
pub mod error;
pub mod oauth;

pub use client::{ClaimedJob, Outcome, WorkerClient, API_BASE_PATH};
pub use error::ClientError;
pub use oauth::{OAuthConfig, TokenSource, DEFAULT_CLIENT_ID};
