//! `kiln-core`: shared building blocks for the build-farm dispatch core.
//!
//! Pure types only: identifiers, the domain error model, and validated value
//! objects. No IO, no async.

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{DispatchToken, JobId};
pub use value_object::{ArtifactName, ValueObject};
