//! Core domain types and errors for `fspool`.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum and `Result` alias shared by every crate.
//! - **`identity`**: principals, credential token sets and identity providers.
//! - **`target`**: normalized storage-backend URIs.
//! - **`telemetry`**: tracing subscriber initialisation.

pub mod errors;
pub mod identity;
pub mod target;
pub mod telemetry;

pub use self::{
    errors::{BoxError, Error, Result},
    identity::{
        AuthMethod, CredentialToken, CredentialTokenSet, IdentityProvider, Principal,
        ScopedIdentity, StaticIdentity,
    },
    target::Target,
};
