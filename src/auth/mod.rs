#![forbid(unsafe_code)]

// Identity provider collaborator: turns a bearer token into a stable identity.

pub mod jwt;
pub mod types;

pub use types::{Identity, IdentityError};
