#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid identity token")]
    InvalidToken,
    #[error("identity token expired")]
    TokenExpired,
    #[error("identity token has an empty subject")]
    MissingSubject,
}

/// Token claims as issued by the account service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

/// Authenticated caller. Overrides the identity a client claims in `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub stable_id: String,
    pub display_name: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            stable_id: claims.sub,
            display_name: claims.name,
        }
    }
}
