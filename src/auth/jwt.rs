#![forbid(unsafe_code)]

use crate::auth::types::{Claims, Identity, IdentityError};
use jsonwebtoken::{decode, DecodingKey, Validation};

/// Validates an HS256 token and returns the identity it vouches for.
pub fn resolve_identity(token: &str, secret: &str) -> Result<Identity, IdentityError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => IdentityError::TokenExpired,
        _ => IdentityError::InvalidToken,
    })?;

    if data.claims.sub.trim().is_empty() {
        return Err(IdentityError::MissingSubject);
    }

    Ok(data.claims.into())
}

#[cfg(test)]
pub(crate) fn create_token(stable_id: &str, display_name: &str, secret: &str, lifetime_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = Claims {
        sub: stable_id.to_string(),
        name: display_name.to_string(),
        exp: (now + lifetime_secs) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
