//! Grant-token signing and verification.
//!
//! Both directions of the grant surface use short-lived HS256 tokens signed
//! with the shared secret: outbound calls to the Agenda system carry one, and
//! inbound /api/grant callers must present one. Issuer and audience are
//! pinned from configuration.

use std::collections::HashSet;

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Token lifetime. Bounds how long a single delivery attempt's credential
/// stays usable.
const GRANT_TOKEN_TTL_SECS: u64 = 5 * 60;

/// Custom claims on a grant token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantClaims {
    pub email: String,
    pub product: String,
    pub scope: String,
}

/// Sign a grant token for `email`, valid for five minutes, with a unique jti.
pub fn sign_grant_token(
    secret: &str,
    issuer: &str,
    audience: &str,
    email: &str,
    product: &str,
) -> Result<String> {
    let key = HS256Key::from_bytes(secret.as_bytes());

    let claims = Claims::with_custom_claims(
        GrantClaims {
            email: email.to_string(),
            product: product.to_string(),
            scope: "grant".to_string(),
        },
        Duration::from_secs(GRANT_TOKEN_TTL_SECS),
    )
    .with_issuer(issuer)
    .with_audience(audience)
    .with_jwt_id(Uuid::new_v4().to_string());

    key.authenticate(claims)
        .map_err(|e| AppError::Internal(format!("Failed to sign grant token: {}", e)))
}

/// Verify a grant token's signature, expiry, issuer, and audience.
pub fn verify_grant_token(
    secret: &str,
    issuer: &str,
    audience: &str,
    token: &str,
) -> Result<JWTClaims<GrantClaims>> {
    let key = HS256Key::from_bytes(secret.as_bytes());

    let mut allowed_issuers = HashSet::new();
    allowed_issuers.insert(issuer.to_string());
    let mut allowed_audiences = HashSet::new();
    allowed_audiences.insert(audience.to_string());

    let options = VerificationOptions {
        allowed_issuers: Some(allowed_issuers),
        allowed_audiences: Some(allowed_audiences),
        ..Default::default()
    };

    key.verify_token::<GrantClaims>(token, Some(options))
        .map_err(|_| AppError::Unauthorized)
}
