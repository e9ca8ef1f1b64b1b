// SPDX-License-Identifier: AGPL-3.0-or-later

//! Axum extractor for authenticated requests.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(ctx): Auth) -> impl IntoResponse {
//!     // ctx is RequestContext
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use super::{AuthError, RequestContext, Role};
use crate::state::AppState;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// JWT claims carried by session tokens.
///
/// The tenant and broker scope ride inside the token rather than the
/// request body, so a client cannot point a mutation at someone else's
/// scope by editing JSON.
#[derive(Debug, Deserialize)]
struct JwtClaims {
    /// Subject (user ID)
    sub: String,
    /// Expiration timestamp
    #[serde(default)]
    exp: i64,
    /// Issuer
    #[serde(default)]
    #[allow(dead_code)]
    iss: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    broker_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Extractor for authenticated requests.
///
/// ## Authentication Modes
///
/// - **Production mode** (JWT_SECRET set): HS256 signature verification
/// - **Development mode** (no JWT_SECRET): structure validation only
pub struct Auth(pub RequestContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // A test or middleware layer may have placed the context already
        if let Some(context) = parts.extensions.get::<RequestContext>().cloned() {
            return Ok(Auth(context));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let context = verify_jwt(token, &state.auth_config)?;
        Ok(Auth(context))
    }
}

/// Verify a session token and build the request context.
fn verify_jwt(token: &str, auth_config: &crate::state::AuthConfig) -> Result<RequestContext, AuthError> {
    let claims = match &auth_config.secret {
        Some(secret) => verify_jwt_production(token, secret, auth_config.issuer.as_deref())?,
        None => verify_jwt_development(token)?,
    };

    let tenant_id = claims
        .tenant_id
        .ok_or(AuthError::MissingScope("tenant_id"))?;
    let broker_id = claims
        .broker_id
        .ok_or(AuthError::MissingScope("broker_id"))?;
    let role = claims
        .role
        .as_deref()
        .and_then(Role::from_str)
        .unwrap_or_default();

    Ok(RequestContext {
        user_id: claims.sub,
        tenant_id,
        broker_id,
        role,
    })
}

/// Production verification: HS256 with a shared secret.
fn verify_jwt_production(
    token: &str,
    secret: &str,
    issuer: Option<&str>,
) -> Result<JwtClaims, AuthError> {
    let mut validation = Validation::default();
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.validate_aud = false;
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        _ => AuthError::MalformedToken,
    })?;

    Ok(token_data.claims)
}

/// Development verification (no signature check).
///
/// WARNING: only for development environments.
fn verify_jwt_development(token: &str) -> Result<JwtClaims, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<JwtClaims>(token)
        .map_err(|_e| AuthError::MalformedToken)?;
    let claims = token_data.claims;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extractor that requires admin role.
pub struct AdminOnly(pub RequestContext);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(context) = Auth::from_request_parts(parts, state).await?;
        if !context.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(AdminOnly(context))
    }
}

/// Extractor that requires back-office privileges (ops or admin).
pub struct OpsOnly(pub RequestContext);

impl FromRequestParts<AppState> for OpsOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(context) = Auth::from_request_parts(parts, state).await?;
        if !context.has_privilege(Role::Ops) {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(OpsOnly(context))
    }
}
