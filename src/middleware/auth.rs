// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-token authentication middleware.
//!
//! Tokens come from the `sb-access-token` cookie or an `Authorization:
//! Bearer` header. With a JWT secret configured they are verified locally;
//! otherwise the backend is asked who the token belongs to.

use crate::error::{AppError, ProviderError};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cookie carrying the access token for browser requests.
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";

/// Audience the backend puts on tokens of signed-in users.
const AUTHENTICATED_AUDIENCE: &str = "authenticated";

/// Access token claims we rely on.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (auth user id)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    pub aud: String,
}

/// Authenticated user attached to the request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    /// The caller's token, for backend calls made on their behalf.
    pub access_token: String,
}

/// Middleware that requires a valid access token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&jar, request.headers()).ok_or(AppError::Unauthorized)?;

    let user = match &state.config.jwt_secret {
        Some(secret) => {
            let claims = verify_access_token(&token, secret).map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AppError::InvalidToken
            })?;
            AuthenticatedUser {
                id: claims.sub,
                email: claims.email,
                access_token: token,
            }
        }
        None => {
            let user = state
                .supabase
                .get_user(&token)
                .await
                .map_err(|e| log_backend_rejection(&e))?;
            AuthenticatedUser {
                id: user.id,
                email: user.email,
                access_token: token,
            }
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Cookie first, then header.
fn extract_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Verify an HS256 access token signed with the backend's JWT secret.
pub fn verify_access_token(
    token: &str,
    secret: &[u8],
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map(|d| d.claims)
}

fn log_backend_rejection(e: &ProviderError) -> AppError {
    if e.is_auth_rejection() {
        tracing::debug!(error = %e, "Backend rejected access token");
        AppError::InvalidToken
    } else {
        tracing::warn!(error = %e, "Could not verify access token with backend");
        AppError::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"unit_test_secret";

    fn token(aud: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "u1".to_string(),
            email: Some("ann@x.com".to_string()),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            aud: aud.to_string(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_accepts_authenticated_audience() {
        let claims = verify_access_token(&token("authenticated", 3600), SECRET).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("ann@x.com"));
    }

    #[test]
    fn test_verify_rejects_wrong_audience_expiry_and_key() {
        assert!(verify_access_token(&token("anon", 3600), SECRET).is_err());
        assert!(verify_access_token(&token("authenticated", -3600), SECRET).is_err());
        assert!(verify_access_token(&token("authenticated", 3600), b"other").is_err());
    }

    #[test]
    fn test_extract_token_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );

        let jar = CookieJar::new();
        assert_eq!(
            extract_token(&jar, &headers).as_deref(),
            Some("from-header")
        );

        let jar = jar.add(axum_extra::extract::cookie::Cookie::new(
            ACCESS_TOKEN_COOKIE,
            "from-cookie",
        ));
        assert_eq!(
            extract_token(&jar, &headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_extract_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_token(&CookieJar::new(), &headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(extract_token(&CookieJar::new(), &headers).is_none());
    }
}
