// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client for the hosted auth + database backend.
//!
//! Handles:
//! - Password sign-in and sign-up
//! - Holding the current session, refreshing it before it expires
//! - Sign-out (local first, then the backend)
//! - Profile row lookup and creation
//! - Emitting an auth event for every session change

use crate::config::Config;
use crate::error::ProviderError;
use crate::models::{AuthEvent, AuthUser, NewProfile, Profile, Session};
use crate::services::provider::{AuthEventHub, AuthEventStream, IdentityProvider, ProfileStore};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Refresh the access token when it expires within this window.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// PostgREST: return a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Result of a sign-up request.
#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    /// Email confirmation is off; the user is signed in.
    SignedIn(Session),
    /// The user must confirm their email before signing in.
    ConfirmationRequired(AuthUser),
}

/// Backend client. Cheap to clone; clones share the session and subscribers.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
    /// Serializes token refreshes so one refresh token is only spent once.
    refresh_lock: Arc<Mutex<()>>,
    events: AuthEventHub,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            events: AuthEventHub::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.supabase_url, &config.supabase_anon_key)
    }

    // ─── Auth ────────────────────────────────────────────────────────────────

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session: Session = check_response_json(response).await?;
        tracing::info!(user_id = session.user_id(), "Signed in with password");
        self.replace_session(Some(session.clone()), AuthEvent::signed_in(session.clone()))
            .await;
        Ok(session)
    }

    /// Register a new account. `name` is stored as user metadata.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<SignUpOutcome, ProviderError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "name": name },
            }))
            .send()
            .await?;

        let body: serde_json::Value = check_response_json(response).await?;

        if body.get("access_token").is_some() {
            let session: Session = decode(body)?;
            tracing::info!(user_id = session.user_id(), "Signed up and signed in");
            self.replace_session(Some(session.clone()), AuthEvent::signed_in(session.clone()))
                .await;
            return Ok(SignUpOutcome::SignedIn(session));
        }

        // Depending on backend version the user is either the body itself
        // or nested under "user".
        let user_value = match body.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => body,
        };
        let user: AuthUser = decode(user_value)?;
        tracing::info!(user_id = %user.id, "Signed up, awaiting email confirmation");
        Ok(SignUpOutcome::ConfirmationRequired(user))
    }

    /// Look up the user an access token belongs to.
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, ProviderError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        check_response_json(response).await
    }

    /// Current session, refreshed first if it is about to expire.
    async fn load_session(&self) -> Result<Option<Session>, ProviderError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        // Fast path - no I/O
        {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(s) if !s.expires_within(Utc::now(), margin) => return Ok(Some(s.clone())),
                Some(_) => {}
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we were waiting.
        let refresh_token = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(s) if !s.expires_within(Utc::now(), margin) => return Ok(Some(s.clone())),
                Some(s) => s.refresh_token.clone(),
            }
        };

        tracing::info!("Access token expiring, refreshing session");
        match self.refresh(&refresh_token).await {
            Ok(session) => {
                self.replace_session(
                    Some(session.clone()),
                    AuthEvent::token_refreshed(session.clone()),
                )
                .await;
                Ok(Some(session))
            }
            Err(e) if e.is_auth_rejection() => {
                tracing::warn!(error = %e, "Refresh token rejected, dropping session");
                self.replace_session(None, AuthEvent::signed_out()).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        check_response_json(response).await
    }

    /// Drop the local session, then revoke it on the backend.
    async fn revoke_session(&self) -> Result<(), ProviderError> {
        let previous = {
            let mut guard = self.session.write().await;
            let previous = guard.take();
            if previous.is_some() {
                self.events.emit(AuthEvent::signed_out());
            }
            previous
        };

        let Some(session) = previous else {
            tracing::debug!("Sign-out with no active session");
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        check_response(response).await?;
        tracing::info!(user_id = session.user_id(), "Session revoked");
        Ok(())
    }

    /// Swap the stored session and notify subscribers while still holding
    /// the write lock, so event order matches update order.
    async fn replace_session(&self, session: Option<Session>, event: AuthEvent) {
        let mut guard = self.session.write().await;
        *guard = session;
        self.events.emit(event);
    }

    // ─── Profiles ────────────────────────────────────────────────────────────

    /// Fetch a profile row using the given access token for row-level security.
    pub async fn fetch_profile_as(
        &self,
        id: &str,
        access_token: &str,
    ) -> Result<Profile, ProviderError> {
        let url = format!(
            "{}/rest/v1/profiles?id=eq.{}&select=*",
            self.base_url,
            urlencoding::encode(id)
        );

        let response = self
            .http
            .get(url)
            .header("apikey", &self.anon_key)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .bearer_auth(access_token)
            .send()
            .await?;

        // A single-object request that matches no rows comes back as 406.
        if response.status().as_u16() == 406 {
            return Err(ProviderError::NotFound(format!("Profile {}", id)));
        }

        check_response_json(response).await
    }

    /// Insert the profile row for a freshly signed-up user.
    pub async fn create_profile(&self, profile: &NewProfile) -> Result<(), ProviderError> {
        let token = self.access_token_or_anon().await;
        let response = self
            .http
            .post(format!("{}/rest/v1/profiles", self.base_url))
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(token)
            .json(profile)
            .send()
            .await?;

        check_response(response).await?;
        tracing::info!(user_id = %profile.id, "Profile created");
        Ok(())
    }

    async fn access_token_or_anon(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }
}

impl IdentityProvider for SupabaseClient {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        self.load_session().await
    }

    fn subscribe(&self) -> AuthEventStream {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.revoke_session().await
    }
}

impl ProfileStore for SupabaseClient {
    async fn fetch_profile_by_id(&self, id: &str) -> Result<Profile, ProviderError> {
        let token = self.access_token_or_anon().await;
        self.fetch_profile_as(id, &token).await
    }
}

/// Error body shapes used by the auth and REST endpoints.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

/// Check response status and return error if not successful.
async fn check_response(response: reqwest::Response) -> Result<(), ProviderError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(api_error(response).await)
}

/// Check response and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(format!("JSON parse error: {}", e)))
}

async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or(body);

    if status == 429 {
        tracing::warn!("Auth backend rate limit hit (429)");
    }

    ProviderError::Api { status, message }
}

fn decode<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Decode(e.to_string()))
}
