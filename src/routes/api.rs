// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes (require authentication).
//! The auth middleware is applied in routes/mod.rs for these routes.

use crate::error::Result;
use crate::middleware::AuthenticatedUser;
use crate::models::Profile;
use crate::AppState;
use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/me", get(get_me))
}

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub user_id: String,
    pub email: Option<String>,
    /// None when the profile row is missing or could not be read
    pub profile: Option<Profile>,
}

/// Get the current user and their profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MeResponse>> {
    let profile = match state
        .supabase
        .fetch_profile_as(&user.id, &user.access_token)
        .await
    {
        Ok(profile) => Some(profile),
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Profile lookup failed");
            None
        }
    };

    Ok(Json(MeResponse {
        user_id: user.id,
        email: user.email,
        profile,
    }))
}
