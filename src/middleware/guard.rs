// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route guard over the client-side auth view.

use crate::config::Config;
use crate::models::AuthViewState;
use tokio::sync::watch;

/// Who may see a guarded route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPolicy {
    /// Signed-in users only; others go to the login page.
    RequireAuth,
    /// Signed-out users only (login, sign-up); others go home.
    GuestOnly,
}

/// What the view layer should do for a guarded route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Auth state not settled yet; show a spinner.
    Loading,
    Render,
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct AuthGuard {
    policy: GuardPolicy,
    redirect_to: String,
}

impl AuthGuard {
    pub fn require_auth(login_path: impl Into<String>) -> Self {
        Self {
            policy: GuardPolicy::RequireAuth,
            redirect_to: login_path.into(),
        }
    }

    /// Signed-in-only guard that sends others to the configured login page.
    pub fn login_required(config: &Config) -> Self {
        Self::require_auth(config.login_path.clone())
    }

    pub fn guest_only(home_path: impl Into<String>) -> Self {
        Self {
            policy: GuardPolicy::GuestOnly,
            redirect_to: home_path.into(),
        }
    }

    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    /// Decide from a single snapshot.
    pub fn evaluate(&self, view: &AuthViewState) -> GuardDecision {
        let decision = match (view.loading, self.policy, view.is_authenticated()) {
            (true, _, _) => GuardDecision::Loading,
            (false, GuardPolicy::RequireAuth, false) | (false, GuardPolicy::GuestOnly, true) => {
                GuardDecision::Redirect(self.redirect_to.clone())
            }
            (false, _, _) => GuardDecision::Render,
        };

        tracing::debug!(
            policy = ?self.policy,
            user = view.is_authenticated(),
            loading = view.loading,
            decision = ?decision,
            "Auth guard"
        );
        decision
    }

    /// Wait until the view stops loading, then decide.
    pub async fn resolve(&self, view: &mut watch::Receiver<AuthViewState>) -> GuardDecision {
        let settled = match view.wait_for(|v| !v.loading).await {
            Ok(state) => Some(self.evaluate(&state)),
            // Manager gone; decide on whatever was last published.
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.evaluate(&view.borrow()))
    }
}
