// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The auth view exposed to the rest of the application.

use super::{AuthUser, Profile, Session};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Coarse lifecycle state derived from an [`AuthViewState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum AuthStatus {
    /// Nothing resolved yet.
    Init,
    /// A session or profile fetch is in flight.
    Authenticating,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of who the current user is.
///
/// `user` and `session` are always set or cleared together. `profile` may
/// lag behind `user` but never belongs to a different user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AuthViewState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    #[serde(skip)]
    pub session: Option<Session>,
    pub loading: bool,
}

impl Default for AuthViewState {
    fn default() -> Self {
        Self {
            user: None,
            profile: None,
            session: None,
            loading: true,
        }
    }
}

impl AuthViewState {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn status(&self) -> AuthStatus {
        match (self.loading, self.user.is_some()) {
            (true, false) if self.session.is_none() => AuthStatus::Init,
            (true, _) => AuthStatus::Authenticating,
            (false, true) => AuthStatus::Authenticated,
            (false, false) => AuthStatus::Unauthenticated,
        }
    }

    /// Adopt a session. Clears the profile if it belongs to someone else.
    pub(crate) fn adopt(&mut self, session: Session) {
        if self.profile.as_ref().map(|p| p.id.as_str()) != Some(session.user_id()) {
            self.profile = None;
        }
        self.user = Some(session.user.clone());
        self.session = Some(session);
    }

    pub(crate) fn clear(&mut self) {
        self.user = None;
        self.profile = None;
        self.session = None;
        self.loading = false;
    }
}
