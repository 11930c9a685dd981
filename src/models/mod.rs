// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod profile;
pub mod session;
pub mod view;

pub use profile::{NewProfile, Profile, Role};
pub use session::{AuthEvent, AuthEventKind, AuthUser, Session};
pub use view::{AuthStatus, AuthViewState};
