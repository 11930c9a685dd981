// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - auth session logic and backend clients.

mod profile_cache;
pub mod provider;
pub mod session_manager;
pub mod supabase;

pub use provider::{AuthEventHub, AuthEventStream, IdentityProvider, ProfileStore};
pub use session_manager::AuthSessionManager;
pub use supabase::{SignUpOutcome, SupabaseClient};
