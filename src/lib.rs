// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Helpdesk auth: session state for the helpdesk ticketing app.
//!
//! This crate provides the client-side auth session manager that keeps the
//! current user, profile and session in sync with the hosted auth backend,
//! plus the API service that verifies access tokens for the helpdesk.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use services::SupabaseClient;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub supabase: SupabaseClient,
}
