// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend (e.g. `https://xyz.supabase.co`)
    pub supabase_url: String,
    /// Public anon API key sent with every backend request
    pub supabase_anon_key: String,
    /// JWT secret for verifying access tokens locally.
    /// When absent, tokens are verified by asking the backend.
    pub jwt_secret: Option<Vec<u8>>,
    /// Frontend URL (CORS origin)
    pub frontend_url: String,
    /// Where unauthenticated users are sent
    pub login_path: String,
    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let supabase_url = env::var("SUPABASE_URL")
            .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(ConfigError::Invalid("SUPABASE_URL", supabase_url));
        }

        Ok(Self {
            supabase_url,
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(String::into_bytes),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            login_path: env::var("LOGIN_PATH").unwrap_or_else(|_| "/login".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        })
    }

    /// Config for tests: points at a local backend that is never contacted
    /// unless a test starts one there.
    pub fn test_default() -> Self {
        Self {
            supabase_url: "http://127.0.0.1:9".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            jwt_secret: Some(b"test_jwt_secret_32_bytes_minimum!".to_vec()),
            frontend_url: "http://localhost:5173".to_string(),
            login_path: "/login".to_string(),
            port: 8080,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("SUPABASE_URL", "https://example.supabase.co/");
        env::set_var("SUPABASE_ANON_KEY", " anon ");
        env::remove_var("SUPABASE_JWT_SECRET");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.supabase_url, "https://example.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon");
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.port, 8080);
    }
}
