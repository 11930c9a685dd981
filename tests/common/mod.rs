// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use helpdesk_auth::config::Config;
use helpdesk_auth::error::ProviderError;
use helpdesk_auth::models::{AuthEvent, AuthUser, AuthViewState, Profile, Role, Session};
use helpdesk_auth::routes::create_router;
use helpdesk_auth::services::{
    AuthEventHub, AuthEventStream, IdentityProvider, ProfileStore, SupabaseClient,
};
use helpdesk_auth::AppState;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Build a session for `user_id` with the given access token.
#[allow(dead_code)]
pub fn session(user_id: &str, access_token: &str) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: format!("refresh-{user_id}"),
        token_type: "bearer".to_string(),
        expires_at: chrono::Utc::now().timestamp() + 3600,
        user: AuthUser {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@x.com")),
            email_confirmed_at: None,
            created_at: None,
            last_sign_in_at: None,
        },
    }
}

#[allow(dead_code)]
pub fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@x.com", name.to_lowercase()),
        role: Role::User,
        avatar_url: None,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

/// Wait (bounded) until the view satisfies `pred`.
#[allow(dead_code)]
pub async fn wait_until(
    rx: &mut watch::Receiver<AuthViewState>,
    pred: impl FnMut(&AuthViewState) -> bool,
) -> AuthViewState {
    let view = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for auth view")
        .expect("session manager dropped");
    AuthViewState::clone(&view)
}

/// In-memory identity provider.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeProvider {
    hub: AuthEventHub,
    session: Mutex<Option<Session>>,
    session_delay: Mutex<Duration>,
    /// Read the stored session before the delay instead of after it.
    read_before_delay: AtomicBool,
    fail_session: AtomicBool,
    sign_out_delay: Mutex<Duration>,
    fail_sign_out: AtomicBool,
    pub session_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_session(session: Session) -> Arc<Self> {
        let provider = Self::default();
        *provider.session.lock().unwrap() = Some(session);
        Arc::new(provider)
    }

    /// Change the stored session without telling subscribers.
    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn emit(&self, event: AuthEvent) {
        self.hub.emit(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn delay_session_fetch(&self, delay: Duration) {
        *self.session_delay.lock().unwrap() = delay;
    }

    /// Answer session fetches with the session stored when the fetch
    /// started, after `delay`.
    pub fn delay_after_read(&self, delay: Duration) {
        *self.session_delay.lock().unwrap() = delay;
        self.read_before_delay.store(true, Ordering::SeqCst);
    }

    pub fn fail_session_fetch(&self) {
        self.fail_session.store(true, Ordering::SeqCst);
    }

    pub fn fail_sign_out_after(&self, delay: Duration) {
        *self.sign_out_delay.lock().unwrap() = delay;
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }
}

impl IdentityProvider for FakeProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let early = self
            .read_before_delay
            .load(Ordering::SeqCst)
            .then(|| self.session.lock().unwrap().clone());
        let delay = *self.session_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.fail_session.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        match early {
            Some(session) => Ok(session),
            None => Ok(self.session.lock().unwrap().clone()),
        }
    }

    fn subscribe(&self) -> AuthEventStream {
        self.hub.subscribe()
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_out_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                message: "logout failed".to_string(),
            });
        }
        self.set_session(None);
        self.hub.emit(AuthEvent::signed_out());
        Ok(())
    }
}

/// In-memory profile table with per-user failure and gating controls.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeProfiles {
    rows: Mutex<HashMap<String, Profile>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
}

#[allow(dead_code)]
impl FakeProfiles {
    pub fn with(profiles: impl IntoIterator<Item = Profile>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for p in profiles {
                rows.insert(p.id.clone(), p);
            }
        }
        Arc::new(store)
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Hold fetches for `id` until [`release`](Self::release) is called.
    pub fn gate(&self, id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(id) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl ProfileStore for FakeProfiles {
    async fn fetch_profile_by_id(&self, id: &str) -> Result<Profile, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let result = if self.failing.lock().unwrap().contains(id) {
            Err(ProviderError::Api {
                status: 500,
                message: "query failed".to_string(),
            })
        } else {
            self.rows
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("Profile {id}")))
        };

        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Create a test app that verifies tokens locally.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let supabase = SupabaseClient::from_config(&config);

    let state = Arc::new(AppState { config, supabase });

    (create_router(state.clone()), state)
}
