// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-side view of "who is signed in".
//!
//! `AuthSessionManager` reconciles the identity provider's event stream and
//! the profile store into a single [`AuthViewState`] that the rest of the
//! application reads through a `watch` channel. Only the manager writes it.
//!
//! Lifecycle: [`new`](AuthSessionManager::new) →
//! [`initialize`](AuthSessionManager::initialize) →
//! [`dispose`](AuthSessionManager::dispose) (or drop).
//!
//! No failure is surfaced to callers. A failed session fetch looks like
//! "signed out", a failed profile fetch looks like "no profile", and both
//! are logged.
//!
//! Every change to the user or session starts a new generation. A session
//! fetch only applies its result if no such change happened while it was
//! in flight, so a sign-out or a newer sign-in always wins over it.

use crate::error::ProviderError;
use crate::models::{AuthEvent, AuthEventKind, AuthViewState, Session};
use crate::services::profile_cache::ProfileCache;
use crate::services::provider::{AuthEventStream, IdentityProvider, ProfileStore};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

/// Owns the auth view and the profile cache for one client.
pub struct AuthSessionManager<P, S> {
    inner: Arc<ManagerInner<P, S>>,
    bootstrap: OnceCell<()>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner<P, S> {
    provider: Arc<P>,
    profiles: Arc<S>,
    cache: ProfileCache,
    view: watch::Sender<AuthViewState>,
    /// Bumped on every user/session change, under the view lock.
    generation: AtomicU64,
    /// Set once the bootstrap session fetch has been reconciled.
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl<P: IdentityProvider, S: ProfileStore> AuthSessionManager<P, S> {
    /// Create a manager in the initial (loading, nobody signed in) state.
    /// Nothing is fetched until [`initialize`](Self::initialize).
    pub fn new(provider: Arc<P>, profiles: Arc<S>) -> Self {
        let (view, _) = watch::channel(AuthViewState::default());
        Self {
            inner: Arc::new(ManagerInner {
                provider,
                profiles,
                cache: ProfileCache::new(),
                view,
                generation: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
            bootstrap: OnceCell::new(),
            event_task: Mutex::new(None),
        }
    }

    /// Subscribe to provider events and resolve the current session.
    ///
    /// Runs exactly once per manager; concurrent and repeated calls wait on
    /// the same bootstrap.
    pub async fn initialize(&self) {
        self.bootstrap.get_or_init(|| self.run_bootstrap()).await;
    }

    async fn run_bootstrap(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            tracing::debug!("Manager disposed before initialization, skipping");
            return;
        }

        let stream = self.inner.provider.subscribe();
        tracing::debug!(
            subscription = stream.subscription_id(),
            "Subscribed to auth events"
        );
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run_event_loop(stream));
        let replaced = self
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(stale) = replaced {
            // An earlier bootstrap was cancelled after subscribing.
            stale.abort();
            tracing::debug!("Stopped event consumer of a cancelled bootstrap");
        }

        let generation = self.inner.generation();
        let result = self.inner.provider.current_session().await;
        self.inner.reconcile(result, generation, "initial").await;

        self.inner.initialized.store(true, Ordering::SeqCst);
        tracing::info!(status = ?self.snapshot().status(), "Auth initialized");
    }

    /// Current view.
    pub fn snapshot(&self) -> AuthViewState {
        self.inner.view.borrow().clone()
    }

    /// Receiver that is notified on every view change.
    pub fn watch(&self) -> watch::Receiver<AuthViewState> {
        self.inner.view.subscribe()
    }

    /// Sign the user out of this client.
    ///
    /// Local state is cleared before this returns, so observers see the
    /// signed-out view without waiting on the network. The provider call
    /// runs on a spawned task; the returned future resolves when it is done.
    /// A failed provider call is logged and otherwise ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn sign_out(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.clear_all("sign-out requested");

        let provider = self.inner.provider.clone();
        let handle = tokio::spawn(async move {
            match provider.sign_out().await {
                Ok(()) => tracing::info!("Provider sign-out complete"),
                Err(e) => tracing::warn!(
                    error = %e,
                    "Provider sign-out failed; client stays signed out"
                ),
            }
        });

        async move {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sign-out task did not complete");
            }
        }
    }

    /// Re-read the session from the provider and reconcile the view.
    ///
    /// The result is dropped if the user or session changed while the
    /// provider was being asked.
    pub async fn refresh_session(&self) {
        let generation = self.inner.generation();
        let result = self.inner.provider.current_session().await;
        self.inner.reconcile(result, generation, "refresh").await;
    }

    /// Stop consuming provider events and release the subscription.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        stop_event_task(&self.event_task);
    }
}

impl<P, S> Drop for AuthSessionManager<P, S> {
    fn drop(&mut self) {
        stop_event_task(&self.event_task);
    }
}

fn stop_event_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    let handle = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(handle) = handle {
        // Aborting drops the stream, which deregisters from the provider.
        handle.abort();
        tracing::debug!("Auth event consumer stopped");
    }
}

/// Result of installing a session in the view.
enum Adoption {
    /// The profile on screen already belongs to this user.
    Ready,
    /// A profile still has to be loaded for this user id.
    NeedsProfile(String),
}

impl<P: IdentityProvider, S: ProfileStore> ManagerInner<P, S> {
    async fn run_event_loop(self: Arc<Self>, mut stream: AuthEventStream) {
        while let Some(event) = stream.recv().await {
            if !self.initialized.load(Ordering::SeqCst) {
                tracing::debug!(kind = %event.kind, "Ignoring auth event during bootstrap");
                continue;
            }
            self.handle_event(event);
        }
        tracing::debug!("Auth event stream closed");
    }

    /// Apply one event. User and session changes are applied here, in event
    /// order; profile fetches run on their own tasks.
    fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        tracing::info!(
            kind = %event.kind,
            user_id = event.session.as_ref().map(|s| s.user_id()),
            "Auth state change"
        );

        match event.kind {
            AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed => match event.session {
                Some(session) => match self.adopt_session(session, None) {
                    Some(Adoption::NeedsProfile(user_id)) => {
                        let inner = self.clone();
                        tokio::spawn(async move { inner.load_and_publish(&user_id).await });
                    }
                    Some(Adoption::Ready) | None => {}
                },
                None => self.finish_loading(),
            },
            AuthEventKind::SignedOut => self.clear_all("signed out"),
            AuthEventKind::UserUpdated => match event.session {
                // Profile fields don't change with the auth user record.
                Some(session) => {
                    self.update_view(None, |v| {
                        v.adopt(session);
                        v.loading = false;
                    });
                }
                None => self.finish_loading(),
            },
            AuthEventKind::Other(_) => self.finish_loading(),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Apply a user/session change and start a new generation. With
    /// `expected` set, nothing is applied unless the generation still
    /// matches it. Returns whether the change was applied.
    fn update_view(
        &self,
        expected: Option<u64>,
        change: impl FnOnce(&mut AuthViewState),
    ) -> bool {
        self.view.send_if_modified(|v| {
            let current = self.generation.load(Ordering::SeqCst);
            if expected.is_some_and(|e| e != current) {
                return false;
            }
            self.generation.store(current + 1, Ordering::SeqCst);
            change(v);
            true
        })
    }

    /// Install `session` in the view. `None` means the session was stale
    /// for `expected` and nothing changed.
    fn adopt_session(&self, session: Session, expected: Option<u64>) -> Option<Adoption> {
        let user_id = session.user_id().to_string();
        let mut previous = None;
        let mut needs_profile = false;

        let applied = self.update_view(expected, |v| {
            previous = v.user_id().map(str::to_owned);
            v.adopt(session);
            needs_profile = v.profile.is_none();
            v.loading = needs_profile;
        });
        if !applied {
            return None;
        }

        if let Some(previous) = previous.filter(|p| *p != user_id) {
            self.cache.evict(&previous);
        }

        Some(if needs_profile {
            Adoption::NeedsProfile(user_id)
        } else {
            Adoption::Ready
        })
    }

    /// Load the profile for `user_id` and publish it if that user is still
    /// the current one. Results for a replaced user are dropped.
    async fn load_and_publish(&self, user_id: &str) {
        let profiles = self.profiles.clone();
        let id = user_id.to_string();
        let profile = self
            .cache
            .load(user_id, move || async move {
                profiles.fetch_profile_by_id(&id).await
            })
            .await;

        let found = profile.is_some();
        let published = self.view.send_if_modified(|v| {
            if v.user_id() != Some(user_id) {
                return false;
            }
            v.profile = profile;
            v.loading = false;
            true
        });

        if published {
            tracing::debug!(user_id, found, "Profile published");
        } else {
            tracing::debug!(user_id, "Discarding profile for a user who is no longer current");
        }
    }

    /// Apply a session fetch that started at `generation`.
    async fn reconcile(
        &self,
        result: Result<Option<Session>, ProviderError>,
        generation: u64,
        context: &'static str,
    ) {
        let applied = match result {
            Ok(Some(session)) => {
                let user_id = session.user_id().to_string();
                match self.adopt_session(session, Some(generation)) {
                    Some(adoption) => {
                        tracing::info!(context, user_id = %user_id, "Session resolved");
                        match adoption {
                            Adoption::NeedsProfile(user_id) => {
                                self.load_and_publish(&user_id).await
                            }
                            Adoption::Ready => self.finish_loading(),
                        }
                        true
                    }
                    None => false,
                }
            }
            Ok(None) => {
                let applied = self.update_view(Some(generation), AuthViewState::clear);
                if applied {
                    tracing::info!(context, "No active session");
                }
                applied
            }
            Err(e) => {
                let applied = self.update_view(Some(generation), AuthViewState::clear);
                if applied {
                    tracing::error!(
                        context,
                        error = %e,
                        "Session fetch failed, treating as signed out"
                    );
                }
                applied
            }
        };

        if !applied {
            tracing::debug!(
                context,
                "Auth state changed during session fetch, discarding result"
            );
        }
    }

    fn clear_all(&self, reason: &'static str) {
        self.cache.clear();
        self.update_view(None, AuthViewState::clear);
        tracing::info!(reason, "Cleared auth state");
    }

    fn finish_loading(&self) {
        self.view.send_if_modified(|v| {
            let changed = v.loading;
            v.loading = false;
            changed
        });
    }
}
