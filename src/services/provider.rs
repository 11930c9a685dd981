// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Contracts for the hosted identity and profile backends.
//!
//! The session manager only talks to the backend through these traits, so
//! tests can drive it with in-memory fakes and the service binary can plug
//! in the HTTP client.

use crate::error::ProviderError;
use crate::models::{AuthEvent, Profile, Session};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity provider: owns sessions and reports every change to them.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Current session, or `None` when nobody is signed in.
    fn current_session(
        &self,
    ) -> impl Future<Output = Result<Option<Session>, ProviderError>> + Send;

    /// Register for identity-change events. Events arrive in the order the
    /// provider produced them. Dropping the stream deregisters it.
    fn subscribe(&self) -> AuthEventStream;

    /// Revoke the current session.
    fn sign_out(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// Persistence lookup for profile rows.
pub trait ProfileStore: Send + Sync + 'static {
    /// Fetch a single profile by primary key.
    fn fetch_profile_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Profile, ProviderError>> + Send;
}

type Listeners = DashMap<u64, mpsc::UnboundedSender<AuthEvent>>;

/// Fan-out of auth events to any number of subscribers.
///
/// Each subscriber gets its own unbounded channel, so a slow consumer never
/// causes events to be dropped or reordered.
#[derive(Clone, Default)]
pub struct AuthEventHub {
    listeners: Arc<Listeners>,
    next_id: Arc<AtomicU64>,
}

impl AuthEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> AuthEventStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(id, tx);
        tracing::debug!(subscription = id, "Auth event subscriber registered");

        AuthEventStream {
            rx,
            subscription: Subscription {
                id,
                listeners: Arc::downgrade(&self.listeners),
            },
        }
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: AuthEvent) {
        tracing::debug!(kind = %event.kind, "Emitting auth event");
        self.listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Ordered stream of auth events for one subscriber.
pub struct AuthEventStream {
    rx: mpsc::UnboundedReceiver<AuthEvent>,
    subscription: Subscription,
}

impl AuthEventStream {
    /// Next event, or `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        self.rx.recv().await
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription.id
    }
}

/// Registration handle; deregisters from the hub when dropped.
struct Subscription {
    id: u64,
    listeners: std::sync::Weak<Listeners>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.id);
            tracing::debug!(subscription = self.id, "Auth event subscriber released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthEventKind;

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let hub = AuthEventHub::new();
        let mut stream = hub.subscribe();

        hub.emit(AuthEvent::signed_out());
        hub.emit(AuthEvent::new(AuthEventKind::Other("A".into()), None));
        hub.emit(AuthEvent::new(AuthEventKind::Other("B".into()), None));

        assert_eq!(stream.recv().await.unwrap().kind, AuthEventKind::SignedOut);
        assert_eq!(
            stream.recv().await.unwrap().kind,
            AuthEventKind::Other("A".into())
        );
        assert_eq!(
            stream.recv().await.unwrap().kind,
            AuthEventKind::Other("B".into())
        );
    }

    #[tokio::test]
    async fn test_dropping_stream_deregisters() {
        let hub = AuthEventHub::new();
        let first = hub.subscribe();
        let _second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);

        // Emitting after a drop must not fail or resurrect the listener
        hub.emit(AuthEvent::signed_out());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_hub_dropped() {
        let hub = AuthEventHub::new();
        let mut stream = hub.subscribe();
        drop(hub);
        assert!(stream.recv().await.is_none());
    }
}
