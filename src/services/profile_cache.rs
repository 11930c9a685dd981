// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-through profile cache with per-user in-flight de-duplication.
//!
//! - A cached profile is always served without I/O.
//! - At most one fetch per user id is outstanding; concurrent loaders for
//!   the same id await the same shared future and see the same result.
//! - Failures are never cached, so a later load retries.
//! - A fetch only stores its result while its in-flight marker is still
//!   registered and not evicted. After `clear()` or `evict()` a fetch that
//!   was already running still answers its callers but leaves the cache
//!   alone.

use crate::error::ProviderError;
use crate::models::Profile;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type PendingProfile = Shared<BoxFuture<'static, Option<Profile>>>;

struct InFlight {
    ticket: u64,
    pending: PendingProfile,
    /// Set by `evict` while the fetch is running.
    evicted: bool,
}

#[derive(Default)]
struct CacheInner {
    entries: DashMap<String, Profile>,
    in_flight: DashMap<String, InFlight>,
    next_ticket: AtomicU64,
}

/// Profile cache owned by a single session manager.
#[derive(Clone, Default)]
pub(crate) struct ProfileCache {
    inner: Arc<CacheInner>,
}

impl ProfileCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, user_id: &str) -> Option<Profile> {
        self.inner.entries.get(user_id).map(|p| p.clone())
    }

    pub(crate) fn is_in_flight(&self, user_id: &str) -> bool {
        self.inner.in_flight.contains_key(user_id)
    }

    /// Load a profile, calling `fetch` only on a cache miss with no fetch
    /// already running for `user_id`.
    pub(crate) async fn load<F, Fut>(&self, user_id: &str, fetch: F) -> Option<Profile>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Profile, ProviderError>> + Send + 'static,
    {
        if let Some(hit) = self.get(user_id) {
            tracing::debug!(user_id, "Profile cache hit");
            return Some(hit);
        }

        let pending = match self.inner.in_flight.entry(user_id.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(user_id, "Joining in-flight profile fetch");
                entry.get().pending.clone()
            }
            Entry::Vacant(entry) => {
                // A fetch may have finished between the first lookup and here.
                if let Some(hit) = self.get(user_id) {
                    return Some(hit);
                }
                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                let pending = self.start_fetch(user_id.to_string(), ticket, fetch());
                entry.insert(InFlight {
                    ticket,
                    pending: pending.clone(),
                    evicted: false,
                });
                pending
            }
        };

        pending.await
    }

    fn start_fetch<Fut>(&self, user_id: String, ticket: u64, fetch: Fut) -> PendingProfile
    where
        Fut: Future<Output = Result<Profile, ProviderError>> + Send + 'static,
    {
        let inner = self.inner.clone();

        async move {
            let _release = InFlightRelease {
                inner: inner.clone(),
                user_id: user_id.clone(),
                ticket,
            };

            tracing::debug!(user_id = %user_id, "Fetching profile");
            match fetch.await {
                Ok(profile) => {
                    inner.store_if_current(&user_id, &profile, ticket);
                    Some(profile)
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Profile fetch failed");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drop a single user's entry. A fetch still running for that user
    /// keeps its marker, so loaders share it, but will not store.
    pub(crate) fn evict(&self, user_id: &str) {
        // Marker first: a store in progress holds the marker's shard lock.
        if let Some(mut in_flight) = self.inner.in_flight.get_mut(user_id) {
            in_flight.evicted = true;
        }
        if self.inner.entries.remove(user_id).is_some() {
            tracing::debug!(user_id, "Evicted cached profile");
        }
    }

    /// Forget everything, including in-flight markers.
    pub(crate) fn clear(&self) {
        self.inner.in_flight.clear();
        self.inner.entries.clear();
    }
}

impl CacheInner {
    /// Store `profile` only if the fetch holding `ticket` is still the
    /// registered, non-evicted one for `user_id`.
    fn store_if_current(&self, user_id: &str, profile: &Profile, ticket: u64) {
        // Holding the marker keeps evict() and clear() from running between
        // the check and the insert.
        let Some(in_flight) = self.in_flight.get(user_id) else {
            tracing::debug!(user_id, "Cache cleared during fetch, not caching profile");
            return;
        };
        if in_flight.ticket != ticket || in_flight.evicted {
            tracing::debug!(user_id, "Profile evicted during fetch, not caching");
            return;
        }
        self.entries.insert(user_id.to_string(), profile.clone());
    }
}

/// Removes the in-flight marker on every exit path of a fetch.
struct InFlightRelease {
    inner: Arc<CacheInner>,
    user_id: String,
    ticket: u64,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.inner
            .in_flight
            .remove_if(&self.user_id, |_, f| f.ticket == ticket);
    }
}
