// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{
    session::{
        LOCATION_EXPIRED, Location, SessionError, SessionStorage, location_key,
        session_key,
    },
    wire::proto::Session,
};

struct Expiring<T> {
    value: T,
    deadline: Instant,
}

impl<T: Clone> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, deadline: Instant::now() + ttl }
    }

    fn live(&self) -> Option<T> {
        (Instant::now() < self.deadline).then(|| self.value.clone())
    }
}

/// In-process session storage honoring the 48 h TTL. Entries expire lazily:
/// a dead entry is dropped the first time something reads it.
#[derive(Default)]
pub struct MemoryStorage {
    locations: DashMap<String, Expiring<Location>>,
    sessions: DashMap<String, Expiring<Session>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { locations: DashMap::new(), sessions: DashMap::new() }
    }

    fn live_location(&self, key: &str) -> Option<Location> {
        // bind before matching so the map guard is released first
        let live = self.locations.get(key).and_then(|e| e.value().live());
        if live.is_none() {
            self.locations.remove(key);
        }
        live
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn add(&self, session: &Session) -> Result<(), SessionError> {
        let loc = Location::new(&session.channel_id, &session.gate_id);
        self.locations.insert(
            location_key(&session.account, &session.device),
            Expiring::new(loc, LOCATION_EXPIRED),
        );
        self.sessions.insert(
            session_key(&session.channel_id),
            Expiring::new(session.clone(), LOCATION_EXPIRED),
        );
        Ok(())
    }

    async fn delete(&self, account: &str, channel_id: &str) -> Result<(), SessionError> {
        self.locations.remove(&location_key(account, ""));
        self.sessions.remove(&session_key(channel_id));
        Ok(())
    }

    async fn get(&self, channel_id: &str) -> Result<Session, SessionError> {
        let key = session_key(channel_id);
        let live = self.sessions.get(&key).and_then(|e| e.value().live());
        match live {
            Some(session) => Ok(session),
            None => {
                self.sessions.remove(&key);
                Err(SessionError::SessionNil)
            },
        }
    }

    async fn get_location(
        &self,
        account: &str,
        device: &str,
    ) -> Result<Location, SessionError> {
        self.live_location(&location_key(account, device))
            .ok_or(SessionError::SessionNil)
    }

    async fn get_locations(
        &self,
        accounts: &[&str],
    ) -> Result<Vec<Location>, SessionError> {
        let mut found = Vec::with_capacity(accounts.len());
        for account in accounts {
            if let Some(loc) = self.live_location(&location_key(account, "")) {
                found.push(loc);
            }
        }
        Ok(found)
    }
}
