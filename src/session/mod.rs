// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Where is an account logged in? The session storage answers that with two
//! mirrored entries: `login:loc:{account}` → [`Location`] and
//! `login:sn:{channel_id}` → [`Session`], both expiring after 48 hours.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;

use crate::wire::{endian, proto::Session};

pub mod memory;

pub use memory::MemoryStorage;

pub const LOCATION_EXPIRED: Duration = Duration::from_secs(48 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("err:session nil")]
    SessionNil,
    #[error("location data is empty")]
    EmptyData,
    #[error("malformed location data")]
    Malformed,
}

/// Where a logged-in account is currently reachable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub channel_id: String,
    pub gate_id: String,
}

impl Location {
    pub fn new(channel_id: &str, gate_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            gate_id: gate_id.to_string(),
        }
    }

    /// Two `u16`-length-prefixed strings: channel id then gate id.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.channel_id.len() + self.gate_id.len());
        endian::write_short_bytes(&mut buf, self.channel_id.as_bytes());
        endian::write_short_bytes(&mut buf, self.gate_id.as_bytes());
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, SessionError> {
        if data.is_empty() {
            return Err(SessionError::EmptyData);
        }
        let mut buf = data;
        let channel_id =
            endian::read_short_string(&mut buf).map_err(|_| SessionError::Malformed)?;
        let gate_id =
            endian::read_short_string(&mut buf).map_err(|_| SessionError::Malformed)?;
        Ok(Self { channel_id, gate_id })
    }
}

/// Storage key for an account's location, optionally device-scoped.
pub fn location_key(account: &str, device: &str) -> String {
    if device.is_empty() {
        format!("login:loc:{account}")
    } else {
        format!("login:loc:{account}:{device}")
    }
}

/// Storage key for the session behind a channel.
pub fn session_key(channel_id: &str) -> String {
    format!("login:sn:{channel_id}")
}

/// The only persistence the logic tier requires.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Stores the location (keyed by account, and by account:device when a
    /// device is set) and the session (keyed by channel id).
    async fn add(&self, session: &Session) -> Result<(), SessionError>;

    /// Removes both entries.
    async fn delete(&self, account: &str, channel_id: &str) -> Result<(), SessionError>;

    async fn get(&self, channel_id: &str) -> Result<Session, SessionError>;

    async fn get_location(
        &self,
        account: &str,
        device: &str,
    ) -> Result<Location, SessionError>;

    /// Multi-get; accounts without a stored location are skipped, not errors.
    async fn get_locations(
        &self,
        accounts: &[&str],
    ) -> Result<Vec<Location>, SessionError>;
}
