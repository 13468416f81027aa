// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::Channel;

/// Concurrency-safe `channel_id → Channel` registry with O(1) membership
/// operations. Ids are unique; a second add under the same id replaces the
/// entry, so callers check for duplicates before accepting.
#[derive(Debug, Default)]
pub struct ChannelMap {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, ch: Arc<Channel>) {
        self.channels.insert(ch.id().to_string(), ch);
    }

    pub fn remove(&self, id: &str) {
        self.channels.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
