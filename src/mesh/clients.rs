// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;

use crate::{client::TcpClient, naming::ServiceEntry};

/// Per-service-name pool of outbound clients, keyed by service id.
#[derive(Debug, Default)]
pub struct ClientMap {
    clients: DashMap<String, Arc<TcpClient>>,
}

impl ClientMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, client: Arc<TcpClient>) {
        self.clients.insert(client.service_id().to_string(), client);
    }

    pub fn remove(&self, id: &str) {
        self.clients.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<TcpClient>> {
        self.clients.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Lists member services, optionally keeping only those whose meta
    /// carries the given key/value pair.
    pub fn services(&self, filter: Option<(&str, &str)>) -> Vec<ServiceEntry> {
        self.clients
            .iter()
            .map(|e| e.value().service())
            .filter(|svc| match filter {
                Some((k, v)) => svc.meta.get(k).is_some_and(|have| have == v),
                None => true,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
