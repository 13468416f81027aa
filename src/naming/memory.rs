// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::naming::{Naming, NamingError, ServiceCallback, ServiceEntry};

/// In-process registry. Liveness leasing is a property of the external
/// registry; here an entry stays until deregistered. Subscription events fire
/// synchronously on register/deregister with the full membership snapshot.
#[derive(Default)]
pub struct MemoryNaming {
    services: DashMap<String, Vec<ServiceEntry>>,
    watchers: DashMap<String, ServiceCallback>,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, service_name: &str) {
        if let Some(cb) = self.watchers.get(service_name) {
            let snapshot = self
                .services
                .get(service_name)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            cb.value()(snapshot);
        }
    }

    fn matches_tags(entry: &ServiceEntry, tags: &[String]) -> bool {
        tags.iter().all(|t| entry.tags.contains(t))
    }
}

#[async_trait]
impl Naming for MemoryNaming {
    async fn find(
        &self,
        service_name: &str,
        tags: &[String],
    ) -> anyhow::Result<Vec<ServiceEntry>> {
        Ok(self
            .services
            .get(service_name)
            .map(|e| {
                e.value()
                    .iter()
                    .filter(|s| Self::matches_tags(s, tags))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        service_name: &str,
        callback: ServiceCallback,
    ) -> anyhow::Result<()> {
        self.watchers.insert(service_name.to_string(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, service_name: &str) -> anyhow::Result<()> {
        self.watchers.remove(service_name);
        Ok(())
    }

    async fn register(&self, service: ServiceEntry) -> anyhow::Result<()> {
        info!(service = %service, "register service");
        let name = service.name.clone();
        {
            let mut entry = self.services.entry(name.clone()).or_default();
            if entry.iter().any(|s| s.id == service.id) {
                return Err(NamingError::AlreadyRegistered(service.id).into());
            }
            entry.push(service);
        }
        self.notify(&name);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> anyhow::Result<()> {
        let mut owner = None;
        for mut entry in self.services.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|s| s.id != service_id);
            if entry.value().len() != before {
                owner = Some(entry.key().clone());
                break;
            }
        }
        match owner {
            Some(name) => {
                self.notify(&name);
                Ok(())
            },
            None => Err(NamingError::NotFound.into()),
        }
    }
}
