// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Service-discovery contract. The production registry (etcd, consul, ...)
//! lives outside this crate; everything here is the interface the mesh needs
//! plus an in-process implementation for tests and single-host setups.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::Protocol;

pub mod memory;

pub use memory::MemoryNaming;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("service not found")]
    NotFound,
    #[error("service already registered: {0}")]
    AlreadyRegistered(String),
}

/// One registered instance of a named process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceEntry {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl ServiceEntry {
    pub fn new(
        id: &str,
        name: &str,
        protocol: Protocol,
        address: &str,
        port: u16,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            port,
            protocol,
            tags: Vec::new(),
            meta: HashMap::new(),
        }
    }

    /// Address a mesh peer dials: bare `host:port` for tcp, URL otherwise.
    pub fn dial_url(&self) -> String {
        match self.protocol {
            Protocol::Tcp => format!("{}:{}", self.address, self.port),
            other => format!("{}://{}:{}", other, self.address, self.port),
        }
    }
}

impl std::fmt::Display for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID: {}, Name: {}, Address: {}, Port: {}, Tags: {:?}, Meta: {:?}",
            self.id, self.name, self.address, self.port, self.tags, self.meta
        )
    }
}

/// Callback invoked with the full membership of a service name whenever it
/// changes.
pub type ServiceCallback = Arc<dyn Fn(Vec<ServiceEntry>) + Send + Sync>;

#[async_trait]
pub trait Naming: Send + Sync {
    async fn find(
        &self,
        service_name: &str,
        tags: &[String],
    ) -> anyhow::Result<Vec<ServiceEntry>>;

    async fn subscribe(
        &self,
        service_name: &str,
        callback: ServiceCallback,
    ) -> anyhow::Result<()>;

    async fn unsubscribe(&self, service_name: &str) -> anyhow::Result<()>;

    async fn register(&self, service: ServiceEntry) -> anyhow::Result<()>;

    async fn deregister(&self, service_id: &str) -> anyhow::Result<()>;
}
