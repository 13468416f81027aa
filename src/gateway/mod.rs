// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Gateway role wiring: an edge server whose acceptor runs the client login
//! flow, meshed to the `chat` and `login` services.

use std::sync::Arc;

use anyhow::Result;

use crate::{
    cfg::GatewayConfig,
    mesh::{Container, HashSelector, RouteSelector, Selector},
    naming::{Naming, ServiceEntry},
    server::{Server, ServerOptions},
    wire::{SN_CHAT, SN_LOGIN},
};

pub mod dialer;
pub mod handler;

pub use dialer::TcpDialer;
pub use handler::Handler;

/// Assembles the gateway: server + handler + container, ready to start.
pub fn build(config: &GatewayConfig, naming: Arc<dyn Naming>) -> Result<Arc<Container>> {
    let handler = Handler::new(&config.service_id, &config.app_secret);

    let mut entry = ServiceEntry::new(
        &config.service_id,
        &config.service_name,
        config.protocol,
        &config.public_address,
        config.public_port,
    );
    entry.tags = config.tags.clone();
    if !config.domain.is_empty() {
        entry.meta.insert("domain".to_string(), config.domain.clone());
    }

    let options = ServerOptions {
        loginwait: config.loginwait,
        readwait: config.readwait,
        writewait: config.writewait,
        message_gpool: config.message_gpool,
        connection_gpool: config.connection_gpool,
    };
    let server = Server::new(&config.listen, entry, options);
    server.set_acceptor(Arc::clone(&handler) as _);
    server.set_message_listener(Arc::clone(&handler) as _);
    server.set_state_listener(Arc::clone(&handler) as _);

    let selector: Arc<dyn Selector> = match &config.route_file {
        Some(path) => Arc::new(RouteSelector::from_file(path)?),
        None => Arc::new(HashSelector),
    };
    let dialer = Arc::new(TcpDialer::new(&config.service_id));

    let container = Container::new(server, naming, dialer, selector, &[SN_CHAT, SN_LOGIN]);
    handler.bind_container(Arc::downgrade(&container));

    Ok(container)
}

/// Builds and runs the gateway until a stop signal arrives.
pub async fn run(config: GatewayConfig, naming: Arc<dyn Naming>) -> Result<()> {
    let container = build(&config, naming)?;
    container.start().await
}
