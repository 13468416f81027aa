// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::UdpSocket,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub mod config;
pub mod logger;

pub use config::{GatewayConfig, LogicConfig};
pub use logger::init_logger;

/// Resolves a possibly relative config path against the working directory.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}

/// Best-effort non-loopback IPv4 of this host, used to derive service ids
/// and the default public address. No packet is sent: the socket is only
/// "connected" to learn which local address would route outward.
pub fn local_ip() -> String {
    let probe = UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.connect("8.8.8.8:80").map(|_| s))
        .and_then(|s| s.local_addr());
    match probe {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "127.0.0.1".to_string(),
    }
}
