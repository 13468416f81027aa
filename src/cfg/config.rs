// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::local_ip, wire::Protocol};

fn default_listen() -> String {
    ":8000".to_string()
}

fn default_public_port() -> u16 {
    8000
}

fn default_gateway_name() -> String {
    "tgateway".to_string()
}

fn default_logic_name() -> String {
    "chat".to_string()
}

fn default_gateway_message_gpool() -> usize {
    10000
}

fn default_gateway_connection_gpool() -> usize {
    15000
}

fn default_logic_message_gpool() -> usize {
    5000
}

fn default_logic_connection_gpool() -> usize {
    500
}

fn default_heartbeat() -> Duration {
    crate::wire::DEFAULT_HEARTBEAT
}

fn default_readwait() -> Duration {
    crate::wire::DEFAULT_READWAIT
}

fn default_writewait() -> Duration {
    crate::wire::DEFAULT_WRITEWAIT
}

fn default_loginwait() -> Duration {
    crate::wire::DEFAULT_LOGINWAIT
}

/// Edge-node configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GatewayConfig {
    #[serde(default, rename = "ServiceID")]
    /// Unique id in the registry; derived from the local IP when empty.
    pub service_id: String,

    #[serde(default = "default_gateway_name", rename = "ServiceName")]
    pub service_name: String,

    #[serde(default = "default_listen", rename = "Listen")]
    /// Listen address; a bare ":port" binds every interface.
    pub listen: String,

    #[serde(default, rename = "PublicAddress")]
    /// Address advertised to the registry; local IP when empty.
    pub public_address: String,

    #[serde(default = "default_public_port", rename = "PublicPort")]
    pub public_port: u16,

    #[serde(default, rename = "Protocol")]
    /// Client-facing protocol; inter-service links are always tcp.
    pub protocol: Protocol,

    #[serde(default, rename = "Tags")]
    pub tags: Vec<String>,

    #[serde(default, rename = "Domain")]
    pub domain: String,

    #[serde(default, rename = "AppSecret")]
    /// HMAC secret for login tokens; the built-in dev secret when empty.
    pub app_secret: String,

    #[serde(default, rename = "RouteFile")]
    /// Zone route table (JSON). Hash selection when unset.
    pub route_file: Option<String>,

    #[serde(default = "default_gateway_message_gpool", rename = "MessageGPool")]
    pub message_gpool: usize,

    #[serde(default = "default_gateway_connection_gpool", rename = "ConnectionGPool")]
    pub connection_gpool: usize,

    #[serde(default = "default_heartbeat", rename = "Heartbeat", with = "serde_secs")]
    pub heartbeat: Duration,

    #[serde(default = "default_readwait", rename = "Readwait", with = "serde_secs")]
    pub readwait: Duration,

    #[serde(default = "default_writewait", rename = "Writewait", with = "serde_secs")]
    pub writewait: Duration,

    #[serde(default = "default_loginwait", rename = "Loginwait", with = "serde_secs")]
    pub loginwait: Duration,
}

/// Logic-tier configuration; `service_name` picks the role (`login`/`chat`).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogicConfig {
    #[serde(default, rename = "ServiceID")]
    pub service_id: String,

    #[serde(default = "default_logic_name", rename = "ServiceName")]
    pub service_name: String,

    #[serde(default = "default_listen", rename = "Listen")]
    pub listen: String,

    #[serde(default, rename = "PublicAddress")]
    pub public_address: String,

    #[serde(default = "default_public_port", rename = "PublicPort")]
    pub public_port: u16,

    #[serde(default, rename = "Tags")]
    pub tags: Vec<String>,

    #[serde(default, rename = "Zone")]
    /// Zone label exposed in registry meta, matched by the route selector.
    pub zone: String,

    #[serde(default = "default_logic_message_gpool", rename = "MessageGPool")]
    pub message_gpool: usize,

    #[serde(default = "default_logic_connection_gpool", rename = "ConnectionGPool")]
    pub connection_gpool: usize,

    #[serde(default = "default_readwait", rename = "Readwait", with = "serde_secs")]
    pub readwait: Duration,

    #[serde(default = "default_writewait", rename = "Writewait", with = "serde_secs")]
    pub writewait: Duration,

    #[serde(default = "default_loginwait", rename = "Loginwait", with = "serde_secs")]
    pub loginwait: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_id: String::new(),
            service_name: default_gateway_name(),
            listen: default_listen(),
            public_address: String::new(),
            public_port: default_public_port(),
            protocol: Protocol::Tcp,
            tags: Vec::new(),
            domain: String::new(),
            app_secret: String::new(),
            route_file: None,
            message_gpool: default_gateway_message_gpool(),
            connection_gpool: default_gateway_connection_gpool(),
            heartbeat: default_heartbeat(),
            readwait: default_readwait(),
            writewait: default_writewait(),
            loginwait: default_loginwait(),
        }
    }
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            service_id: String::new(),
            service_name: default_logic_name(),
            listen: default_listen(),
            public_address: String::new(),
            public_port: default_public_port(),
            tags: Vec::new(),
            zone: String::new(),
            message_gpool: default_logic_message_gpool(),
            connection_gpool: default_logic_connection_gpool(),
            readwait: default_readwait(),
            writewait: default_writewait(),
            loginwait: default_loginwait(),
        }
    }
}

impl GatewayConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: GatewayConfig =
            serde_yaml::from_str(&s).context("failed to parse gateway config YAML")?;
        cfg.apply_env();
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        env_override_string("IM_SERVICE_ID", &mut self.service_id);
        env_override_string("IM_LISTEN", &mut self.listen);
        env_override_string("IM_PUBLIC_ADDRESS", &mut self.public_address);
        env_override_parse("IM_PUBLIC_PORT", &mut self.public_port);
        env_override_parse("IM_MESSAGE_GPOOL", &mut self.message_gpool);
        env_override_parse("IM_CONNECTION_GPOOL", &mut self.connection_gpool);
        env_override_secs("IM_HEARTBEAT", &mut self.heartbeat);
        env_override_secs("IM_READWAIT", &mut self.readwait);
        env_override_secs("IM_WRITEWAIT", &mut self.writewait);
        env_override_secs("IM_LOGINWAIT", &mut self.loginwait);
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        if self.public_address.is_empty() {
            self.public_address = local_ip();
        }
        if self.service_id.is_empty() {
            self.service_id = derive_service_id(&self.service_name, &self.public_address);
        }
        self.listen = normalize_listen(&self.listen);

        ensure!(!self.service_name.is_empty(), "ServiceName must not be empty");
        ensure!(self.message_gpool >= 1, "MessageGPool must be >= 1");
        ensure!(self.connection_gpool >= 1, "ConnectionGPool must be >= 1");
        Ok(())
    }
}

impl LogicConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: LogicConfig =
            serde_yaml::from_str(&s).context("failed to parse logic config YAML")?;
        cfg.apply_env();
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        env_override_string("IM_SERVICE_ID", &mut self.service_id);
        env_override_string("IM_LISTEN", &mut self.listen);
        env_override_string("IM_PUBLIC_ADDRESS", &mut self.public_address);
        env_override_parse("IM_PUBLIC_PORT", &mut self.public_port);
        env_override_parse("IM_MESSAGE_GPOOL", &mut self.message_gpool);
        env_override_parse("IM_CONNECTION_GPOOL", &mut self.connection_gpool);
        env_override_secs("IM_READWAIT", &mut self.readwait);
        env_override_secs("IM_WRITEWAIT", &mut self.writewait);
        env_override_secs("IM_LOGINWAIT", &mut self.loginwait);
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        if self.public_address.is_empty() {
            self.public_address = local_ip();
        }
        if self.service_id.is_empty() {
            self.service_id = derive_service_id(&self.service_name, &self.public_address);
        }
        self.listen = normalize_listen(&self.listen);

        ensure!(!self.service_name.is_empty(), "ServiceName must not be empty");
        ensure!(self.message_gpool >= 1, "MessageGPool must be >= 1");
        ensure!(self.connection_gpool >= 1, "ConnectionGPool must be >= 1");
        Ok(())
    }
}

fn derive_service_id(service_name: &str, address: &str) -> String {
    format!("{}_{}", service_name, address.replace(['.', ':'], ""))
}

/// A bare ":8000" means every interface.
fn normalize_listen(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}

fn env_override_string(key: &str, slot: &mut String) {
    if let Ok(val) = env::var(key)
        && !val.is_empty()
    {
        *slot = val;
    }
}

fn env_override_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = env::var(key)
        && let Ok(parsed) = val.parse()
    {
        *slot = parsed;
    }
}

fn env_override_secs(key: &str, slot: &mut Duration) {
    if let Ok(val) = env::var(key)
        && let Ok(secs) = val.parse::<u64>()
    {
        *slot = Duration::from_secs(secs);
    }
}

/// Serde helpers representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
