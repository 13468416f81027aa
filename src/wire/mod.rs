// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub mod endian;
pub mod frame;
pub mod pkt;
pub mod proto;

/// Magic prefix discriminating the two packet envelopes on the wire.
pub type Magic = [u8; 4];

pub const MAGIC_LOGIC_PKT: Magic = [0xc3, 0x11, 0xa3, 0x65];
pub const MAGIC_BASIC_PKT: Magic = [0xc3, 0x15, 0xa7, 0x65];

// Commands exchanged between clients and the logic tier. The prefix before
// the first dot names the service the command is routed to.
pub const COMMAND_LOGIN_SIGNIN: &str = "login.signin";
pub const COMMAND_LOGIN_SIGNOUT: &str = "login.signout";

pub const COMMAND_CHAT_USER_TALK: &str = "chat.user.talk";
pub const COMMAND_CHAT_GROUP_TALK: &str = "chat.group.talk";
pub const COMMAND_CHAT_TALK_ACK: &str = "chat.talk.ack";

pub const COMMAND_GROUP_CREATE: &str = "chat.group.create";
pub const COMMAND_GROUP_JOIN: &str = "chat.group.join";
pub const COMMAND_GROUP_QUIT: &str = "chat.group.quit";
pub const COMMAND_GROUP_MEMBERS: &str = "chat.group.members";
pub const COMMAND_GROUP_DETAIL: &str = "chat.group.detail";

// Reserved meta keys driving dispatch between gateways and logic servers.
pub const META_DEST_SERVER: &str = "dest.server";
pub const META_DEST_CHANNELS: &str = "dest.channels";

// Meta keys a gateway stamps onto every inbound packet from the channel it
// arrived on.
pub const META_KEY_APP: &str = "app";
pub const META_KEY_ACCOUNT: &str = "account";

// Well-known service names in the discovery registry.
pub const SN_WGATEWAY: &str = "wgateway";
pub const SN_TGATEWAY: &str = "tgateway";
pub const SN_LOGIN: &str = "login";
pub const SN_CHAT: &str = "chat";

pub const DEFAULT_READWAIT: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_WRITEWAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOGINWAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(55);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
/// Transport protocol a service terminates for its peers.
pub enum Protocol {
    #[default]
    Tcp,
    Ws,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Ws => write!(f, "ws"),
        }
    }
}

/// Monotonic packet sequence generator. Wraps past `u32::MAX` and never
/// yields zero, so a zero sequence always means "unset".
#[derive(Debug, Default)]
pub struct Sequence {
    num: AtomicU32,
}

impl Sequence {
    pub const fn new() -> Self {
        Self { num: AtomicU32::new(0) }
    }

    pub fn next(&self) -> u32 {
        loop {
            let next = self.num.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if next != 0 {
                return next;
            }
        }
    }
}

/// Process-wide sequence shared by every packet constructor.
pub static SEQ: Sequence = Sequence::new();
