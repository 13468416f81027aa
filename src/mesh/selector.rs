// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crc::{CRC_32_ISO_HDLC, Crc};

use crate::{naming::ServiceEntry, wire::proto::Header};

const CRC32_IEEE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 (IEEE) of a routing key. Stable across runs and platforms; both
/// selectors reduce through this.
pub fn hash_code(key: &str) -> u32 {
    CRC32_IEEE.checksum(key.as_bytes())
}

/// Picks the destination instance for a packet. Pure: equal inputs must give
/// equal outputs, the caller guarantees `services` is non-empty.
pub trait Selector: Send + Sync {
    fn lookup(&self, header: &Header, services: &[ServiceEntry]) -> String;
}

/// Default selector: consistent hash of the channel id over the instance
/// list.
#[derive(Debug, Default)]
pub struct HashSelector;

impl Selector for HashSelector {
    fn lookup(&self, header: &Header, services: &[ServiceEntry]) -> String {
        let code = hash_code(&header.channel_id) as usize;
        services[code % services.len()].id.clone()
    }
}
