// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The magic-tagged packet envelope. A single inbound byte stream carries two
//! packet kinds, discriminated by a 4-byte magic:
//!
//! - `LogicPkt` — command packets routed through the mesh, a protobuf
//!   [`Header`] plus an opaque body, both `u32`-length-prefixed.
//! - `BasicPkt` — tiny link-local packets (ping/pong), `u16 code || u16 len
//!   || body`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::wire::{
    MAGIC_BASIC_PKT, MAGIC_LOGIC_PKT, SEQ, endian,
    frame::WireError,
    proto::{Header, Meta, MetaType, Status},
};

pub const CODE_PING: u16 = 1;
pub const CODE_PONG: u16 = 2;

/// Typed view over a meta value. Ints and floats travel as strings and are
/// parsed on access.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    String(String),
    Int(i64),
    Float(f64),
}

impl MetaValue {
    /// The string form of the value, whatever its type.
    pub fn to_string_value(&self) -> String {
        match self {
            MetaValue::String(s) => s.clone(),
            MetaValue::Int(i) => i.to_string(),
            MetaValue::Float(f) => f.to_string(),
        }
    }
}

impl Header {
    /// Returns the service-name prefix of the command ("x.y.z" → "x"), or
    /// "default" when the command carries no dot.
    pub fn service_name(&self) -> &str {
        match self.command.split_once('.') {
            Some((name, _)) => name,
            None => "default",
        }
    }

    pub fn add_string_meta(&mut self, key: &str, value: &str) {
        self.meta.push(Meta {
            key: key.to_string(),
            value: value.to_string(),
            meta_type: MetaType::String as i32,
        });
    }

    /// Removes every entry with the given key, preserving the relative order
    /// of the remaining entries.
    pub fn del_meta(&mut self, key: &str) {
        self.meta.retain(|m| m.key != key);
    }

    pub fn get_meta(&self, key: &str) -> Option<MetaValue> {
        find_meta(&self.meta, key)
    }
}

pub fn find_meta(meta: &[Meta], key: &str) -> Option<MetaValue> {
    let m = meta.iter().find(|m| m.key == key)?;
    match MetaType::try_from(m.meta_type) {
        Ok(MetaType::Int) => m.value.parse().ok().map(MetaValue::Int),
        Ok(MetaType::Float) => m.value.parse().ok().map(MetaValue::Float),
        _ => Some(MetaValue::String(m.value.clone())),
    }
}

/// A command packet exchanged between gateways and logic servers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogicPkt {
    pub header: Header,
    pub body: Vec<u8>,
}

impl LogicPkt {
    /// Builds a packet for `command` with a fresh sequence number.
    pub fn new(command: &str) -> Self {
        Self {
            header: Header {
                command: command.to_string(),
                sequence: SEQ.next(),
                ..Default::default()
            },
            body: Vec::new(),
        }
    }

    /// Builds a response-shaped packet carrying over the routing fields of an
    /// existing header. Meta entries are intentionally not copied.
    pub fn from_header(header: &Header) -> Self {
        Self {
            header: Header {
                command: header.command.clone(),
                channel_id: header.channel_id.clone(),
                sequence: header.sequence,
                dest: header.dest.clone(),
                status: header.status,
                meta: Vec::new(),
            },
            body: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel_id: &str) -> Self {
        self.header.channel_id = channel_id.to_string();
        self
    }

    pub fn with_dest(mut self, dest: &str) -> Self {
        self.header.dest = dest.to_string();
        self
    }

    pub fn with_seq(mut self, sequence: u32) -> Self {
        self.header.sequence = sequence;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.header.status = status as i32;
        self
    }

    pub fn read_body<M: Message + Default>(&self) -> Result<M, WireError> {
        Ok(M::decode(&self.body[..])?)
    }

    pub fn write_body<M: Message>(&mut self, msg: &M) -> &mut Self {
        self.body = super::proto::encode_message(msg);
        self
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        let header_bytes = endian::read_bytes(buf)?;
        let header = Header::decode(&header_bytes[..])?;
        let body = endian::read_bytes(buf)?;
        Ok(Self { header, body })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        endian::write_bytes(buf, &super::proto::encode_message(&self.header));
        endian::write_bytes(buf, &self.body);
    }

    /// Full wire form: magic plus the encoded envelope.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 8 + self.body.len());
        buf.put_slice(&MAGIC_LOGIC_PKT);
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// A link-local packet; only ping/pong codes are defined today.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicPkt {
    pub code: u16,
    pub body: Vec<u8>,
}

impl BasicPkt {
    pub fn new(code: u16) -> Self {
        Self { code, body: Vec::new() }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        let code = endian::read_u16(buf)?;
        let len = endian::read_u16(buf)? as usize;
        let body = endian::read_fixed_bytes(buf, len)?;
        Ok(Self { code, body })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.code);
        buf.put_u16(self.body.len() as u16);
        buf.put_slice(&self.body);
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 4 + self.body.len());
        buf.put_slice(&MAGIC_BASIC_PKT);
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// The decoded form of one wire packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Logic(LogicPkt),
    Basic(BasicPkt),
}

impl Packet {
    /// Reads a packet, discriminating on the leading magic.
    pub fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::UnexpectedEof);
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        match magic {
            MAGIC_LOGIC_PKT => Ok(Packet::Logic(LogicPkt::decode(buf)?)),
            MAGIC_BASIC_PKT => Ok(Packet::Basic(BasicPkt::decode(buf)?)),
            other => Err(WireError::IncorrectMagic(other)),
        }
    }

    pub fn marshal(&self) -> Bytes {
        match self {
            Packet::Logic(p) => p.marshal(),
            Packet::Basic(p) => p.marshal(),
        }
    }
}

pub fn must_read_logic_pkt(buf: &mut impl Buf) -> Result<LogicPkt, WireError> {
    match Packet::read(buf)? {
        Packet::Logic(p) => Ok(p),
        Packet::Basic(_) => Err(WireError::NotLogicPkt),
    }
}

pub fn must_read_basic_pkt(buf: &mut impl Buf) -> Result<BasicPkt, WireError> {
    match Packet::read(buf)? {
        Packet::Basic(p) => Ok(p),
        Packet::Logic(_) => Err(WireError::NotBasicPkt),
    }
}
