// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Protobuf messages carried inside the packet envelope. The schema is kept
//! as hand-written `prost` derives so the wire format stays explicit and no
//! build-time codegen is needed.

use prost::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Success = 0,

    // client-side errors
    NoDestination = 100,
    InvalidPacketBody = 101,
    InvalidCommand = 103,
    Unauthorized = 105,

    // server-side errors
    SessionLost = 300,
    SystemException = 500,
    NotImplemented = 501,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum MetaType {
    String = 0,
    Int = 1,
    Float = 2,
}

/// One free-form key/value attached to a packet header. Values always travel
/// as strings; `meta_type` tells the reader how to re-interpret them.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Meta {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(enumeration = "MetaType", tag = "3")]
    pub meta_type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub command: String,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(uint32, tag = "3")]
    pub sequence: u32,
    #[prost(string, tag = "4")]
    pub dest: String,
    #[prost(enumeration = "Status", tag = "5")]
    pub status: i32,
    #[prost(message, repeated, tag = "6")]
    pub meta: Vec<Meta>,
}

/// Server-side record of a logged-in client, keyed by channel id.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Session {
    #[prost(string, tag = "1")]
    pub channel_id: String,
    #[prost(string, tag = "2")]
    pub gate_id: String,
    #[prost(string, tag = "3")]
    pub account: String,
    #[prost(string, tag = "4")]
    pub zone: String,
    #[prost(string, tag = "5")]
    pub remote_ip: String,
    #[prost(string, tag = "6")]
    pub device: String,
    #[prost(string, tag = "7")]
    pub app: String,
    #[prost(string, repeated, tag = "8")]
    pub tags: Vec<String>,
}

/// First frame a mesh node sends after dialing a peer service.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InnerHandshakeReq {
    #[prost(string, tag = "1")]
    pub service_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorResp {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginReq {
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, repeated, tag = "2")]
    pub tags: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginResp {
    #[prost(string, tag = "1")]
    pub channel_id: String,
    #[prost(string, tag = "2")]
    pub account: String,
}

/// Pushed to the previous location when an account signs in elsewhere.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KickoutNotify {
    #[prost(string, tag = "1")]
    pub channel_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageReq {
    #[prost(int32, tag = "1")]
    pub message_type: i32,
    #[prost(string, tag = "2")]
    pub body: String,
    #[prost(string, tag = "3")]
    pub extra: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageResp {
    #[prost(uint64, tag = "1")]
    pub message_id: u64,
    #[prost(int64, tag = "2")]
    pub send_time: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessagePush {
    #[prost(uint64, tag = "1")]
    pub message_id: u64,
    #[prost(int32, tag = "2")]
    pub message_type: i32,
    #[prost(string, tag = "3")]
    pub body: String,
    #[prost(string, tag = "4")]
    pub extra: String,
    #[prost(string, tag = "5")]
    pub sender: String,
    #[prost(int64, tag = "6")]
    pub send_time: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageAckReq {
    #[prost(uint64, tag = "1")]
    pub message_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupCreateReq {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub avatar: String,
    #[prost(string, tag = "3")]
    pub introduction: String,
    #[prost(string, tag = "4")]
    pub owner: String,
    #[prost(string, repeated, tag = "5")]
    pub members: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupCreateResp {
    #[prost(string, tag = "1")]
    pub group_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupCreateNotify {
    #[prost(string, tag = "1")]
    pub group_id: String,
    #[prost(string, repeated, tag = "2")]
    pub members: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupJoinReq {
    #[prost(string, tag = "1")]
    pub account: String,
    #[prost(string, tag = "2")]
    pub group_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupQuitReq {
    #[prost(string, tag = "1")]
    pub account: String,
    #[prost(string, tag = "2")]
    pub group_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupGetReq {
    #[prost(string, tag = "1")]
    pub group_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Member {
    #[prost(string, tag = "1")]
    pub account: String,
    #[prost(string, tag = "2")]
    pub alias: String,
    #[prost(string, tag = "3")]
    pub avatar: String,
    #[prost(int64, tag = "4")]
    pub join_time: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GroupGetResp {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub introduction: String,
    #[prost(string, tag = "4")]
    pub avatar: String,
    #[prost(string, tag = "5")]
    pub owner: String,
    #[prost(message, repeated, tag = "6")]
    pub members: Vec<Member>,
}

/// Encodes any protobuf message to its wire bytes.
pub fn encode_message<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    // encoding into a Vec with reserved capacity cannot fail
    if msg.encode(&mut buf).is_err() {
        unreachable!("insufficient capacity encoding protobuf");
    }
    buf
}
