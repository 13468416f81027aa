// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use im_mesh_rs::wire::{
    COMMAND_LOGIN_SIGNIN, MAGIC_LOGIC_PKT,
    frame::WireError,
    pkt::{
        BasicPkt, LogicPkt, MetaValue, Packet, must_read_basic_pkt,
        must_read_logic_pkt,
    },
    proto::{Header, LoginReq, Meta, MetaType, Status},
};

#[test]
fn test_logic_pkt_marshal_round_trip() -> Result<()> {
    // marshaled bytes start with the logic magic and decode back
    let pkt = LogicPkt::new(COMMAND_LOGIN_SIGNIN).with_seq(1);
    let raw = pkt.marshal();
    assert_eq!(&raw[..4], &MAGIC_LOGIC_PKT);

    let mut buf = raw;
    let back = must_read_logic_pkt(&mut buf)?;
    assert_eq!(back, pkt);
    assert_eq!(back.header.command, "login.signin");
    assert_eq!(back.header.sequence, 1);
    Ok(())
}

#[test]
fn test_logic_pkt_body_round_trip() -> Result<()> {
    let mut pkt = LogicPkt::new(COMMAND_LOGIN_SIGNIN)
        .with_channel("ch1")
        .with_status(Status::Success);
    pkt.write_body(&LoginReq { token: "tok".to_string(), tags: vec![] });

    let mut raw = pkt.marshal();
    let back = must_read_logic_pkt(&mut raw)?;
    let body: LoginReq = back.read_body()?;
    assert_eq!(body.token, "tok");
    assert_eq!(back.header.channel_id, "ch1");
    Ok(())
}

#[test]
fn test_basic_pkt_decode_literal() -> Result<()> {
    // code 0x0708, length 12, body "hello, world"
    let raw = hex!("07 08 00 0c 68 65 6c 6c 6f 2c 20 77 6f 72 6c 64");
    let mut buf = &raw[..];
    let pkt = BasicPkt::decode(&mut buf)?;
    assert_eq!(pkt.code, 0x0708);
    assert_eq!(pkt.body.len(), 12);
    assert_eq!(pkt.body, b"hello, world");
    Ok(())
}

#[test]
fn test_basic_pkt_marshal_round_trip() -> Result<()> {
    let pkt = BasicPkt { code: 1, body: b"x".to_vec() };
    let mut raw = pkt.marshal();
    let back = must_read_basic_pkt(&mut raw)?;
    assert_eq!(back, pkt);
    Ok(())
}

#[test]
fn test_incorrect_magic_is_rejected() {
    let raw = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0];
    let mut buf = &raw[..];
    let err = Packet::read(&mut buf).expect_err("magic must be rejected");
    assert!(matches!(err, WireError::IncorrectMagic([0xde, 0xad, 0xbe, 0xef])));
    assert!(err.to_string().starts_with("incorrect magic code"));
}

#[test]
fn test_must_read_guards_variant() {
    let mut logic = LogicPkt::new("a.b").with_channel("c").marshal();
    let err = must_read_basic_pkt(&mut logic).expect_err("wrong variant");
    assert!(matches!(err, WireError::NotBasicPkt));

    let mut basic = BasicPkt::new(1).marshal();
    let err = must_read_logic_pkt(&mut basic).expect_err("wrong variant");
    assert!(matches!(err, WireError::NotLogicPkt));
}

#[test]
fn test_service_name() {
    let mut header = Header::default();
    header.command = "x.y.z".to_string();
    assert_eq!(header.service_name(), "x");

    header.command = "abc".to_string();
    assert_eq!(header.service_name(), "default");
}

#[test]
fn test_meta_helpers() {
    let mut header = Header::default();
    header.add_string_meta("dest.server", "gw1");
    header.meta.push(Meta {
        key: "retries".to_string(),
        value: "3".to_string(),
        meta_type: MetaType::Int as i32,
    });
    header.meta.push(Meta {
        key: "load".to_string(),
        value: "0.5".to_string(),
        meta_type: MetaType::Float as i32,
    });

    assert_eq!(
        header.get_meta("dest.server"),
        Some(MetaValue::String("gw1".to_string()))
    );
    assert_eq!(header.get_meta("retries"), Some(MetaValue::Int(3)));
    assert_eq!(header.get_meta("load"), Some(MetaValue::Float(0.5)));
    assert_eq!(header.get_meta("missing"), None);

    // removal preserves the relative order of survivors
    header.del_meta("retries");
    let keys: Vec<&str> = header.meta.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, ["dest.server", "load"]);
}

#[test]
fn test_from_header_drops_meta() {
    let mut pkt = LogicPkt::new("chat.user.talk").with_channel("ch9");
    pkt.header.add_string_meta("dest.server", "gw1");

    let resp = LogicPkt::from_header(&pkt.header);
    assert_eq!(resp.header.command, "chat.user.talk");
    assert_eq!(resp.header.channel_id, "ch9");
    assert_eq!(resp.header.sequence, pkt.header.sequence);
    assert!(resp.header.meta.is_empty());
    assert!(resp.body.is_empty());
}
