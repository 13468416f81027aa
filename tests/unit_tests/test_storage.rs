// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use im_mesh_rs::{
    session::{Location, MemoryStorage, SessionError, SessionStorage},
    wire::proto::Session,
};

fn session(account: &str, channel_id: &str, gate_id: &str) -> Session {
    Session {
        account: account.to_string(),
        channel_id: channel_id.to_string(),
        gate_id: gate_id.to_string(),
        app: "im".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_location_codec_round_trip() -> Result<()> {
    let loc = Location::new("gw01_alice_7", "gw01");
    let raw = loc.encode();
    // u16 length prefixes, big endian
    assert_eq!(&raw[..2], &[0, 12]);
    assert_eq!(Location::decode(&raw)?, loc);
    Ok(())
}

#[test]
fn test_location_decode_empty_fails() {
    assert!(matches!(Location::decode(&[]), Err(SessionError::EmptyData)));
}

#[tokio::test]
async fn test_add_then_get_location() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.add(&session("alice", "ch1", "gw1")).await?;

    let loc = storage.get_location("alice", "").await?;
    assert_eq!(loc, Location::new("ch1", "gw1"));

    let sess = storage.get("ch1").await?;
    assert_eq!(sess.account, "alice");
    Ok(())
}

#[tokio::test]
async fn test_device_scoped_location() -> Result<()> {
    let storage = MemoryStorage::new();
    let mut s = session("alice", "ch_mobile", "gw1");
    s.device = "mobile".to_string();
    storage.add(&s).await?;

    let loc = storage.get_location("alice", "mobile").await?;
    assert_eq!(loc.channel_id, "ch_mobile");
    // the plain account key was not written for a device-scoped session
    assert!(matches!(
        storage.get_location("alice", "").await,
        Err(SessionError::SessionNil)
    ));
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_both_entries() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.add(&session("alice", "ch1", "gw1")).await?;
    storage.delete("alice", "ch1").await?;

    assert!(matches!(
        storage.get_location("alice", "").await,
        Err(SessionError::SessionNil)
    ));
    assert!(matches!(storage.get("ch1").await, Err(SessionError::SessionNil)));
    Ok(())
}

#[tokio::test]
async fn test_add_replaces_location() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.add(&session("alice", "ch_old", "gw_old")).await?;
    storage.add(&session("alice", "ch_new", "gw_new")).await?;

    let loc = storage.get_location("alice", "").await?;
    assert_eq!(loc, Location::new("ch_new", "gw_new"));
    Ok(())
}

#[tokio::test]
async fn test_get_locations_skips_absent() -> Result<()> {
    let storage = MemoryStorage::new();
    storage.add(&session("alice", "ch1", "gw1")).await?;
    storage.add(&session("carol", "ch3", "gw2")).await?;

    let locs = storage.get_locations(&["alice", "bob", "carol"]).await?;
    assert_eq!(locs, vec![Location::new("ch1", "gw1"), Location::new("ch3", "gw2")]);
    Ok(())
}
