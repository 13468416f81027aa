// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use im_mesh_rs::{
    mesh::{HashSelector, Selector, hash_code},
    naming::ServiceEntry,
    wire::{Protocol, proto::Header},
};

fn services(n: usize) -> Vec<ServiceEntry> {
    (1..=n)
        .map(|i| {
            ServiceEntry::new(&format!("s{i}"), "chat", Protocol::Tcp, "10.0.0.1", 8000)
        })
        .collect()
}

#[test]
fn test_hash_code_is_crc32_ieee() {
    // CRC32-IEEE("token1") = 0x328B5A52
    assert_eq!(hash_code("token1"), 847_786_290);
}

#[test]
fn test_hash_selector_picks_by_channel_id() {
    let srvs = services(6);
    let mut header = Header::default();
    header.channel_id = "token1".to_string();

    // 847786290 % 6 == 0
    let hit = HashSelector.lookup(&header, &srvs);
    assert_eq!(hit, "s1");
}

#[test]
fn test_hash_selector_is_deterministic() {
    let srvs = services(5);
    let mut header = Header::default();
    header.channel_id = "gw01_alice_42".to_string();

    let first = HashSelector.lookup(&header, &srvs);
    for _ in 0..100 {
        assert_eq!(HashSelector.lookup(&header, &srvs), first);
    }
}

#[test]
fn test_hash_selector_index_in_range() {
    let mut header = Header::default();
    for n in 1..=8 {
        let srvs = services(n);
        for channel in ["a", "b", "c", "some_longer_channel_id"] {
            header.channel_id = channel.to_string();
            let hit = HashSelector.lookup(&header, &srvs);
            assert!(srvs.iter().any(|s| s.id == hit));
        }
    }
}
