// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::Result;
use im_mesh_rs::{
    mesh::{Route, RouteSelector, Selector, Zone, hash_code},
    naming::ServiceEntry,
    wire::{META_KEY_ACCOUNT, META_KEY_APP, Protocol, proto::Header},
};

fn zoned_service(id: &str, zone: &str) -> ServiceEntry {
    let mut entry = ServiceEntry::new(id, "tgateway", Protocol::Tcp, "10.0.0.1", 8000);
    entry.meta.insert("zone".to_string(), zone.to_string());
    entry
}

fn services() -> Vec<ServiceEntry> {
    vec![
        zoned_service("s1", "zone_01"),
        zoned_service("s2", "zone_01"),
        zoned_service("s3", "zone_01"),
        zoned_service("s4", "zone_02"),
        zoned_service("s5", "zone_03"),
        zoned_service("s6", "zone_03"),
    ]
}

fn route(route_by: &str) -> Result<Route> {
    let mut whitelist = HashMap::new();
    whitelist.insert("vipapp".to_string(), "zone_02".to_string());
    Ok(Route::new(
        route_by,
        vec![
            Zone { id: "zone_01".to_string(), weight: 70 },
            Zone { id: "zone_02".to_string(), weight: 20 },
            Zone { id: "zone_03".to_string(), weight: 10 },
        ],
        whitelist,
    )?)
}

fn header_with(app: &str, account: &str) -> Header {
    let mut header = Header::default();
    header.channel_id = "ch_test".to_string();
    header.add_string_meta(META_KEY_APP, app);
    header.add_string_meta(META_KEY_ACCOUNT, account);
    header
}

#[test]
fn test_whitelisted_app_hits_its_zone() -> Result<()> {
    // app "vipapp" is pinned to zone_02, whose only instance is s4
    let selector = RouteSelector::new(route("account")?);
    let hit = selector.lookup(&header_with("vipapp", "test1"), &services());
    assert_eq!(hit, "s4");
    Ok(())
}

#[test]
fn test_whitelist_wins_regardless_of_route_by() -> Result<()> {
    for route_by in ["app", "account"] {
        let selector = RouteSelector::new(route(route_by)?);
        for account in ["test1", "test2", "someone_else"] {
            let hit = selector.lookup(&header_with("vipapp", account), &services());
            assert_eq!(hit, "s4", "route_by={route_by} account={account}");
        }
    }
    Ok(())
}

#[test]
fn test_lookup_is_deterministic() -> Result<()> {
    let selector = RouteSelector::new(route("account")?);
    let srvs = services();
    let header = header_with("other_app", "test2");

    let first = selector.lookup(&header, &srvs);
    for _ in 0..100 {
        assert_eq!(selector.lookup(&header, &srvs), first);
    }
    Ok(())
}

#[test]
fn test_lookup_lands_in_the_hashed_zone() -> Result<()> {
    let rt = route("account")?;
    let srvs = services();

    for account in ["test1", "test2", "alpha", "beta", "gamma"] {
        let slot = hash_code(account) as usize % rt.slots.len();
        let want_zone = rt.zones[rt.slots[slot]].id.clone();

        let selector = RouteSelector::new(route("account")?);
        let hit = selector.lookup(&header_with("other_app", account), &srvs);
        let hit_zone = srvs
            .iter()
            .find(|s| s.id == hit)
            .and_then(|s| s.meta.get("zone"))
            .cloned();
        assert_eq!(hit_zone.as_deref(), Some(want_zone.as_str()), "account={account}");
    }
    Ok(())
}

#[test]
fn test_missing_meta_falls_back_to_any_service() -> Result<()> {
    let selector = RouteSelector::new(route("account")?);
    let srvs = services();
    let header = Header::default();

    let hit = selector.lookup(&header, &srvs);
    assert!(srvs.iter().any(|s| s.id == hit));
    Ok(())
}
