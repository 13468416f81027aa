// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Zone-aware selector used on gateways for cross-zone routing. A route
//! table assigns traffic to zones by weight, with a per-app whitelist
//! override; inside the chosen zone instances are smoothed over a slot ring.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, ensure};
use metrics::counter;
use rand::RngExt;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    mesh::selector::{Selector, hash_code},
    metrics::ROUTE_ZONE_MISS_TOTAL,
    naming::ServiceEntry,
    wire::{META_KEY_ACCOUNT, META_KEY_APP, proto::Header},
};

pub const ROUTE_BY_APP: &str = "app";
pub const ROUTE_BY_ACCOUNT: &str = "account";

/// Smoothing factor: each in-zone instance occupies this many ring slots.
const ZONE_RING_SPREAD: usize = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub weight: usize,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub route_by: String,
    pub zones: Vec<Zone>,
    pub whitelist: HashMap<String, String>,
    /// Weight-expanded zone indices: zone *i* appears `weight_i` consecutive
    /// times.
    pub slots: Vec<usize>,
}

impl Route {
    pub fn new(
        route_by: &str,
        zones: Vec<Zone>,
        whitelist: HashMap<String, String>,
    ) -> Result<Self> {
        ensure!(!zones.is_empty(), "route table needs at least one zone");
        let mut slots = Vec::with_capacity(zones.iter().map(|z| z.weight).sum());
        for (i, zone) in zones.iter().enumerate() {
            slots.extend(std::iter::repeat_n(i, zone.weight));
        }
        ensure!(!slots.is_empty(), "zone weights sum to zero");
        Ok(Self { route_by: route_by.to_string(), zones, whitelist, slots })
    }
}

#[derive(Debug, Deserialize)]
struct WhitelistEntry {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RouteFile {
    #[serde(default)]
    route_by: String,
    zones: Vec<Zone>,
    #[serde(default)]
    whitelist: Vec<WhitelistEntry>,
}

/// Loads a route table from its JSON file form.
pub fn read_route<P: AsRef<Path>>(path: P) -> Result<Route> {
    let raw = fs::read_to_string(&path).with_context(|| {
        format!("failed to read route file {:?}", path.as_ref())
    })?;
    let parsed: RouteFile =
        serde_json::from_str(&raw).context("failed to parse route JSON")?;

    let whitelist = parsed
        .whitelist
        .into_iter()
        .map(|w| (w.key, w.value))
        .collect();
    Route::new(&parsed.route_by, parsed.zones, whitelist)
}

#[derive(Debug)]
pub struct RouteSelector {
    route: Route,
}

impl RouteSelector {
    pub fn new(route: Route) -> Self {
        Self { route }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(read_route(path)?))
    }

    fn pick_random(services: &[ServiceEntry]) -> String {
        let i = rand::rng().random_range(0..services.len());
        services[i].id.clone()
    }

    /// Deterministic smoothing inside one zone: every instance index is
    /// expanded into the ring, then reduced by the account hash.
    fn pick_in_zone(services: &[ServiceEntry], account: &str) -> String {
        let mut ring = Vec::with_capacity(services.len() * ZONE_RING_SPREAD);
        for i in 0..services.len() {
            ring.extend(std::iter::repeat_n(i, ZONE_RING_SPREAD));
        }
        let slot = hash_code(account) as usize % ring.len();
        services[ring[slot]].id.clone()
    }
}

impl Selector for RouteSelector {
    fn lookup(&self, header: &Header, services: &[ServiceEntry]) -> String {
        let app = header.get_meta(META_KEY_APP);
        let account = header.get_meta(META_KEY_ACCOUNT);
        let (Some(app), Some(account)) = (app, account) else {
            return Self::pick_random(services);
        };
        let (app, account) = (app.to_string_value(), account.to_string_value());

        let zone = match self.route.whitelist.get(&app) {
            Some(zone) => {
                info!(app = %app, zone = %zone, "hit a zone in whitelist");
                zone.clone()
            },
            None => {
                let key = match self.route.route_by.as_str() {
                    ROUTE_BY_APP => &app,
                    _ => &account,
                };
                let slot = hash_code(key) as usize % self.route.slots.len();
                self.route.zones[self.route.slots[slot]].id.clone()
            },
        };

        let zoned: Vec<ServiceEntry> = services
            .iter()
            .filter(|s| s.meta.get("zone").is_some_and(|z| *z == zone))
            .cloned()
            .collect();
        if zoned.is_empty() {
            counter!(ROUTE_ZONE_MISS_TOTAL, "zone" => zone.clone()).increment(1);
            warn!(zone = %zone, "no service in zone, falling back to random");
            return Self::pick_random(services);
        }

        Self::pick_in_zone(&zoned, &account)
    }
}
