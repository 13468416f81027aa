// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Metric names and registration. Only the `metrics` facade is wired here;
//! attaching an exporter is the embedding process' concern.

use metrics::{describe_counter, describe_gauge};

/// Concurrent channels per gateway, labelled by service id/name.
pub const CHANNEL_TOTAL: &str = "im_channel_total";
/// Packets entering a gateway from clients, labelled by command.
pub const MESSAGE_IN_TOTAL: &str = "im_message_in_total";
/// Bytes entering a gateway from clients, labelled by command.
pub const MESSAGE_IN_FLOW_BYTES: &str = "im_message_in_flow_bytes";
/// Bytes fanned out to channels, labelled by command.
pub const MESSAGE_OUT_FLOW_BYTES: &str = "im_message_out_flow_bytes";
/// Route-selector lookups that found no service in the target zone.
pub const ROUTE_ZONE_MISS_TOTAL: &str = "im_route_zone_miss_total";

pub fn describe() {
    describe_gauge!(CHANNEL_TOTAL, "concurrent channels on this gateway");
    describe_counter!(MESSAGE_IN_TOTAL, "packets received from clients");
    describe_counter!(MESSAGE_IN_FLOW_BYTES, "bytes received from clients");
    describe_counter!(MESSAGE_OUT_FLOW_BYTES, "bytes pushed to channels");
    describe_counter!(ROUTE_ZONE_MISS_TOTAL, "zone lookups with no service");
}
