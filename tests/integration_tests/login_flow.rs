// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use im_mesh_rs::{
    session::SessionStorage,
    wire::{
        COMMAND_LOGIN_SIGNIN,
        frame::OpCode,
        pkt::{BasicPkt, CODE_PING, CODE_PONG, LogicPkt},
        proto::{LoginReq, Status},
    },
};
use serial_test::serial;

use crate::integration_tests::common::{TestClient, login, start_cluster, wait_until};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_login_stores_session_and_answers_pings() -> Result<()> {
    let cluster = start_cluster(18100).await?;

    let (mut alice, channel_id) = login(&cluster.gateway_addr, "alice").await?;
    assert!(
        channel_id.starts_with(&format!("{}_alice_", cluster.gateway_id)),
        "unexpected channel id {channel_id}"
    );

    // the login service stored the location under the gateway's id
    let loc = cluster.storage.get_location("alice", "").await?;
    assert_eq!(loc.channel_id, channel_id);
    assert_eq!(loc.gate_id, cluster.gateway_id);

    // application-level heartbeat: BasicPkt ping → pong
    alice.send_basic(&BasicPkt::new(CODE_PING)).await?;
    let pong = alice.read_basic(Duration::from_secs(2)).await?;
    assert_eq!(pong.code, CODE_PONG);

    // transport-level heartbeat: Ping frame → Pong frame from the channel
    alice.send_frame(OpCode::Ping, &[]).await?;
    let frame = alice.read_frame(Duration::from_secs(2)).await?;
    assert_eq!(frame.opcode, OpCode::Pong);

    // dropping the connection triggers the signout path end to end
    drop(alice);
    wait_until(Duration::from_secs(3), || {
        let storage = std::sync::Arc::clone(&cluster.storage);
        async move { Ok(storage.get_location("alice", "").await.is_err()) }
    })
    .await?;

    cluster.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_bad_token_is_unauthorized() -> Result<()> {
    let cluster = start_cluster(18500).await?;

    // make sure the mesh is warm, then present garbage credentials
    let (_ok, _) = login(&cluster.gateway_addr, "warmup").await?;

    let mut client = TestClient::connect(&cluster.gateway_addr).await?;
    let mut signin = LogicPkt::new(COMMAND_LOGIN_SIGNIN);
    signin.write_body(&LoginReq { token: "bogus.token".to_string(), tags: vec![] });
    client.send_pkt(&signin).await?;

    let resp = client.read_logic(Duration::from_secs(2)).await?;
    assert_eq!(resp.header.status(), Status::Unauthorized);

    cluster.shutdown();
    Ok(())
}
