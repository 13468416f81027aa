// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use im_mesh_rs::{
    logic::GroupService,
    wire::{
        COMMAND_CHAT_GROUP_TALK,
        pkt::LogicPkt,
        proto::{GroupCreateReq, MessagePush, MessageReq, MessageResp, Status},
    },
};
use serial_test::serial;

use crate::integration_tests::common::{login, start_cluster};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_group_talk_fans_out_to_members() -> Result<()> {
    let cluster = start_cluster(18400).await?;

    let (mut alice, _) = login(&cluster.gateway_addr, "alice").await?;
    let (mut bob, _) = login(&cluster.gateway_addr, "bob").await?;
    let (mut carol, _) = login(&cluster.gateway_addr, "carol").await?;

    let group_id = cluster
        .groups
        .create("im", &GroupCreateReq {
            name: "room".to_string(),
            owner: "alice".to_string(),
            members: vec![
                "alice".to_string(),
                "bob".to_string(),
                "carol".to_string(),
            ],
            ..Default::default()
        })
        .await?;

    let mut talk = LogicPkt::new(COMMAND_CHAT_GROUP_TALK).with_dest(&group_id);
    talk.write_body(&MessageReq {
        message_type: 1,
        body: "hello room".to_string(),
        extra: String::new(),
    });
    alice.send_pkt(&talk).await?;

    // every member but the sender receives the same push
    for member in [&mut bob, &mut carol] {
        let pushed = member.read_logic(Duration::from_secs(2)).await?;
        let push: MessagePush = pushed.read_body()?;
        assert_eq!(push.sender, "alice");
        assert_eq!(push.body, "hello room");
    }

    // the sender gets the receipt, not the push
    let resp = alice.read_logic(Duration::from_secs(2)).await?;
    assert_eq!(resp.header.status(), Status::Success);
    let receipt: MessageResp = resp.read_body()?;
    assert!(receipt.message_id > 0);

    // one content row, one index row per member
    assert_eq!(cluster.messages.message_count(), 1);
    for member in ["alice", "bob", "carol"] {
        assert!(
            cluster
                .messages
                .index_of(member)
                .iter()
                .any(|(id, _)| *id == receipt.message_id),
            "missing index row for {member}"
        );
    }

    cluster.shutdown();
    Ok(())
}
