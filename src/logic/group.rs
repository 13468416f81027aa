// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{
    logic::service::GroupService,
    router::Context,
    wire::proto::{
        GroupCreateNotify, GroupCreateReq, GroupCreateResp, GroupGetReq, GroupJoinReq,
        GroupQuitReq, Status,
    },
};

/// `chat.group.create` / `join` / `quit` / `detail`.
pub struct GroupHandler {
    groups: Arc<dyn GroupService>,
}

impl GroupHandler {
    pub fn new(groups: Arc<dyn GroupService>) -> Self {
        Self { groups }
    }

    pub async fn do_create(&self, ctx: &mut Context) {
        let req: GroupCreateReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let app = ctx.session().app.clone();
        let group_id = match self.groups.create(&app, &req).await {
            Ok(id) => id,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        let member_refs: Vec<&str> = req.members.iter().map(String::as_str).collect();
        let locations = match ctx.get_locations(&member_refs).await {
            Ok(locs) => locs,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        if !locations.is_empty() {
            let notify = GroupCreateNotify {
                group_id: group_id.clone(),
                members: req.members.clone(),
            };
            if let Err(e) = ctx.dispatch(&notify, &locations).await {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            }
        }

        let _ = ctx.resp(Status::Success, &GroupCreateResp { group_id }).await;
    }

    pub async fn do_join(&self, ctx: &mut Context) {
        let req: GroupJoinReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let app = ctx.session().app.clone();
        if let Err(e) = self.groups.join(&app, &req.account, &req.group_id).await {
            let _ = ctx.resp_with_error(Status::SystemException, e).await;
            return;
        }

        let _ = ctx.resp_status(Status::Success).await;
    }

    pub async fn do_quit(&self, ctx: &mut Context) {
        let req: GroupQuitReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let app = ctx.session().app.clone();
        if let Err(e) = self.groups.quit(&app, &req.account, &req.group_id).await {
            let _ = ctx.resp_with_error(Status::SystemException, e).await;
            return;
        }

        let _ = ctx.resp_status(Status::Success).await;
    }

    pub async fn do_detail(&self, ctx: &mut Context) {
        let req: GroupGetReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let app = ctx.session().app.clone();
        match self.groups.detail(&app, &req.group_id).await {
            Ok(detail) => {
                let _ = ctx.resp(Status::Success, &detail).await;
            },
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
            },
        }
    }
}
