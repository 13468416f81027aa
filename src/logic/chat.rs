// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{
    logic::service::{GroupService, MessageBody, MessageService},
    router::Context,
    session::SessionError,
    wire::proto::{MessageAckReq, MessagePush, MessageReq, MessageResp, Status},
};

/// `chat.user.talk` / `chat.group.talk` / `chat.talk.ack`.
pub struct ChatHandler {
    messages: Arc<dyn MessageService>,
    groups: Arc<dyn GroupService>,
}

impl ChatHandler {
    pub fn new(messages: Arc<dyn MessageService>, groups: Arc<dyn GroupService>) -> Self {
        Self { messages, groups }
    }

    /// Persists the message, pushes it to the receiver when online, then
    /// confirms to the sender. Offline receivers sync from the index later.
    pub async fn do_user_talk(&self, ctx: &mut Context) {
        if ctx.header().dest.is_empty() {
            let _ = ctx.resp_with_error(Status::NoDestination, "dest is empty").await;
            return;
        }
        let req: MessageReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let dest = ctx.header().dest.clone();
        let receiver = match ctx.get_location(&dest, "").await {
            Ok(loc) => Some(loc),
            Err(SessionError::SessionNil) => None,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        let sender = ctx.session().account.clone();
        let app = ctx.session().app.clone();
        let body = MessageBody {
            message_type: req.message_type,
            body: req.body.clone(),
            extra: req.extra.clone(),
        };
        let inserted = match self
            .messages
            .insert_user(&app, &sender, &dest, &body)
            .await
        {
            Ok(i) => i,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        if let Some(loc) = receiver {
            let push = MessagePush {
                message_id: inserted.message_id,
                message_type: req.message_type,
                body: req.body,
                extra: req.extra,
                sender,
                send_time: inserted.send_time,
            };
            let _ = ctx.dispatch(&push, &[loc]).await;
        }

        let _ = ctx
            .resp(Status::Success, &MessageResp {
                message_id: inserted.message_id,
                send_time: inserted.send_time,
            })
            .await;
    }

    /// One persisted message, one dispatch carrying every online member
    /// location (the sender's own channel excluded).
    pub async fn do_group_talk(&self, ctx: &mut Context) {
        if ctx.header().dest.is_empty() {
            let _ = ctx.resp_with_error(Status::NoDestination, "dest is empty").await;
            return;
        }
        let req: MessageReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let group = ctx.header().dest.clone();
        let sender = ctx.session().account.clone();
        let app = ctx.session().app.clone();

        let members = match self.groups.members(&app, &group).await {
            Ok(m) => m,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        let body = MessageBody {
            message_type: req.message_type,
            body: req.body.clone(),
            extra: req.extra.clone(),
        };
        let inserted = match self
            .messages
            .insert_group(&app, &sender, &group, &members, &body)
            .await
        {
            Ok(i) => i,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
        let mut locations = match ctx.get_locations(&member_refs).await {
            Ok(locs) => locs,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };
        locations.retain(|loc| loc.channel_id != ctx.session().channel_id);

        if !locations.is_empty() {
            let push = MessagePush {
                message_id: inserted.message_id,
                message_type: req.message_type,
                body: req.body,
                extra: req.extra,
                sender,
                send_time: inserted.send_time,
            };
            let _ = ctx.dispatch(&push, &locations).await;
        }

        let _ = ctx
            .resp(Status::Success, &MessageResp {
                message_id: inserted.message_id,
                send_time: inserted.send_time,
            })
            .await;
    }

    pub async fn do_talk_ack(&self, ctx: &mut Context) {
        let req: MessageAckReq = match ctx.read_body() {
            Ok(r) => r,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        let account = ctx.session().account.clone();
        let app = ctx.session().app.clone();
        if let Err(e) = self.messages.set_ack(&app, &account, req.message_id).await {
            let _ = ctx.resp_with_error(Status::SystemException, e).await;
            return;
        }

        let _ = ctx.resp_status(Status::Success).await;
    }
}
