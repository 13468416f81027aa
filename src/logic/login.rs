// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tracing::info;

use crate::{
    router::Context,
    session::SessionError,
    wire::proto::{KickoutNotify, LoginResp, Session, Status},
};

/// `login.signin` / `login.signout`.
pub struct LoginHandler;

impl LoginHandler {
    /// Stores the session forwarded by the gateway. A live location for the
    /// same account gets exactly one kickout push before being replaced.
    pub async fn do_signin(&self, ctx: &mut Context) {
        let session: Session = match ctx.read_body() {
            Ok(s) => s,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, e).await;
                return;
            },
        };

        info!(
            account = %session.account,
            channel_id = %session.channel_id,
            "do login"
        );

        let old = match ctx.get_location(&session.account, "").await {
            Ok(loc) => Some(loc),
            Err(SessionError::SessionNil) => None,
            Err(e) => {
                let _ = ctx.resp_with_error(Status::SystemException, e).await;
                return;
            },
        };

        if let Some(old) = old {
            let kickout = KickoutNotify { channel_id: old.channel_id.clone() };
            let _ = ctx.dispatch(&kickout, std::slice::from_ref(&old)).await;
        }

        if let Err(e) = ctx.add(&session).await {
            let _ = ctx.resp_with_error(Status::SystemException, e).await;
            return;
        }

        let _ = ctx
            .resp(Status::Success, &LoginResp {
                channel_id: session.channel_id,
                account: session.account,
            })
            .await;
    }

    pub async fn do_signout(&self, ctx: &mut Context) {
        let account = ctx.session().account.clone();
        let channel_id = ctx.session().channel_id.clone();
        info!(account = %account, channel_id = %channel_id, "do logout");

        if let Err(e) = ctx.delete(&account, &channel_id).await {
            let _ = ctx.resp_with_error(Status::SystemException, e).await;
            return;
        }

        let _ = ctx.resp_status(Status::Success).await;
    }
}
