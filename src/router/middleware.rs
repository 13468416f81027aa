// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use crate::{
    router::{Context, HandlerFunc, handler_fn},
    wire::proto::{ErrorResp, Status},
};

/// Converts a panic anywhere in the chain behind it into a
/// `SystemException` response instead of killing the serving task.
pub fn recover() -> HandlerFunc {
    handler_fn(|ctx: &mut Context| {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;
            let Err(panic) = outcome else {
                return;
            };

            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                command = %ctx.header().command,
                channel_id = %ctx.header().channel_id,
                sequence = ctx.header().sequence,
                "handler panicked: {reason}"
            );

            let _ = ctx
                .resp(
                    Status::SystemException,
                    &ErrorResp { message: "SystemException".to_string() },
                )
                .await;
        })
    })
}
