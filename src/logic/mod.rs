// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logic-server role wiring: an inner server whose channels are gateway
//! links, serving decoded packets through the command router.

use std::sync::Arc;

use anyhow::Result;

use crate::{
    cfg::LogicConfig,
    gateway::TcpDialer,
    mesh::{Container, HashSelector},
    naming::{Naming, ServiceEntry},
    router::{Context, Router, handler_fn, middleware},
    server::{Server, ServerOptions},
    session::{MemoryStorage, SessionStorage},
    wire::{
        COMMAND_CHAT_GROUP_TALK, COMMAND_CHAT_TALK_ACK, COMMAND_CHAT_USER_TALK,
        COMMAND_GROUP_CREATE, COMMAND_GROUP_DETAIL, COMMAND_GROUP_JOIN,
        COMMAND_GROUP_QUIT, COMMAND_LOGIN_SIGNIN, COMMAND_LOGIN_SIGNOUT, Protocol,
    },
};

pub mod chat;
pub mod group;
pub mod handler;
pub mod login;
pub mod service;

pub use chat::ChatHandler;
pub use group::GroupHandler;
pub use handler::{ServHandler, ServerDispatcher};
pub use login::LoginHandler;
pub use service::{
    GroupService, MemoryGroupService, MemoryMessageService, MessageService,
};

/// Builds the command router with the full handler set behind the recover
/// middleware.
pub fn build_router(
    messages: Arc<dyn MessageService>,
    groups: Arc<dyn GroupService>,
) -> Router {
    let mut router = Router::new();
    router.use_middleware(middleware::recover());

    // login
    let login = Arc::new(LoginHandler);
    let h = Arc::clone(&login);
    router.handle(
        COMMAND_LOGIN_SIGNIN,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_signin(ctx).await })
        }),
    );
    let h = login;
    router.handle(
        COMMAND_LOGIN_SIGNOUT,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_signout(ctx).await })
        }),
    );

    // talk
    let chat = Arc::new(ChatHandler::new(messages, Arc::clone(&groups)));
    let h = Arc::clone(&chat);
    router.handle(
        COMMAND_CHAT_USER_TALK,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_user_talk(ctx).await })
        }),
    );
    let h = Arc::clone(&chat);
    router.handle(
        COMMAND_CHAT_GROUP_TALK,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_group_talk(ctx).await })
        }),
    );
    let h = chat;
    router.handle(
        COMMAND_CHAT_TALK_ACK,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_talk_ack(ctx).await })
        }),
    );

    // group
    let grp = Arc::new(GroupHandler::new(groups));
    let h = Arc::clone(&grp);
    router.handle(
        COMMAND_GROUP_CREATE,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_create(ctx).await })
        }),
    );
    let h = Arc::clone(&grp);
    router.handle(
        COMMAND_GROUP_JOIN,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_join(ctx).await })
        }),
    );
    let h = Arc::clone(&grp);
    router.handle(
        COMMAND_GROUP_QUIT,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_quit(ctx).await })
        }),
    );
    let h = grp;
    router.handle(
        COMMAND_GROUP_DETAIL,
        handler_fn(move |ctx: &mut Context| {
            let h = Arc::clone(&h);
            Box::pin(async move { h.do_detail(ctx).await })
        }),
    );

    router
}

/// Assembles a logic server around the given storage and services.
pub fn build(
    config: &LogicConfig,
    naming: Arc<dyn Naming>,
    storage: Arc<dyn SessionStorage>,
    messages: Arc<dyn MessageService>,
    groups: Arc<dyn GroupService>,
) -> Result<Arc<Container>> {
    let router = Arc::new(build_router(messages, groups));
    let dispatcher = ServerDispatcher::new();
    let handler = ServHandler::new(router, storage, Arc::clone(&dispatcher));

    let mut entry = ServiceEntry::new(
        &config.service_id,
        &config.service_name,
        Protocol::Tcp,
        &config.public_address,
        config.public_port,
    );
    entry.tags = config.tags.clone();
    if !config.zone.is_empty() {
        entry.meta.insert("zone".to_string(), config.zone.clone());
    }

    let options = ServerOptions {
        loginwait: config.loginwait,
        readwait: config.readwait,
        writewait: config.writewait,
        message_gpool: config.message_gpool,
        connection_gpool: config.connection_gpool,
    };
    let server = Server::new(&config.listen, entry, options);
    server.set_acceptor(Arc::clone(&handler) as _);
    server.set_message_listener(Arc::clone(&handler) as _);
    server.set_state_listener(Arc::clone(&handler) as _);

    // a logic server dials no one: no deps, default selector
    let container = Container::new(
        server,
        naming,
        Arc::new(TcpDialer::new(&config.service_id)),
        Arc::new(HashSelector),
        &[],
    );
    dispatcher.bind_container(Arc::downgrade(&container));

    Ok(container)
}

/// Builds and runs a logic server backed by in-memory storage and services.
pub async fn run(config: LogicConfig, naming: Arc<dyn Naming>) -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let messages = MemoryMessageService::new();
    let groups = MemoryGroupService::new();
    let container = build(&config, naming, storage, messages, groups)?;
    container.start().await
}
