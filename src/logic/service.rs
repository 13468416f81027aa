// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Contracts toward the persistence tier. Production deployments back these
//! with the storage service over HTTP; the in-memory implementations here
//! serve tests and single-host setups.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::wire::proto::{GroupCreateReq, GroupGetResp, Member};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub message_type: i32,
    pub body: String,
    pub extra: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedMessage {
    pub message_id: u64,
    pub send_time: i64,
}

/// Message persistence. `insert_group` must write the content row and the
/// per-member index rows atomically: either every member can sync the
/// message later, or none can.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn insert_user(
        &self,
        app: &str,
        sender: &str,
        dest: &str,
        message: &MessageBody,
    ) -> Result<InsertedMessage>;

    async fn insert_group(
        &self,
        app: &str,
        sender: &str,
        group: &str,
        members: &[String],
        message: &MessageBody,
    ) -> Result<InsertedMessage>;

    /// Moves the account's read index forward.
    async fn set_ack(&self, app: &str, account: &str, message_id: u64) -> Result<()>;
}

/// Group membership and metadata.
#[async_trait]
pub trait GroupService: Send + Sync {
    async fn create(&self, app: &str, req: &GroupCreateReq) -> Result<String>;
    async fn join(&self, app: &str, account: &str, group_id: &str) -> Result<()>;
    async fn quit(&self, app: &str, account: &str, group_id: &str) -> Result<()>;
    async fn members(&self, app: &str, group_id: &str) -> Result<Vec<String>>;
    async fn detail(&self, app: &str, group_id: &str) -> Result<GroupGetResp>;
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub app: String,
    pub sender: String,
    pub dest: String,
    pub message: MessageBody,
    pub send_time: i64,
}

#[derive(Debug, Clone)]
struct IndexRow {
    message_id: u64,
    other: String,
}

/// In-memory message store: a content map plus one index list per account,
/// mirroring the content/index split of the real storage schema.
#[derive(Default)]
pub struct MemoryMessageService {
    next_id: AtomicU64,
    contents: DashMap<u64, StoredMessage>,
    index: DashMap<String, Vec<IndexRow>>,
    read_index: DashMap<String, u64>,
}

impl MemoryMessageService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.contents.len()
    }

    pub fn content_of(&self, message_id: u64) -> Option<StoredMessage> {
        self.contents.get(&message_id).map(|m| m.value().clone())
    }

    /// Index rows of one account: `(message_id, other_party)`.
    pub fn index_of(&self, account: &str) -> Vec<(u64, String)> {
        self.index
            .get(account)
            .map(|rows| {
                rows.iter().map(|r| (r.message_id, r.other.clone())).collect()
            })
            .unwrap_or_default()
    }

    pub fn read_index_of(&self, account: &str) -> Option<u64> {
        self.read_index.get(account).map(|e| *e.value())
    }

    fn insert(
        &self,
        app: &str,
        sender: &str,
        dest: &str,
        receivers: &[String],
        message: &MessageBody,
    ) -> InsertedMessage {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let send_time = chrono::Utc::now().timestamp_millis();

        self.contents.insert(message_id, StoredMessage {
            app: app.to_string(),
            sender: sender.to_string(),
            dest: dest.to_string(),
            message: message.clone(),
            send_time,
        });
        for account in receivers {
            self.index.entry(account.clone()).or_default().push(IndexRow {
                message_id,
                other: sender.to_string(),
            });
        }

        InsertedMessage { message_id, send_time }
    }
}

#[async_trait]
impl MessageService for MemoryMessageService {
    async fn insert_user(
        &self,
        app: &str,
        sender: &str,
        dest: &str,
        message: &MessageBody,
    ) -> Result<InsertedMessage> {
        // index rows for both parties so each side can sync its history
        let receivers = [sender.to_string(), dest.to_string()];
        Ok(self.insert(app, sender, dest, &receivers, message))
    }

    async fn insert_group(
        &self,
        app: &str,
        sender: &str,
        group: &str,
        members: &[String],
        message: &MessageBody,
    ) -> Result<InsertedMessage> {
        Ok(self.insert(app, sender, group, members, message))
    }

    async fn set_ack(&self, _app: &str, account: &str, message_id: u64) -> Result<()> {
        self.read_index.insert(account.to_string(), message_id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct GroupRecord {
    name: String,
    avatar: String,
    introduction: String,
    owner: String,
    members: Vec<(String, i64)>,
}

#[derive(Default)]
pub struct MemoryGroupService {
    next_id: AtomicU64,
    groups: DashMap<String, GroupRecord>,
}

impl MemoryGroupService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl GroupService for MemoryGroupService {
    async fn create(&self, _app: &str, req: &GroupCreateReq) -> Result<String> {
        let id = format!("g{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = chrono::Utc::now().timestamp();

        let mut members: Vec<(String, i64)> =
            req.members.iter().map(|m| (m.clone(), now)).collect();
        if !req.owner.is_empty() && !members.iter().any(|(m, _)| *m == req.owner) {
            members.push((req.owner.clone(), now));
        }

        self.groups.insert(id.clone(), GroupRecord {
            name: req.name.clone(),
            avatar: req.avatar.clone(),
            introduction: req.introduction.clone(),
            owner: req.owner.clone(),
            members,
        });
        Ok(id)
    }

    async fn join(&self, _app: &str, account: &str, group_id: &str) -> Result<()> {
        let Some(mut group) = self.groups.get_mut(group_id) else {
            bail!("group not found: {group_id}");
        };
        if !group.members.iter().any(|(m, _)| m == account) {
            let now = chrono::Utc::now().timestamp();
            group.members.push((account.to_string(), now));
        }
        Ok(())
    }

    async fn quit(&self, _app: &str, account: &str, group_id: &str) -> Result<()> {
        let Some(mut group) = self.groups.get_mut(group_id) else {
            bail!("group not found: {group_id}");
        };
        group.members.retain(|(m, _)| m != account);
        Ok(())
    }

    async fn members(&self, _app: &str, group_id: &str) -> Result<Vec<String>> {
        let Some(group) = self.groups.get(group_id) else {
            bail!("group not found: {group_id}");
        };
        Ok(group.members.iter().map(|(m, _)| m.clone()).collect())
    }

    async fn detail(&self, _app: &str, group_id: &str) -> Result<GroupGetResp> {
        let Some(group) = self.groups.get(group_id) else {
            bail!("group not found: {group_id}");
        };
        Ok(GroupGetResp {
            id: group_id.to_string(),
            name: group.name.clone(),
            introduction: group.introduction.clone(),
            avatar: group.avatar.clone(),
            owner: group.owner.clone(),
            members: group
                .members
                .iter()
                .map(|(account, join_time)| Member {
                    account: account.clone(),
                    alias: String::new(),
                    avatar: String::new(),
                    join_time: *join_time,
                })
                .collect(),
        })
    }
}
