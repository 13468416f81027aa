// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bounded task submission shared by every channel of a server. The pool
//! bounds how many listener invocations run at once; `submit` parks the
//! caller when all permits are taken, which is the backpressure the read
//! loops rely on.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(size.max(1))) }
    }

    /// Runs `task` on the runtime once a permit is free. Blocks the caller
    /// while the pool is saturated; fails only after [`WorkerPool::close`].
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where F: Future<Output = ()> + Send + 'static {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    /// Shuts the pool: in-flight tasks finish, further submits fail.
    pub fn close(&self) {
        self.permits.close();
    }
}
