//! # Channel Executor Pool
//!
//! Each channel is bound to exactly one lane: its driver behind an async mutex. A job
//! first takes the lane, then a permit from the pool-wide worker budget, and only then
//! runs on tokio's blocking thread pool, carrying both with it. So:
//!
//! - two jobs on the same channel never overlap, whatever the budget;
//! - jobs on different channels overlap up to the budget;
//! - the async side never blocks on bus I/O.
//!
//! The lane guard is moved into the blocking closure. If the caller stops waiting
//! (dropped future) the driver call still runs to completion and the lane stays held
//! until it returns.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use super::ChannelId;
use super::driver::ChannelDriver;
use super::error::MeterError;

type Lane = Arc<Mutex<Box<dyn ChannelDriver>>>;

pub struct ChannelExecutorPool {
    lanes: HashMap<ChannelId, Lane>,
    workers: Arc<Semaphore>,
}

impl ChannelExecutorPool {
    pub fn new<I>(drivers: I, max_workers: usize) -> Self
    where
        I: IntoIterator<Item = (ChannelId, Box<dyn ChannelDriver>)>,
    {
        let lanes = drivers
            .into_iter()
            .map(|(id, driver)| (id, Arc::new(Mutex::new(driver))))
            .collect();
        Self {
            lanes,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn has_channel(&self, channel: ChannelId) -> bool {
        self.lanes.contains_key(&channel)
    }

    /// Runs `job` against the channel's driver, serialized with every other job on
    /// that channel.
    pub async fn submit<T, F>(&self, channel: ChannelId, job: F) -> Result<T, MeterError>
    where
        F: FnOnce(&mut dyn ChannelDriver) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let lane = self
            .lanes
            .get(&channel)
            .cloned()
            .ok_or(MeterError::UnknownChannel(channel))?;

        let mut driver = lane.lock_owned().await;
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| MeterError::Channel("worker pool is closed".to_string()))?;

        debug!(channel, "Channel lane acquired");
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job(&mut **driver)
        });

        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(MeterError::Channel(format!("{:#}", e))),
            Err(e) => Err(MeterError::Channel(format!(
                "channel {} worker aborted: {}",
                channel, e
            ))),
        }
    }
}
