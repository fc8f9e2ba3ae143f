//! Reconnect/replay engine.
//!
//! A late joiner must see the full chunk stream of the in-progress
//! generation and then continue live. Subscribing before the history query
//! gives a clean cut: live messages buffer in the subscription channel
//! while history (bounded at the attach point) is fetched, so nothing is
//! missed and nothing is double-counted.

use super::chunk::TransportError;
use super::subscribe::{spawn_stream, ChunkStream};
use super::wire;
use crate::bus::{BusChannel, HistoryOptions};
use std::sync::Arc;

/// Options for [`resume_stream`].
#[derive(Clone, Debug)]
pub struct ResumeOptions {
    /// Cap on the history query; a stream longer than this cannot be fully
    /// reconstructed and older chunks are silently skipped.
    pub history_limit: usize,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

impl ResumeOptions {
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

/// Attach to the channel and reconstruct the in-progress stream, if any.
///
/// Returns `Ok(None)` when the channel has no history or the newest item is
/// already a terminal — there is nothing to resume.
pub async fn resume_stream(
    channel: Arc<dyn BusChannel>,
    options: ResumeOptions,
) -> Result<Option<ChunkStream>, TransportError> {
    let subscription = channel.subscribe().await?;

    let history = match channel
        .history(HistoryOptions::until_attach(subscription.id).with_limit(options.history_limit))
        .await
    {
        Ok(history) => history,
        Err(err) => {
            channel.unsubscribe(subscription.id);
            return Err(err.into());
        }
    };

    if history.is_empty() {
        channel.unsubscribe(subscription.id);
        return Ok(None);
    }

    // History arrives newest-first; a terminal at the head means the
    // generation already ended.
    if wire::is_terminal(&history[0].name) {
        channel.unsubscribe(subscription.id);
        return Ok(None);
    }

    let chronological: Vec<_> = history.into_iter().rev().collect();
    Ok(Some(spawn_stream(
        channel,
        subscription,
        None,
        chronological,
    )))
}
