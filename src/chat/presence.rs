//! Agent presence observer.
//!
//! Watches the channel's presence set for members announcing
//! `{"type": "agent"}` and reports the boolean online/offline state: once
//! at start from a snapshot, then on every zero-crossing of the agent
//! count.

use super::chunk::TransportError;
use crate::abort::AbortHandle;
use crate::bus::{BusChannel, PresenceAction};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running presence watch; `stop` detaches it.
pub struct PresenceWatch {
    cancel: AbortHandle,
    task: JoinHandle<()>,
}

impl PresenceWatch {
    pub fn stop(self) {
        self.cancel.abort();
        self.task.abort();
    }
}

fn is_agent(data: &Value) -> bool {
    data.get("type").and_then(Value::as_str) == Some("agent")
}

/// Report agent presence to `callback`: the current state immediately,
/// then `true`/`false` whenever the agent count leaves or reaches zero.
pub async fn watch_agent_presence(
    channel: Arc<dyn BusChannel>,
    callback: impl Fn(bool) + Send + Sync + 'static,
) -> Result<PresenceWatch, TransportError> {
    // Subscribe before the snapshot so no transition falls between them;
    // replays of already-known members do not change the count.
    let mut events = channel.presence_subscribe();

    let mut agents: HashSet<String> = HashSet::new();
    for member in channel.presence_members().await? {
        if is_agent(&member.data) {
            agents.insert(member.client_id);
        }
    }
    callback(!agents.is_empty());

    let cancel = AbortHandle::new();
    let watcher_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = watcher_cancel.aborted() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            match event.action {
                PresenceAction::Enter => {
                    if is_agent(&event.data)
                        && agents.insert(event.client_id)
                        && agents.len() == 1
                    {
                        callback(true);
                    }
                }
                PresenceAction::Leave => {
                    if agents.remove(&event.client_id) && agents.is_empty() {
                        callback(false);
                    }
                }
            }
        }
    });

    Ok(PresenceWatch { cancel, task })
}
