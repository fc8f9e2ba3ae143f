//! In-memory bus used by the test suite and the demos.
//!
//! Implements the full channel contract: total ordering, append/update
//! fan-out, history bounded at the attach point, presence, and an optional
//! conflation budget that coalesces over-budget appends into a single
//! update carrying the accumulated payload, the way a real bus is allowed
//! to.

use super::channel::{BusChannel, BusError, Subscription};
use super::types::{
    BusAction, BusEvent, HistoryOptions, InboundMessage, OutboundMessage, PresenceAction,
    PresenceEvent, PresenceMember,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

struct StoredMessage {
    serial: String,
    name: String,
    /// Accumulated payload: create data plus every append, or the update
    /// payload once the message has been replaced.
    data: String,
    /// Last append sub-event; cleared when an update replaces the payload.
    last_event: Option<String>,
    headers: HashMap<String, String>,
    appends_delivered: usize,
    timestamp: DateTime<Utc>,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<BusEvent>,
    attach_index: usize,
}

#[derive(Default)]
struct Shared {
    messages: Vec<StoredMessage>,
    serial_index: HashMap<String, usize>,
    next_serial: u64,
    next_subscription: u64,
    subscribers: HashMap<u64, Subscriber>,
    presence: HashMap<String, Value>,
    presence_subs: Vec<mpsc::UnboundedSender<PresenceEvent>>,
    failed: Option<String>,
}

pub struct MemoryBus {
    shared: Mutex<Shared>,
    conflation_budget: Option<usize>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
            conflation_budget: None,
        }
    }

    /// A bus that delivers at most `budget` appends per logical message as
    /// appends; further data accumulates and is flushed as one update when
    /// an append carrying a `*-end` sub-event arrives.
    pub fn conflating(budget: usize) -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
            conflation_budget: Some(budget),
        }
    }

    /// Force the channel into a fatal state and notify every subscriber.
    pub fn fail(&self, reason: &str) {
        let mut shared = self.lock();
        shared.failed = Some(reason.to_string());
        let event = BusEvent::Failed {
            reason: reason.to_string(),
        };
        shared
            .subscribers
            .retain(|_, sub| sub.tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast(shared: &mut Shared, message: InboundMessage) {
    let event = BusEvent::Message(message);
    shared
        .subscribers
        .retain(|_, sub| sub.tx.send(event.clone()).is_ok());
}

fn broadcast_presence(shared: &mut Shared, event: PresenceEvent) {
    shared
        .presence_subs
        .retain(|tx| tx.send(event.clone()).is_ok());
}

fn check_failed(shared: &Shared) -> Result<(), BusError> {
    match &shared.failed {
        Some(reason) => Err(BusError::ChannelFailed(reason.clone())),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl BusChannel for MemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<String, BusError> {
        let mut shared = self.lock();
        check_failed(&shared)?;

        shared.next_serial += 1;
        let serial = format!("msg-{:06}", shared.next_serial);
        let timestamp = Utc::now();

        let inbound = InboundMessage {
            name: message.name.clone(),
            data: message.data.clone(),
            action: BusAction::Create,
            serial: serial.clone(),
            event: None,
            headers: message.headers.clone(),
            ephemeral: message.ephemeral,
            timestamp,
        };

        // Ephemeral messages are fanned out but never stored.
        if !message.ephemeral {
            let index = shared.messages.len();
            shared.messages.push(StoredMessage {
                serial: serial.clone(),
                name: message.name,
                data: message.data,
                last_event: None,
                headers: message.headers,
                appends_delivered: 0,
                timestamp,
            });
            shared.serial_index.insert(serial.clone(), index);
        }

        broadcast(&mut shared, inbound);
        Ok(serial)
    }

    async fn append(
        &self,
        serial: &str,
        data: String,
        event: Option<String>,
    ) -> Result<(), BusError> {
        let mut shared = self.lock();
        check_failed(&shared)?;

        let index = *shared
            .serial_index
            .get(serial)
            .ok_or_else(|| BusError::UnknownSerial(serial.to_string()))?;

        let (delivery, headers, timestamp) = {
            let stored = &mut shared.messages[index];
            stored.data.push_str(&data);
            stored.last_event = event.clone();

            let within_budget = match self.conflation_budget {
                Some(budget) => stored.appends_delivered < budget,
                None => true,
            };

            let delivery = if within_budget {
                stored.appends_delivered += 1;
                Some((BusAction::Append, stored.name.clone(), data, event))
            } else if event.as_deref().is_some_and(|e| e.ends_with("-end")) {
                // Flush the coalesced run as one update carrying the full
                // accumulated payload.
                Some((
                    BusAction::Update,
                    stored.name.clone(),
                    stored.data.clone(),
                    event,
                ))
            } else {
                None
            };

            (delivery, stored.headers.clone(), stored.timestamp)
        };

        if let Some((action, name, data, event)) = delivery {
            broadcast(
                &mut shared,
                InboundMessage {
                    name,
                    data,
                    action,
                    serial: serial.to_string(),
                    event,
                    headers,
                    ephemeral: false,
                    timestamp,
                },
            );
        }
        Ok(())
    }

    async fn update(&self, serial: &str, name: String, data: String) -> Result<(), BusError> {
        let mut shared = self.lock();
        check_failed(&shared)?;

        let index = *shared
            .serial_index
            .get(serial)
            .ok_or_else(|| BusError::UnknownSerial(serial.to_string()))?;

        let (headers, timestamp) = {
            let stored = &mut shared.messages[index];
            stored.name = name.clone();
            stored.data = data.clone();
            stored.last_event = None;
            (stored.headers.clone(), stored.timestamp)
        };

        broadcast(
            &mut shared,
            InboundMessage {
                name,
                data,
                action: BusAction::Update,
                serial: serial.to_string(),
                event: None,
                headers,
                ephemeral: false,
                timestamp,
            },
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, BusError> {
        let mut shared = self.lock();
        check_failed(&shared)?;

        let (tx, rx) = mpsc::unbounded_channel();
        shared.next_subscription += 1;
        let id = shared.next_subscription;
        let attach_index = shared.messages.len();
        shared.subscribers.insert(id, Subscriber { tx, attach_index });

        Ok(Subscription { id, events: rx })
    }

    fn unsubscribe(&self, subscription_id: u64) {
        self.lock().subscribers.remove(&subscription_id);
    }

    async fn history(&self, options: HistoryOptions) -> Result<Vec<InboundMessage>, BusError> {
        let shared = self.lock();
        check_failed(&shared)?;

        let cut = options
            .until_attach
            .and_then(|id| shared.subscribers.get(&id))
            .map(|sub| sub.attach_index)
            .unwrap_or(shared.messages.len());

        let limit = options.limit.unwrap_or(usize::MAX);
        let items = shared.messages[..cut]
            .iter()
            .rev()
            .take(limit)
            .map(|stored| InboundMessage {
                name: stored.name.clone(),
                data: stored.data.clone(),
                action: BusAction::Create,
                serial: stored.serial.clone(),
                event: stored.last_event.clone(),
                headers: stored.headers.clone(),
                ephemeral: false,
                timestamp: stored.timestamp,
            })
            .collect();
        Ok(items)
    }

    async fn presence_enter(&self, client_id: &str, data: Value) -> Result<(), BusError> {
        let mut shared = self.lock();
        check_failed(&shared)?;
        shared.presence.insert(client_id.to_string(), data.clone());
        broadcast_presence(
            &mut shared,
            PresenceEvent {
                action: PresenceAction::Enter,
                client_id: client_id.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn presence_leave(&self, client_id: &str) -> Result<(), BusError> {
        let mut shared = self.lock();
        if let Some(data) = shared.presence.remove(client_id) {
            broadcast_presence(
                &mut shared,
                PresenceEvent {
                    action: PresenceAction::Leave,
                    client_id: client_id.to_string(),
                    data,
                },
            );
        }
        Ok(())
    }

    async fn presence_members(&self) -> Result<Vec<PresenceMember>, BusError> {
        let shared = self.lock();
        Ok(shared
            .presence
            .iter()
            .map(|(client_id, data)| PresenceMember {
                client_id: client_id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    fn presence_subscribe(&self) -> mpsc::UnboundedReceiver<PresenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().presence_subs.push(tx);
        rx
    }
}
