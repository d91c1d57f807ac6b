use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashSet;

use parking_lot::RwLock;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use tracing::{debug, error, warn};

use crate::error::{Error, ErrorKind, Result};

/// A message pushed to subscribers.
///
/// On the wire, a message is a JSON object carrying a `messageType` and a
/// `data` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "messageType", content = "data", rename_all = "camelCase")]
pub enum Message {
    /// New property values, keyed by property name.
    PropertyStatus(Map<String, JsonValue>),
    /// The description of an action whose status changed.
    ActionStatus(JsonValue),
    /// The description of an event.
    Event(JsonValue),
    /// A failure caused by a message of the subscriber itself.
    Error(ErrorMessage),
}

impl Message {
    /// Creates a [`Message::PropertyStatus`] for a single property.
    #[must_use]
    pub fn property_status(name: impl Into<String>, value: JsonValue) -> Self {
        let mut data = Map::new();
        let _ = data.insert(name.into(), value);
        Self::PropertyStatus(data)
    }

    /// Serializes the message.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Internal`] error if serialization fails.
    pub fn encode(&self) -> Result<Arc<str>> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// The payload of a [`Message::Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMessage {
    /// An `HTTP`-like status line, such as `400 Bad Request`.
    pub status: String,
    /// What went wrong.
    pub message: String,
    /// The message that caused the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<JsonValue>,
}

impl ErrorMessage {
    /// Creates a `400 Bad Request` [`ErrorMessage`].
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: "400 Bad Request".into(),
            message: message.into(),
            request: None,
        }
    }

    /// Attaches the request which caused the failure.
    #[must_use]
    pub fn request(mut self, request: JsonValue) -> Self {
        self.request = Some(request);
        self
    }
}

/// A connected observer of a Thing.
///
/// A subscriber receives already serialized messages. Delivery must not
/// block: a subscriber that cannot accept a message returns an error and is
/// removed from the Thing.
pub trait Subscriber: Send + Sync + 'static {
    /// Delivers a serialized [`Message`].
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::SubscriberDelivery`] error when the message
    /// cannot be accepted.
    fn deliver(&self, message: &Arc<str>) -> Result<()>;
}

/// A [`Subscriber`] backed by a bounded channel.
///
/// The receiving half is usually drained by a connection task that writes
/// every message to the network. A full channel means the connection is not
/// keeping up, so the message is refused.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sender: Sender<Arc<str>>,
}

impl ChannelSubscriber {
    /// Creates a [`ChannelSubscriber`] which buffers up to `capacity`
    /// messages, together with the receiving half of its channel.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Whether the receiving half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, message: &Arc<str>) -> Result<()> {
        self.sender
            .try_send(Arc::clone(message))
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    Error::new(ErrorKind::SubscriberDelivery, "Subscriber channel is full")
                }
                TrySendError::Closed(_) => {
                    Error::new(ErrorKind::SubscriberDelivery, "Subscriber channel is closed")
                }
            })
    }
}

/// The identifier of a subscriber registered on a Thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
    // Cleared on removal, so an in-flight broadcast skips this entry.
    active: AtomicBool,
    // `None` until the subscriber asks for specific events.
    events: RwLock<Option<HashSet<String>>>,
}

impl Entry {
    fn wants_event(&self, name: &str) -> bool {
        self.events
            .read()
            .as_ref()
            .is_none_or(|events| events.contains(name))
    }
}

/// The set of subscribers of a Thing.
///
/// Broadcasts work on a snapshot of the set, so subscribers can be added or
/// removed while a broadcast is running, and no subscriber is written to
/// while the set is locked.
pub(crate) struct Subscribers {
    entries: RwLock<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.entries.read().len())
            .finish()
    }
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Arc::new(Entry {
            id,
            subscriber,
            active: AtomicBool::new(true),
            events: RwLock::new(None),
        }));
        debug!("Subscriber {id} added");
        id
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.write();
        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = entries.remove(position);
        entry.active.store(false, Ordering::Release);
        debug!("Subscriber {id} removed");
        true
    }

    pub(crate) fn subscribe_event(&self, id: SubscriberId, name: &str) -> bool {
        let entries = self.entries.read();
        let Some(entry) = entries.iter().find(|entry| entry.id == id) else {
            return false;
        };
        let _ = entry
            .events
            .write()
            .get_or_insert_with(HashSet::new)
            .insert(name.to_owned());
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn broadcast(&self, message: &Message) -> usize {
        self.deliver_to(message, |_| true)
    }

    pub(crate) fn broadcast_event(&self, name: &str, message: &Message) -> usize {
        self.deliver_to(message, |entry| entry.wants_event(name))
    }

    fn deliver_to(&self, message: &Message, filter: impl Fn(&Entry) -> bool) -> usize {
        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Unable to encode a message for subscribers: {e}");
                return 0;
            }
        };

        let snapshot: Vec<Arc<Entry>> = self
            .entries
            .read()
            .iter()
            .filter(|entry| filter(entry))
            .cloned()
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            match entry.subscriber.deliver(&encoded) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping subscriber {}: {e}", entry.id);
                    failed.push(entry.id);
                }
            }
        }

        for id in failed {
            let _ = self.remove(id);
        }

        delivered
    }
}
