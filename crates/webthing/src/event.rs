use serde_json::{Map, Value as JsonValue, json};

use crate::utils::timestamp;

/// Something that happened on a Thing.
///
/// An [`Event`] is immutable: it is stamped at construction, appended to the
/// event log of a Thing and broadcast once to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    data: Option<JsonValue>,
    time: String,
}

impl Event {
    /// Creates an [`Event`] without data.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            time: timestamp(),
        }
    }

    /// Creates an [`Event`] carrying the given data.
    #[must_use]
    pub fn with_data(name: impl Into<String>, data: impl Into<JsonValue>) -> Self {
        Self {
            name: name.into(),
            data: Some(data.into()),
            time: timestamp(),
        }
    }

    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the event data.
    #[must_use]
    pub const fn data(&self) -> Option<&JsonValue> {
        self.data.as_ref()
    }

    /// Returns the event timestamp.
    #[must_use]
    pub fn time(&self) -> &str {
        &self.time
    }

    /// Returns the event description, keyed by the event name.
    #[must_use]
    pub fn as_description(&self) -> JsonValue {
        let mut inner = Map::new();
        if let Some(data) = &self.data {
            let _ = inner.insert("data".into(), data.clone());
        }
        let _ = inner.insert("timestamp".into(), json!(self.time));

        let mut description = Map::new();
        let _ = description.insert(self.name.clone(), JsonValue::Object(inner));
        JsonValue::Object(description)
    }
}
