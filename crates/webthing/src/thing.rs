use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use parking_lot::{Mutex, RwLock};

use serde_json::{Map, Value as JsonValue};

use tracing::{debug, info, warn};

use uuid::Uuid;

use crate::action::{Action, ActionHandler, ActionStatus, current_runtime};
use crate::description::{DEFAULT_CONTEXT, ThingDescription};
use crate::error::{Error, ErrorKind, Result};
use crate::event::Event;
use crate::property::Property;
use crate::schema::{ActionMetadata, DataSchema, Link};
use crate::subscriber::{Message, Subscriber, SubscriberId, Subscribers};
use crate::value::{ListenerId, UpdateReport};

struct AvailableAction {
    metadata: ActionMetadata,
    handler: ActionHandler,
}

struct EventLog {
    events: VecDeque<Event>,
    retention: Option<usize>,
}

impl EventLog {
    fn push(&mut self, event: Event) {
        if self.retention == Some(0) {
            return;
        }
        if let Some(retention) = self.retention {
            while self.events.len() >= retention {
                let _ = self.events.pop_front();
            }
        }
        self.events.push_back(event);
    }
}

pub(crate) struct ThingInner {
    id: String,
    title: String,
    context: String,
    semantic_types: Vec<String>,
    description: Option<String>,
    href_prefix: RwLock<String>,
    properties: RwLock<IndexMap<String, (Arc<Property>, ListenerId)>>,
    available_actions: RwLock<IndexMap<String, AvailableAction>>,
    // Requested actions, grouped by name in request order.
    actions: RwLock<IndexMap<String, Vec<Arc<Action>>>>,
    available_events: RwLock<IndexMap<String, DataSchema>>,
    events: Mutex<EventLog>,
    subscribers: Subscribers,
}

/// A non-owning reference to a [`Thing`].
///
/// Properties and actions use it to reach the Thing they belong to.
#[derive(Clone)]
pub(crate) struct WeakThing(Weak<ThingInner>);

impl WeakThing {
    #[cfg(test)]
    pub(crate) const fn new() -> Self {
        Self(Weak::new())
    }

    pub(crate) fn upgrade(&self) -> Option<Thing> {
        self.0.upgrade().map(|inner| Thing { inner })
    }
}

impl std::fmt::Debug for WeakThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.upgrade() {
            Some(inner) => write!(f, "WeakThing({})", inner.id),
            None => f.write_str("WeakThing(dropped)"),
        }
    }
}

/// A [`Thing`] builder.
#[derive(Debug)]
pub struct ThingBuilder {
    id: String,
    title: String,
    context: String,
    semantic_types: Vec<String>,
    description: Option<String>,
    event_retention: Option<usize>,
}

impl ThingBuilder {
    /// Sets the `@context`.
    ///
    /// By default, it is [`DEFAULT_CONTEXT`].
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Adds a semantic capability, serialized in `@type`.
    #[must_use]
    pub fn semantic_type(mut self, semantic_type: impl Into<String>) -> Self {
        self.semantic_types.push(semantic_type.into());
        self
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keeps at most `events` events in the event log, evicting the oldest.
    ///
    /// By default, the log is unbounded.
    #[must_use]
    pub const fn event_retention(mut self, events: usize) -> Self {
        self.event_retention = Some(events);
        self
    }

    /// Builds the [`Thing`].
    #[must_use]
    pub fn build(self) -> Thing {
        Thing {
            inner: Arc::new(ThingInner {
                id: self.id,
                title: self.title,
                context: self.context,
                semantic_types: self.semantic_types,
                description: self.description,
                href_prefix: RwLock::new(String::new()),
                properties: RwLock::new(IndexMap::new()),
                available_actions: RwLock::new(IndexMap::new()),
                actions: RwLock::new(IndexMap::new()),
                available_events: RwLock::new(IndexMap::new()),
                events: Mutex::new(EventLog {
                    events: VecDeque::new(),
                    retention: self.event_retention,
                }),
                subscribers: Subscribers::new(),
            }),
        }
    }
}

/// A device exposed over the network.
///
/// A [`Thing`] owns its properties, actions and events, and forwards every
/// change of them to its subscribers. It is a cheap handle: clones share the
/// same state, so it can be handed to request handlers, action bodies and
/// device tasks alike.
///
/// Each part of the state is guarded by its own lock, and no lock is held
/// while delivering messages to subscribers.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<ThingInner>,
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("id", &self.inner.id)
            .field("title", &self.inner.title)
            .field("href", &self.href())
            .field("subscribers", &self.inner.subscribers)
            .finish_non_exhaustive()
    }
}

impl Thing {
    /// Creates a [`Thing`] with default settings.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::builder(id, title).build()
    }

    /// Starts building a [`Thing`].
    #[must_use]
    pub fn builder(id: impl Into<String>, title: impl Into<String>) -> ThingBuilder {
        ThingBuilder {
            id: id.into(),
            title: title.into(),
            context: DEFAULT_CONTEXT.into(),
            semantic_types: Vec::new(),
            description: None,
            event_retention: None,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakThing {
        WeakThing(Arc::downgrade(&self.inner))
    }

    /// Returns the Thing identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns the Thing title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Returns the `@context`.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.inner.context
    }

    /// Returns the semantic capabilities.
    #[must_use]
    pub fn semantic_types(&self) -> &[String] {
        &self.inner.semantic_types
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    /// Returns the Thing path.
    #[must_use]
    pub fn href(&self) -> String {
        let prefix = self.inner.href_prefix.read();
        if prefix.is_empty() {
            "/".into()
        } else {
            prefix.clone()
        }
    }

    /// Sets the prefix of every path of the Thing and of its properties.
    ///
    /// Actions keep the prefix in use when they were requested.
    pub fn set_href_prefix(&self, prefix: &str) {
        *self.inner.href_prefix.write() = prefix.to_owned();
        for (property, _) in self.inner.properties.read().values() {
            property.set_href_prefix(prefix);
        }
    }

    fn href_prefix(&self) -> String {
        self.inner.href_prefix.read().clone()
    }

    /// Returns the description document of the Thing.
    #[must_use]
    pub fn as_thing_description(&self) -> ThingDescription {
        let prefix = self.href_prefix();

        let properties = self
            .inner
            .properties
            .read()
            .iter()
            .map(|(name, (property, _))| (name.clone(), property.as_description()))
            .collect();

        let actions = self
            .inner
            .available_actions
            .read()
            .iter()
            .map(|(name, action)| {
                let mut metadata = action.metadata.clone();
                metadata
                    .links
                    .push(Link::new("action", format!("{prefix}/actions/{name}")));
                (name.clone(), metadata)
            })
            .collect();

        let events = self
            .inner
            .available_events
            .read()
            .iter()
            .map(|(name, metadata)| {
                let mut metadata = metadata.clone();
                metadata
                    .links
                    .push(Link::new("event", format!("{prefix}/events/{name}")));
                (name.clone(), metadata)
            })
            .collect();

        ThingDescription {
            id: self.inner.id.clone(),
            title: self.inner.title.clone(),
            context: self.inner.context.clone(),
            semantic_types: self.inner.semantic_types.clone(),
            description: self.inner.description.clone(),
            properties,
            actions,
            events,
            links: vec![
                Link::new("properties", format!("{prefix}/properties")),
                Link::new("actions", format!("{prefix}/actions")),
                Link::new("events", format!("{prefix}/events")),
            ],
            href: None,
            base: None,
            security_definitions: None,
            security: None,
        }
    }

    /// Adds a property, replacing any property with the same name.
    ///
    /// Every update of the property value is forwarded to the subscribers.
    /// The returned handle lets device code report new readings.
    pub fn add_property(&self, property: Property) -> Arc<Property> {
        property.set_href_prefix(&self.href_prefix());
        let property = Arc::new(property);

        let thing = self.downgrade();
        let name = property.name().to_owned();
        let listener = property.value().add_listener(move |value| {
            if let Some(thing) = thing.upgrade() {
                thing.property_notify(&name, value);
            }
            Ok(())
        });

        let previous = self.inner.properties.write().insert(
            property.name().to_owned(),
            (Arc::clone(&property), listener),
        );
        if let Some((previous, listener)) = previous {
            let _ = previous.value().remove_listener(listener);
            debug!("Property `{}` replaced", previous.name());
        }

        property
    }

    /// Removes a property and stops forwarding its updates.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::UnknownName`] error if no such property
    /// exists.
    pub fn remove_property(&self, name: &str) -> Result<Arc<Property>> {
        let (property, listener) = self
            .inner
            .properties
            .write()
            .shift_remove(name)
            .ok_or_else(|| Error::unknown_name("property", name))?;
        let _ = property.value().remove_listener(listener);
        Ok(property)
    }

    /// Returns a property.
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<Arc<Property>> {
        self.inner
            .properties
            .read()
            .get(name)
            .map(|(property, _)| Arc::clone(property))
    }

    /// Whether a property exists.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.inner.properties.read().contains_key(name)
    }

    /// Returns the value of a property.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<JsonValue> {
        self.find_property(name).map(|property| property.get_value())
    }

    /// Returns the values of all properties, in insertion order.
    #[must_use]
    pub fn get_properties(&self) -> Map<String, JsonValue> {
        self.inner
            .properties
            .read()
            .iter()
            .map(|(name, (property, _))| (name.clone(), property.get_value()))
            .collect()
    }

    /// Writes a property value requested through the API.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownName`] when no such property exists.
    /// - [`ErrorKind::Validation`] and [`ErrorKind::ForwardRejected`] as
    ///   returned by [`Property::set_value`].
    pub fn set_property(&self, name: &str, value: impl Into<JsonValue>) -> Result<UpdateReport> {
        // The map lock is released before the value notifies anyone.
        let property = self
            .find_property(name)
            .ok_or_else(|| Error::unknown_name("property", name))?;
        property.set_value(value)
    }

    /// Declares an action the Thing can perform.
    ///
    /// Every request of the action runs `handler`. Declaring a name twice
    /// replaces the previous declaration.
    pub fn add_available_action(
        &self,
        name: impl Into<String>,
        metadata: ActionMetadata,
        handler: ActionHandler,
    ) {
        let _ = self
            .inner
            .available_actions
            .write()
            .insert(name.into(), AvailableAction { metadata, handler });
    }

    /// Whether an action has been declared.
    #[must_use]
    pub fn has_available_action(&self, name: &str) -> bool {
        self.inner.available_actions.read().contains_key(name)
    }

    /// Requests an action.
    ///
    /// The input is validated, then the action is registered, moved to
    /// [`crate::action::ActionStatus::Pending`] and scheduled on the current
    /// Tokio runtime. The caller is not blocked by the action body.
    ///
    /// Without an `id`, a unique identifier is generated.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownName`] when the action has not been declared.
    /// - [`ErrorKind::Validation`] when the input violates the declared
    ///   schema, or when `id` is already in use.
    /// - [`ErrorKind::Internal`] when called outside a Tokio runtime.
    pub fn request_action(
        &self,
        name: &str,
        input: Option<JsonValue>,
        id: Option<String>,
    ) -> Result<Arc<Action>> {
        let handler = {
            let available = self.inner.available_actions.read();
            let action = available
                .get(name)
                .ok_or_else(|| Error::unknown_name("action", name))?;
            action.metadata.validate_input(input.as_ref())?;
            action.handler.clone()
        };
        let runtime = current_runtime()?;

        let id = id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let action = Arc::new(Action::new(
            id,
            name.to_owned(),
            input,
            self.downgrade(),
            self.href_prefix(),
        ));

        {
            let mut actions = self.inner.actions.write();
            let requested = actions.entry(name.to_owned()).or_default();
            if requested.iter().any(|other| other.id() == action.id()) {
                return Err(Error::validation(format!(
                    "Action `{name}` already has an instance with identifier `{}`",
                    action.id()
                )));
            }
            requested.push(Arc::clone(&action));
        }

        info!("Action `{name}` requested with identifier `{}`", action.id());
        let _ = action.advance(ActionStatus::Pending);
        action.start(&runtime, handler);

        Ok(action)
    }

    /// Returns a requested action.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::UnknownId`] error if no such action exists.
    pub fn get_action(&self, name: &str, id: &str) -> Result<Arc<Action>> {
        self.inner
            .actions
            .read()
            .get(name)
            .and_then(|actions| actions.iter().find(|action| action.id() == id))
            .cloned()
            .ok_or_else(|| Error::unknown_id(name, id))
    }

    /// Removes a requested action, cancelling it if it has not settled.
    ///
    /// Cancellation is cooperative: the body may keep running for a while
    /// after the action has been removed.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::UnknownId`] error if no such action exists.
    pub fn remove_action(&self, name: &str, id: &str) -> Result<Arc<Action>> {
        let action = {
            let mut actions = self.inner.actions.write();
            let requested = actions
                .get_mut(name)
                .ok_or_else(|| Error::unknown_id(name, id))?;
            let position = requested
                .iter()
                .position(|action| action.id() == id)
                .ok_or_else(|| Error::unknown_id(name, id))?;
            requested.remove(position)
        };

        let _ = action.cancel();
        debug!("Action `{name}` ({id}) removed");
        Ok(action)
    }

    /// Returns the descriptions of requested actions, optionally limited to
    /// one action name.
    #[must_use]
    pub fn action_descriptions(&self, name: Option<&str>) -> Vec<JsonValue> {
        let actions = self.inner.actions.read();
        match name {
            Some(name) => actions
                .get(name)
                .map(|requested| requested.iter().map(|a| a.as_description()).collect())
                .unwrap_or_default(),
            None => actions
                .values()
                .flatten()
                .map(|action| action.as_description())
                .collect(),
        }
    }

    /// Declares an event the Thing can emit.
    pub fn add_available_event(&self, name: impl Into<String>, metadata: DataSchema) {
        let _ = self
            .inner
            .available_events
            .write()
            .insert(name.into(), metadata);
    }

    /// Whether an event has been declared.
    #[must_use]
    pub fn has_available_event(&self, name: &str) -> bool {
        self.inner.available_events.read().contains_key(name)
    }

    /// Appends an event to the event log and forwards it to the
    /// subscribers.
    pub fn add_event(&self, event: Event) {
        if !self.has_available_event(event.name()) {
            warn!("Event `{}` has not been declared", event.name());
        }
        let message = Message::Event(event.as_description());
        let name = event.name().to_owned();
        self.inner.events.lock().push(event);
        let _ = self.inner.subscribers.broadcast_event(&name, &message);
    }

    /// Returns the descriptions of logged events, optionally limited to one
    /// event name.
    #[must_use]
    pub fn event_descriptions(&self, name: Option<&str>) -> Vec<JsonValue> {
        self.inner
            .events
            .lock()
            .events
            .iter()
            .filter(|event| name.is_none_or(|name| event.name() == name))
            .map(Event::as_description)
            .collect()
    }

    /// Registers a subscriber.
    ///
    /// From now on, the subscriber receives every property, action and event
    /// notification, until it is removed or a delivery to it fails.
    pub fn add_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.inner.subscribers.add(subscriber)
    }

    /// Removes a subscriber.
    ///
    /// Returns `false` if the subscriber was not registered, for example
    /// because a delivery to it already failed.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.remove(id)
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Restricts the events a subscriber receives.
    ///
    /// A subscriber which never subscribed to an event receives all events;
    /// once subscribed to at least one, it receives only the events it
    /// subscribed to. Property and action notifications are not affected.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnknownName`] when the event has not been declared.
    /// - [`ErrorKind::UnknownId`] when the subscriber is not registered.
    pub fn add_event_subscription(&self, subscriber: SubscriberId, name: &str) -> Result<()> {
        if !self.has_available_event(name) {
            return Err(Error::unknown_name("event", name));
        }
        if self.inner.subscribers.subscribe_event(subscriber, name) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::UnknownId,
                format!("No subscriber with identifier `{subscriber}`"),
            ))
        }
    }

    /// Forwards a property value to the subscribers.
    pub fn property_notify(&self, name: &str, value: &JsonValue) {
        let message = Message::property_status(name, value.clone());
        let _ = self.inner.subscribers.broadcast(&message);
    }

    /// Forwards the status of an action to the subscribers.
    pub fn action_notify(&self, action: &Action) {
        let message = Message::ActionStatus(action.as_description());
        let _ = self.inner.subscribers.broadcast(&message);
    }

    /// Forwards an event to the subscribers, without logging it.
    pub fn event_notify(&self, event: &Event) {
        let message = Message::Event(event.as_description());
        let _ = self.inner.subscribers.broadcast_event(event.name(), &message);
    }
}
