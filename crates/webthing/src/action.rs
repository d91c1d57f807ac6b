use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::thing::{Thing, WeakThing};
use crate::utils::timestamp;

/// The status of an [`Action`].
///
/// Statuses only move forward:
/// `created → pending → running → completed | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// The action exists but has not been scheduled yet.
    Created,
    /// The action is waiting to be executed.
    Pending,
    /// The action body is executing.
    Running,
    /// The action body returned normally.
    Completed,
    /// The action body failed.
    Error,
}

impl ActionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Pending)
                | (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed | Self::Error)
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A boxed action body future.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

type AsyncBody = Arc<dyn Fn(ActionContext) -> ActionFuture + Send + Sync + 'static>;
type BlockingBody = Arc<dyn Fn(ActionContext) -> Result<()> + Send + Sync + 'static>;

#[derive(Clone)]
enum Body {
    Async(AsyncBody),
    Blocking(BlockingBody),
}

/// The body executed by every [`Action`] of a given name.
///
/// A handler is a factory: each request of the action runs the handler once
/// with its own [`ActionContext`].
#[derive(Clone)]
pub struct ActionHandler {
    body: Body,
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.body {
            Body::Async(_) => "async",
            Body::Blocking(_) => "blocking",
        };
        f.debug_struct("ActionHandler").field("body", &kind).finish()
    }
}

impl ActionHandler {
    /// Creates an [`ActionHandler`] from an asynchronous body.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            body: Body::Async(Arc::new(move |context| Box::pin(body(context)))),
        }
    }

    /// Creates an [`ActionHandler`] from a body performing blocking device
    /// input/output.
    ///
    /// The body runs on the blocking thread pool of the runtime, so it never
    /// stalls request handling.
    pub fn blocking<F>(body: F) -> Self
    where
        F: Fn(ActionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            body: Body::Blocking(Arc::new(body)),
        }
    }
}

/// What an action body knows about the action it is running for.
#[derive(Debug, Clone)]
pub struct ActionContext {
    action: Arc<Action>,
}

impl ActionContext {
    /// Returns the action identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.action.id()
    }

    /// Returns the action name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.action.name()
    }

    /// Returns the validated action input.
    #[must_use]
    pub fn input(&self) -> Option<&JsonValue> {
        self.action.input()
    }

    /// Returns a member of the input object.
    #[must_use]
    pub fn input_member(&self, name: &str) -> Option<&JsonValue> {
        self.action.input().and_then(|input| input.get(name))
    }

    /// Returns the Thing which owns the action, if it still exists.
    #[must_use]
    pub fn thing(&self) -> Option<Thing> {
        self.action.thing.upgrade()
    }

    /// Whether the action has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.action.cancellation.is_cancelled()
    }

    /// Waits until the action is asked to stop.
    ///
    /// Bodies usually race it against their own work with
    /// `tokio::select!`.
    pub async fn cancelled(&self) {
        self.action.cancellation.cancelled().await;
    }
}

#[derive(Debug)]
struct State {
    status: ActionStatus,
    time_completed: Option<String>,
    error: Option<String>,
}

/// One invocation of a named operation of a Thing.
///
/// The Thing constructs actions, see [`Thing::request_action`], and keeps
/// them until they are explicitly removed.
#[derive(Debug)]
pub struct Action {
    id: String,
    name: String,
    input: Option<JsonValue>,
    thing: WeakThing,
    href_prefix: String,
    time_requested: String,
    state: RwLock<State>,
    cancellation: CancellationToken,
}

impl Action {
    pub(crate) fn new(
        id: String,
        name: String,
        input: Option<JsonValue>,
        thing: WeakThing,
        href_prefix: String,
    ) -> Self {
        Self {
            id,
            name,
            input,
            thing,
            href_prefix,
            time_requested: timestamp(),
            state: RwLock::new(State {
                status: ActionStatus::Created,
                time_completed: None,
                error: None,
            }),
            cancellation: CancellationToken::new(),
        }
    }

    /// Returns the action identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the action input.
    #[must_use]
    pub const fn input(&self) -> Option<&JsonValue> {
        self.input.as_ref()
    }

    /// Returns the action path.
    #[must_use]
    pub fn href(&self) -> String {
        format!("{}/actions/{}/{}", self.href_prefix, self.name, self.id)
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ActionStatus {
        self.state.read().status
    }

    /// Returns when the action was requested.
    #[must_use]
    pub fn time_requested(&self) -> &str {
        &self.time_requested
    }

    /// Returns when the action settled, if it did.
    #[must_use]
    pub fn time_completed(&self) -> Option<String> {
        self.state.read().time_completed.clone()
    }

    /// Returns the failure recorded when the action ended in
    /// [`ActionStatus::Error`].
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Asks the action body to stop.
    ///
    /// Cancellation is cooperative: the body observes it through its
    /// [`ActionContext`] and still settles by what it returns. Cancelling a
    /// settled action does nothing and returns `false`.
    pub fn cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        debug!("Cancelling action `{}` ({})", self.name, self.id);
        self.cancellation.cancel();
        true
    }

    /// Returns the action description, keyed by the action name.
    #[must_use]
    pub fn as_description(&self) -> JsonValue {
        let state = self.state.read();

        let mut inner = Map::new();
        if let Some(input) = &self.input {
            let _ = inner.insert("input".into(), input.clone());
        }
        let _ = inner.insert("href".into(), json!(self.href()));
        let _ = inner.insert("timeRequested".into(), json!(self.time_requested));
        let _ = inner.insert("status".into(), json!(state.status));
        if let Some(time_completed) = &state.time_completed {
            let _ = inner.insert("timeCompleted".into(), json!(time_completed));
        }
        if let Some(error) = &state.error {
            let _ = inner.insert("error".into(), json!(error));
        }

        let mut description = Map::new();
        let _ = description.insert(self.name.clone(), JsonValue::Object(inner));
        JsonValue::Object(description)
    }

    /// Moves the action to `next` and notifies the owning Thing.
    ///
    /// Returns `false`, without notifying, when the transition would move the
    /// action backwards or out of a terminal status.
    pub(crate) fn advance(&self, next: ActionStatus) -> bool {
        {
            let mut state = self.state.write();
            if !state.status.can_advance_to(next) {
                warn!(
                    "Action `{}` ({}) cannot move from {} to {next}",
                    self.name, self.id, state.status
                );
                return false;
            }
            state.status = next;
            if next.is_terminal() {
                state.time_completed = Some(timestamp());
            }
        }

        debug!("Action `{}` ({}) is {next}", self.name, self.id);
        if let Some(thing) = self.thing.upgrade() {
            thing.action_notify(self);
        }
        true
    }

    fn fail(&self, message: String) {
        warn!("Action `{}` ({}) failed: {message}", self.name, self.id);
        self.state.write().error = Some(message);
        let _ = self.advance(ActionStatus::Error);
    }

    /// Schedules the action body on the given runtime.
    ///
    /// The caller is never blocked: the action moves to
    /// [`ActionStatus::Running`] once the spawned task begins.
    pub(crate) fn start(self: &Arc<Self>, runtime: &Handle, handler: ActionHandler) {
        let action = Arc::clone(self);
        let _ = runtime.spawn(async move { action.run(handler).await });
    }

    async fn run(self: Arc<Self>, handler: ActionHandler) {
        let _ = self.advance(ActionStatus::Running);

        let context = ActionContext {
            action: Arc::clone(&self),
        };

        // The body runs in its own task so a panic is caught by its handle.
        let outcome = match handler.body {
            Body::Async(body) => tokio::spawn(async move { body(context).await }).await,
            Body::Blocking(body) => tokio::task::spawn_blocking(move || body(context)).await,
        };

        match outcome {
            Ok(Ok(())) => {
                let _ = self.advance(ActionStatus::Completed);
            }
            Ok(Err(e)) => self.fail(e.description().to_owned()),
            Err(e) if e.is_panic() => self.fail("The action body panicked".into()),
            Err(_) => self.fail("The action body was aborted".into()),
        }
    }
}

/// Returns an error if there is no runtime to execute action bodies.
pub(crate) fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        Error::new(
            ErrorKind::Internal,
            "Actions can only be requested from within a Tokio runtime",
        )
    })
}
