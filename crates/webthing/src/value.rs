use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard, RwLock};

use serde_json::Value as JsonValue;

use tracing::{error, warn};

use crate::error::{Error, ErrorKind, Result};

/// A callback that pushes a requested value to the device before the
/// [`Value`] commits it.
///
/// Returning an error refuses the value.
pub type Forwarder = Box<dyn Fn(&JsonValue) -> Result<()> + Send + Sync + 'static>;

/// A callback invoked with every new value.
pub type Listener = Arc<dyn Fn(&JsonValue) -> Result<()> + Send + Sync + 'static>;

/// The identifier of a registered [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The outcome of a committed update.
///
/// A failing listener never aborts an update, so its failure is reported
/// here instead.
#[derive(Debug, Default, PartialEq)]
pub struct UpdateReport {
    /// Number of listeners invoked.
    pub notified: usize,
    /// Failures returned or raised by listeners, in invocation order.
    pub failures: Vec<Error>,
}

impl UpdateReport {
    /// Whether every listener succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
struct State {
    current: JsonValue,
    last: JsonValue,
}

/// An observable, settable value.
///
/// A [`Value`] connects the Thing representation to the actual device: it
/// notifies its listeners when a value is written through the API, see
/// [`Value::set`], and when the device itself reports a new value, see
/// [`Value::notify_of_external_update`].
///
/// Every accepted update notifies all listeners exactly once, in
/// registration order, even if the new value equals the old one. Writers are
/// serialized, so listeners observe updates in commit order.
///
/// Listeners run on the writer's thread while the writer lock is held:
/// they may read the value, but a write from a listener is refused with an
/// [`ErrorKind::Internal`] error.
pub struct Value {
    state: RwLock<State>,
    writer: Mutex<()>,
    // The thread holding `writer`, used to refuse writes from listeners.
    writing_thread: Mutex<Option<ThreadId>>,
    forwarder: Option<Forwarder>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("state", &*self.state.read())
            .field("forwarder", &self.forwarder.is_some())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Value {
    /// Creates a [`Value`] without a forwarder.
    #[must_use]
    pub fn new(initial: impl Into<JsonValue>) -> Self {
        let initial = initial.into();
        Self {
            state: RwLock::new(State {
                current: initial.clone(),
                last: initial,
            }),
            writer: Mutex::new(()),
            writing_thread: Mutex::new(None),
            forwarder: None,
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Creates a [`Value`] whose writes are first pushed to the device through
    /// the given forwarder.
    #[must_use]
    pub fn with_forwarder<F>(initial: impl Into<JsonValue>, forwarder: F) -> Self
    where
        F: Fn(&JsonValue) -> Result<()> + Send + Sync + 'static,
    {
        let mut value = Self::new(initial);
        value.forwarder = Some(Box::new(forwarder));
        value
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> JsonValue {
        self.state.read().current.clone()
    }

    /// Returns the value that preceded the current one.
    #[must_use]
    pub fn last_value(&self) -> JsonValue {
        self.state.read().last.clone()
    }

    /// Registers a listener, invoked after all previously registered ones.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&JsonValue) -> Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener.
    ///
    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Writes a new value requested through the API.
    ///
    /// The forwarder, if any, is invoked first. When it accepts, the value is
    /// committed and every listener is notified.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::ForwardRejected`] if the forwarder refuses the value,
    ///   in which case the value is left unchanged.
    /// - [`ErrorKind::Internal`] if called from one of the listeners of this
    ///   value.
    pub fn set(&self, value: impl Into<JsonValue>) -> Result<UpdateReport> {
        let value = value.into();
        let _writer = self.lock_writer()?;

        if let Some(forwarder) = &self.forwarder {
            Self::forward(forwarder, &value)?;
        }

        Ok(self.commit(value))
    }

    /// Records a new value produced by the device itself.
    ///
    /// The forwarder is skipped, every listener is notified.
    ///
    /// Called from one of the listeners of this value, the update is dropped
    /// and the report carries the [`ErrorKind::Internal`] failure.
    pub fn notify_of_external_update(&self, value: impl Into<JsonValue>) -> UpdateReport {
        let value = value.into();
        match self.lock_writer() {
            Ok(_writer) => self.commit(value),
            Err(e) => UpdateReport {
                notified: 0,
                failures: vec![e],
            },
        }
    }

    fn lock_writer(&self) -> Result<WriterGuard<'_>> {
        let current = thread::current().id();
        // Only this thread can have stored its own id, so the check is exact.
        if *self.writing_thread.lock() == Some(current) {
            error!("A value listener tried to write its own value");
            return Err(Error::new(
                ErrorKind::Internal,
                "A value listener cannot write its own value",
            ));
        }

        let writer = self.writer.lock();
        *self.writing_thread.lock() = Some(current);
        Ok(WriterGuard {
            value: self,
            _writer: writer,
        })
    }

    fn forward(forwarder: &Forwarder, value: &JsonValue) -> Result<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| forwarder(value)))
            .unwrap_or_else(|_| Err(Error::forward_rejected("The forwarder panicked")));

        outcome.map_err(|e| {
            warn!("Forwarder refused the value `{value}`: {e}");
            if e.kind() == ErrorKind::ForwardRejected {
                e
            } else {
                Error::forward_rejected(e.description().to_owned())
            }
        })
    }

    fn commit(&self, value: JsonValue) -> UpdateReport {
        {
            let mut state = self.state.write();
            state.last = std::mem::replace(&mut state.current, value.clone());
        }

        // Listeners may register or remove listeners, so iterate on a copy.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut report = UpdateReport {
            notified: listeners.len(),
            failures: Vec::new(),
        };

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(&value))).unwrap_or_else(|_| {
                Err(Error::new(ErrorKind::Internal, "A value listener panicked"))
            });

            if let Err(e) = outcome {
                error!("Value listener failed on `{value}`: {e}");
                report.failures.push(e);
            }
        }

        report
    }
}

// Holds the writer lock and records its owner until dropped.
struct WriterGuard<'a> {
    value: &'a Value,
    _writer: MutexGuard<'a, ()>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.value.writing_thread.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use serde_json::{Value as JsonValue, json};

    use crate::error::{Error, ErrorKind};

    use super::Value;

    fn recorder(value: &Value, tag: &'static str, log: &Arc<Mutex<Vec<(&'static str, JsonValue)>>>) {
        let log = Arc::clone(log);
        let _ = value.add_listener(move |v| {
            log.lock().push((tag, v.clone()));
            Ok(())
        });
    }

    #[test]
    fn listeners_in_registration_order() {
        let value = Value::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&value, "first", &log);
        recorder(&value, "second", &log);
        recorder(&value, "third", &log);

        let report = value.set(1).unwrap();
        assert_eq!(report.notified, 3);
        assert!(report.is_clean());

        let _ = value.notify_of_external_update(2);

        assert_eq!(
            *log.lock(),
            vec![
                ("first", json!(1)),
                ("second", json!(1)),
                ("third", json!(1)),
                ("first", json!(2)),
                ("second", json!(2)),
                ("third", json!(2)),
            ]
        );
        assert_eq!(value.get(), json!(2));
        assert_eq!(value.last_value(), json!(1));
    }

    #[test]
    fn equal_values_still_notify() {
        let value = Value::new(true);
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&value, "listener", &log);

        let _ = value.set(true).unwrap();
        let _ = value.set(true).unwrap();

        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn rejected_forward_keeps_value() {
        let value = Value::with_forwarder(10, |v| {
            if v.as_i64().is_some_and(|v| v > 50) {
                Err(Error::forward_rejected("The device cannot reach that level"))
            } else {
                Ok(())
            }
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&value, "listener", &log);

        let error = value.set(80).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ForwardRejected);
        assert_eq!(value.get(), json!(10));
        assert!(log.lock().is_empty());

        let _ = value.set(20).unwrap();
        assert_eq!(value.get(), json!(20));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn forwarder_errors_become_rejections() {
        let value = Value::with_forwarder(0, |_| Err(Error::validation("bad")));
        assert_eq!(value.set(1).unwrap_err().kind(), ErrorKind::ForwardRejected);
    }

    #[test]
    fn external_updates_skip_the_forwarder() {
        let forwarded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&forwarded);
        let value = Value::with_forwarder(0, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let report = value.notify_of_external_update(5);
        assert_eq!(report.notified, 0);
        assert!(!forwarded.load(Ordering::SeqCst));
        assert_eq!(value.get(), json!(5));
    }

    #[test]
    fn failing_listeners_do_not_stop_the_others() {
        let value = Value::new("off");
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = value.add_listener(|_| Err(Error::new(ErrorKind::Internal, "listener error")));
        let _ = value.add_listener(|_| panic!("listener panic"));
        recorder(&value, "last", &log);

        let report = value.set("on").unwrap();

        assert_eq!(report.notified, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].description(), "listener error");
        assert_eq!(*log.lock(), vec![("last", json!("on"))]);
        assert_eq!(value.get(), json!("on"));
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let value = Value::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let id = value.add_listener(move |v| {
            log_clone.lock().push(("removed", v.clone()));
            Ok(())
        });
        recorder(&value, "kept", &log);

        assert!(value.remove_listener(id));
        assert!(!value.remove_listener(id));

        let _ = value.set(1).unwrap();
        assert_eq!(*log.lock(), vec![("kept", json!(1))]);
    }

    #[test]
    fn listener_writing_its_own_value_is_refused() {
        let value = Arc::new(Value::new(0));
        let weak = Arc::downgrade(&value);
        let _ = value.add_listener(move |_| match weak.upgrade() {
            Some(value) => value.set(5).map(|_| ()),
            None => Ok(()),
        });

        let report = value.set(1).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind(), ErrorKind::Internal);
        assert_eq!(value.get(), json!(1));

        let report = value.notify_of_external_update(2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(value.get(), json!(2));

        // The writer is released once the update is over.
        let reader = Arc::clone(&value);
        let report = std::thread::spawn(move || reader.notify_of_external_update(3))
            .join()
            .unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(value.get(), json!(3));
    }

    #[test]
    fn concurrent_writers_notify_in_commit_order() {
        let value = Arc::new(Value::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::clone(&value);
        let log_clone = Arc::clone(&log);
        // The listener sees the committed value, so both sequences match.
        let _ = value.add_listener(move |v| {
            log_clone.lock().push((v.clone(), reader.get()));
            Ok(())
        });

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let value = Arc::clone(&value);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let _ = value.set(worker * 100 + i).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let log = log.lock();
        assert_eq!(log.len(), 100);
        assert!(log.iter().all(|(notified, current)| notified == current));
    }
}
