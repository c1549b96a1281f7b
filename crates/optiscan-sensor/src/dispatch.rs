//! Event delivery.
//!
//! [`EventDispatcher`] holds at most one application handler. Registering a
//! new one replaces the old. Dispatch is synchronous on the task that
//! produced the event; with no handler registered the event is dropped.
//!
//! [`Correlator`] pairs the next event with the command that is waiting for
//! it.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Result, SensorError};
use crate::event::Event;

/// Receives application events.
///
/// Implemented for any `Fn(&Event) + Send + Sync` closure.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// One-slot handler registration.
#[derive(Default)]
pub struct EventDispatcher {
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous one.
    pub fn register(&self, handler: impl EventHandler + 'static) {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Replacing event handler");
        }
        *slot = Some(Arc::new(handler));
    }

    pub fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Deliver `event` to the handler, if any. Returns whether it was delivered.
    pub fn dispatch(&self, event: &Event) -> bool {
        // Clone out of the lock so a handler may re-register.
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => {
                trace!(event = event.kind.name(), command = event.command, "Dispatching event");
                handler.handle(event);
                true
            }
            None => {
                warn!(event = event.kind.name(), command = event.command, "No event handler, dropping event");
                false
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("has_handler", &self.has_handler())
            .finish()
    }
}

struct Pending {
    opcode: u8,
    tx: oneshot::Sender<Result<Event>>,
}

/// Single pending-command slot.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<Option<Pending>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the response to `opcode`. Replaces any earlier waiter.
    pub fn expect(&self, opcode: u8) -> oneshot::Receiver<Result<Event>> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Pending { opcode, tx });
        if let Some(previous) = previous {
            debug!(opcode = previous.opcode, "Abandoning stale waiter");
        }
        rx
    }

    /// Opcode of the command currently waiting, if any.
    pub fn pending(&self) -> Option<u8> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.opcode)
    }

    /// Clear the slot without completing it.
    pub fn cancel(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Hand `event` to the waiter if its command matches.
    ///
    /// Returns `true` when a waiter took the event.
    pub fn complete(&self, event: &Event) -> bool {
        let waiter = {
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(p) if p.opcode == event.command => slot.take(),
                _ => None,
            }
        };

        match waiter {
            // The waiter may have timed out and dropped its receiver.
            Some(waiter) => waiter.tx.send(Ok(event.clone())).is_ok(),
            None => false,
        }
    }

    /// Fail the waiting command, whatever it is.
    ///
    /// Returns `false` if no command was waiting.
    pub fn fail(&self, error: SensorError) -> bool {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match waiter {
            Some(waiter) => waiter.tx.send(Err(error)).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending())
            .finish()
    }
}
