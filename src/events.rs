//! Event subscription registry (C6).
//!
//! Maps event name to an ordered list of handlers. Firing releases the
//! registry's internal lock before invoking any handler, so a handler may
//! re-entrantly subscribe or unsubscribe without deadlocking the read loop.

use crate::channel::Channel;
use crate::error::AmiError;
use crate::packet::Packet;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A fired event: the raw packet plus any channel-valued headers translated
/// into session-backed [`Channel`] references.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub packet: Packet,
    pub channel: Option<Channel>,
    pub channel1: Option<Channel>,
    pub channel2: Option<Channel>,
}

/// A subscribed event handler. Wrapped in `Arc` so subscribe/unsubscribe can
/// compare handler identity by pointer, matching the spec's requirement that
/// re-subscribing the exact same handler for the same event is an error.
pub type Handler = Arc<dyn Fn(&EventMessage) -> Result<(), AmiError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    handlers: HashMap<String, Vec<Handler>>,
}

/// Named multi-handler event subscriptions, with scoped capture support for
/// list-action aggregation (see [`crate::list_actions`]).
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Subscribe `handler` to `name`. Fails with `DuplicateSubscription` if
    /// this exact handler (by `Arc` identity) is already registered for
    /// `name`.
    pub fn subscribe(&self, name: impl Into<String>, handler: Handler) -> Result<(), AmiError> {
        let name = name.into();
        let mut inner = self.inner.lock().unwrap();
        let list = inner.handlers.entry(name.clone()).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return Err(AmiError::DuplicateSubscription(name));
        }
        list.push(handler);
        Ok(())
    }

    /// Remove `handler` from `name`'s list, if present. Returns whether
    /// anything was removed.
    pub fn unsubscribe(&self, name: &str, handler: &Handler) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.handlers.get_mut(name) {
            let before = list.len();
            list.retain(|h| !Arc::ptr_eq(h, handler));
            if list.is_empty() {
                inner.handlers.remove(name);
            }
            return list.len() != before;
        }
        false
    }

    /// Remove every handler registered for `name`.
    pub fn clear(&self, name: &str) {
        self.inner.lock().unwrap().handlers.remove(name);
    }

    /// Fire `name`'s handlers, in insertion order, sequentially. A handler
    /// returning `Err` aborts the remaining handlers for this call and
    /// propagates. Returns the last handler's result, or `Ok(())` if no
    /// subscriber (and no fallback) exists.
    pub fn fire(&self, name: &str, event: &EventMessage) -> Result<(), AmiError> {
        let handlers = {
            let inner = self.inner.lock().unwrap();
            inner.handlers.get(name).cloned()
        };
        let Some(handlers) = handlers else {
            return Ok(());
        };
        let mut result = Ok(());
        for handler in &handlers {
            result = handler(event);
            if result.is_err() {
                break;
            }
        }
        result
    }

    pub fn has_subscriber(&self, name: &str) -> bool {
        self.inner.lock().unwrap().handlers.contains_key(name)
    }

    /// Atomically swap `name`'s entire handler list for a single capture
    /// handler, returning whatever was there before (possibly empty). Used
    /// by list-action aggregation to divert specific event names for the
    /// duration of one call.
    pub(crate) fn replace(&self, name: &str, handler: Handler) -> Vec<Handler> {
        let mut inner = self.inner.lock().unwrap();
        inner.handlers.insert(name.to_owned(), vec![handler]).unwrap_or_default()
    }

    /// Restore a previously saved handler list for `name`. An empty list
    /// removes the entry entirely (matching the "no subscriber" state).
    pub(crate) fn restore(&self, name: &str, handlers: Vec<Handler>) {
        let mut inner = self.inner.lock().unwrap();
        if handlers.is_empty() {
            inner.handlers.remove(name);
        } else {
            inner.handlers.insert(name.to_owned(), handlers);
        }
    }

    /// Merge every handler from `other` into `self`, skipping any
    /// `(name, handler)` pair already present.
    pub fn merge_from(&self, other: &Registry) {
        let other_inner = other.inner.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        for (name, handlers) in other_inner.handlers.iter() {
            let list = inner.handlers.entry(name.clone()).or_default();
            for h in handlers {
                if !list.iter().any(|existing| Arc::ptr_eq(existing, h)) {
                    list.push(h.clone());
                }
            }
        }
    }

    /// Remove every handler present in `other` from `self`.
    pub fn remove_all(&self, other: &Registry) {
        let other_inner = other.inner.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        for (name, handlers) in other_inner.handlers.iter() {
            if let Some(list) = inner.handlers.get_mut(name) {
                for h in handlers {
                    list.retain(|existing| !Arc::ptr_eq(existing, h));
                }
                if list.is_empty() {
                    inner.handlers.remove(name);
                }
            }
        }
    }
}

impl std::ops::AddAssign<&Registry> for Registry {
    fn add_assign(&mut self, rhs: &Registry) {
        self.merge_from(rhs);
    }
}

impl std::ops::SubAssign<&Registry> for Registry {
    fn sub_assign(&mut self, rhs: &Registry) {
        self.remove_all(rhs);
    }
}

/// RAII guard installing temporary capture handlers on a registry for the
/// duration of a list action. Restores the prior handlers (even an empty
/// list) on drop, on both the success and error paths.
pub(crate) struct CaptureScope<'a> {
    registry: &'a Registry,
    saved: Vec<(String, Vec<Handler>)>,
}

impl<'a> CaptureScope<'a> {
    pub fn install(registry: &'a Registry, captures: Vec<(&str, Handler)>) -> Self {
        let mut saved = Vec::with_capacity(captures.len());
        for (name, handler) in captures {
            let prior = registry.replace(name, handler);
            saved.push((name.to_owned(), prior));
        }
        CaptureScope { registry, saved }
    }
}

impl<'a> Drop for CaptureScope<'a> {
    fn drop(&mut self) {
        for (name, handlers) in self.saved.drain(..) {
            self.registry.restore(&name, handlers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(event: &str) -> EventMessage {
        let mut p = Packet::new();
        p.set("Event", event);
        EventMessage {
            packet: p,
            channel: None,
            channel1: None,
            channel2: None,
        }
    }

    #[test]
    fn duplicate_subscription_errors() {
        let reg = Registry::new();
        let h: Handler = Arc::new(|_| Ok(()));
        reg.subscribe("Hangup", h.clone()).unwrap();
        let err = reg.subscribe("Hangup", h).unwrap_err();
        assert!(matches!(err, AmiError::DuplicateSubscription(_)));
    }

    #[test]
    fn fires_in_insertion_order() {
        let reg = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        reg.subscribe(
            "Hangup",
            Arc::new(move |_| {
                o1.lock().unwrap().push(1);
                Ok(())
            }),
        )
        .unwrap();
        reg.subscribe(
            "Hangup",
            Arc::new(move |_| {
                o2.lock().unwrap().push(2);
                Ok(())
            }),
        )
        .unwrap();
        reg.fire("Hangup", &msg("Hangup")).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn handler_error_aborts_remaining_handlers() {
        let reg = Registry::new();
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        reg.subscribe(
            "Hangup",
            Arc::new(|_| Err(AmiError::ActionFailed("boom".into()))),
        )
        .unwrap();
        reg.subscribe(
            "Hangup",
            Arc::new(move |_| {
                *ran2.lock().unwrap() = true;
                Ok(())
            }),
        )
        .unwrap();
        let result = reg.fire("Hangup", &msg("Hangup"));
        assert!(result.is_err());
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn unknown_event_with_no_subscriber_is_a_silent_ok() {
        let reg = Registry::new();
        assert!(reg.fire("Nonexistent", &msg("Nonexistent")).is_ok());
    }

    #[test]
    fn capture_scope_restores_prior_handlers_on_drop() {
        let reg = Registry::new();
        let prior: Handler = Arc::new(|_| Ok(()));
        reg.subscribe("Status", prior.clone()).unwrap();
        {
            let capture: Handler = Arc::new(|_| Ok(()));
            let _scope = CaptureScope::install(&reg, vec![("Status", capture)]);
            assert!(reg.has_subscriber("Status"));
        }
        assert!(reg.has_subscriber("Status"));
        reg.unsubscribe("Status", &prior);
        assert!(!reg.has_subscriber("Status"));
    }

    #[test]
    fn capture_scope_restores_even_when_body_panics() {
        let reg = Registry::new();
        let prior: Handler = Arc::new(|_| Ok(()));
        reg.subscribe("Status", prior.clone()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let capture: Handler = Arc::new(|_| Ok(()));
            let _scope = CaptureScope::install(&reg, vec![("Status", capture)]);
            panic!("forced error path");
        }));
        assert!(result.is_err());
        // The prior handler must be back in place despite the panic.
        let msg = msg("Status");
        assert!(reg.fire("Status", &msg).is_ok());
    }
}
