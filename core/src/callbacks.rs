//! Transition hooks
//!
//! Each hook receives the breaker name and the kind of the collector whose
//! sub-breaker changed state. A hook fires once per transition, on the thread
//! of the caller that won it.

use crate::circuit::State;
use std::sync::Arc;

/// Signature shared by all transition hooks: `(circuit, collector)`
pub type TransitionFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callbacks for breaker state changes
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionFn>,
    pub on_close: Option<TransitionFn>,
    pub on_half_open: Option<TransitionFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for entering `state`
    pub fn trigger(&self, state: State, circuit: &str, collector: &str) {
        let callback = match state {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };

        if let Some(callback) = callback {
            callback(circuit, collector);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_trigger_routes_by_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut callbacks = Callbacks::new();
        let open_seen = Arc::clone(&seen);
        callbacks.on_open = Some(Arc::new(move |circuit, collector| {
            open_seen
                .lock()
                .unwrap()
                .push(format!("open:{}:{}", circuit, collector));
        }));
        let close_seen = Arc::clone(&seen);
        callbacks.on_close = Some(Arc::new(move |circuit, _| {
            close_seen.lock().unwrap().push(format!("close:{}", circuit));
        }));

        callbacks.trigger(State::Open, "db", "error_rate");
        callbacks.trigger(State::HalfOpen, "db", "error_rate");
        callbacks.trigger(State::Closed, "db", "error_rate");

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["open:db:error_rate".to_string(), "close:db".to_string()]
        );
    }

    #[test]
    fn test_debug_hides_closures() {
        let callbacks = Callbacks::new();
        let rendered = format!("{:?}", callbacks);
        assert!(rendered.contains("on_open: false"));
    }
}
