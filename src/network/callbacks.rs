//! Join callback registry
//!
//! Callbacks are appended, never removed, and invoked in registration order.

use crate::protocol::JoinEvent;

/// Receives digital join changes as `(join, state)`
pub type DigitalCallback = Box<dyn FnMut(u16, bool) + Send>;

/// Receives analog join changes as `(join, value)`
pub type AnalogCallback = Box<dyn FnMut(u16, u16) + Send>;

#[derive(Default)]
pub struct CallbackRegistry {
    digital: Vec<DigitalCallback>,
    analog: Vec<AnalogCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_digital(&mut self, callback: DigitalCallback) {
        self.digital.push(callback);
    }

    pub fn add_analog(&mut self, callback: AnalogCallback) {
        self.analog.push(callback);
    }

    pub fn len(&self) -> usize {
        self.digital.len() + self.analog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan an event out to every callback of its kind
    pub fn dispatch(&mut self, event: JoinEvent) {
        tracing::debug!("Join event: {:?}", event);
        match event {
            JoinEvent::Digital { join, state } => {
                for callback in &mut self.digital {
                    callback(join, state);
                }
            }
            JoinEvent::Analog { join, value } => {
                for callback in &mut self.analog {
                    callback(join, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        assert!(registry.is_empty());

        for tag in ["first", "second"] {
            let log = log.clone();
            registry.add_digital(Box::new(move |join, state| {
                log.lock().unwrap().push(format!("{tag} d{join}={state}"));
            }));
        }
        let analog_log = log.clone();
        registry.add_analog(Box::new(move |join, value| {
            analog_log.lock().unwrap().push(format!("a{join}={value}"));
        }));
        assert_eq!(registry.len(), 3);

        registry.dispatch(JoinEvent::Digital { join: 5, state: true });
        registry.dispatch(JoinEvent::Analog { join: 10, value: 300 });

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first d5=true", "second d5=true", "a10=300"]
        );
    }

    #[test]
    fn test_stateful_callback() {
        let mut count = 0;
        let total = Arc::new(Mutex::new(0));
        let sink = total.clone();
        let mut registry = CallbackRegistry::new();
        registry.add_analog(Box::new(move |_, value| {
            count += 1;
            *sink.lock().unwrap() = count * 1000 + u32::from(value);
        }));

        registry.dispatch(JoinEvent::Analog { join: 1, value: 7 });
        registry.dispatch(JoinEvent::Analog { join: 1, value: 8 });
        assert_eq!(*total.lock().unwrap(), 2008);
    }
}
