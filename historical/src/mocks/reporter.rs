use std::sync::{Arc, Mutex};

/// An event recorded by [Reporter].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub priority: u8,
    pub category: String,
    pub tag: String,
    pub message: String,
}

/// A reporter that records every event it receives.
#[derive(Clone, Default)]
pub struct Reporter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Reporter {
    /// Returns the events recorded so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl crate::Reporter for Reporter {
    fn report(&self, priority: u8, category: &str, tag: &str, message: &str) {
        self.events.lock().unwrap().push(Event {
            priority,
            category: category.into(),
            tag: tag.into(),
            message: message.into(),
        });
    }
}
