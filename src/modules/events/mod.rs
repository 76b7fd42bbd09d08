//! Event system for profile changes.
//!
//! Handlers are invoked synchronously, in registration order, with a copy of
//! the affected profile.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::modules::selection::DisableReason;
use crate::profile::NetworkProfile;

#[derive(Debug, Clone)]
pub enum ProfileEvent {
    Added(NetworkProfile),
    Updated(NetworkProfile),
    Removed(NetworkProfile),
    Enabled(NetworkProfile),
    TemporarilyDisabled {
        profile: NetworkProfile,
        reason: DisableReason,
    },
    PermanentlyDisabled {
        profile: NetworkProfile,
        reason: DisableReason,
    },
    /// The table was repopulated from the store.
    Reloaded { count: usize, at: DateTime<Utc> },
}

impl ProfileEvent {
    pub fn profile(&self) -> Option<&NetworkProfile> {
        match self {
            ProfileEvent::Added(p)
            | ProfileEvent::Updated(p)
            | ProfileEvent::Removed(p)
            | ProfileEvent::Enabled(p) => Some(p),
            ProfileEvent::TemporarilyDisabled { profile, .. }
            | ProfileEvent::PermanentlyDisabled { profile, .. } => Some(profile),
            ProfileEvent::Reloaded { .. } => None,
        }
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ProfileEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: ProfileEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ProfileEvent) {
        match event {
            ProfileEvent::Added(p) => log::info!("added {} (id {})", p.key(), p.id),
            ProfileEvent::Updated(p) => log::debug!("updated {} (id {})", p.key(), p.id),
            ProfileEvent::Removed(p) => log::info!("removed {} (id {})", p.key(), p.id),
            ProfileEvent::Enabled(p) => log::debug!("enabled {}", p.key()),
            ProfileEvent::TemporarilyDisabled { profile, reason } => {
                log::info!("temporarily disabled {} ({})", profile.key(), reason);
            }
            ProfileEvent::PermanentlyDisabled { profile, reason } => {
                log::warn!("permanently disabled {} ({})", profile.key(), reason);
            }
            ProfileEvent::Reloaded { count, at } => {
                log::info!("loaded {} profiles from store at {}", count, at.to_rfc3339());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SecurityType;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle(&self, event: &ProfileEvent) {
            let label = event.profile().map(|p| p.ssid.clone()).unwrap_or_default();
            self.0.lock().unwrap().push(label);
        }
    }

    #[test]
    fn dispatches_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        let first = Arc::new(Recorder(Mutex::new(Vec::new())));
        let second = Arc::new(Recorder(Mutex::new(Vec::new())));
        dispatcher.register_handler(first.clone());
        dispatcher.register_handler(second.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(ProfileEvent::Added(NetworkProfile::new("Home", SecurityType::Psk)));
        dispatcher.dispatch(ProfileEvent::Reloaded { count: 0, at: Utc::now() });
        assert_eq!(*first.0.lock().unwrap(), vec!["Home".to_string(), String::new()]);
        assert_eq!(second.0.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.len(), 3);
    }
}
