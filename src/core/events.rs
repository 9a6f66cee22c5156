//! Build notifications
//!
//! Every build attempt is bracketed by a `PreBuild`/`PostBuild` pair, including
//! attempts that end up running no builder at all.

use std::sync::{Arc, PoisonError, RwLock};

use crate::core::trigger::BuildTrigger;

/// Build lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEvent {
    /// A build is about to start
    PreBuild(BuildTrigger),
    /// A build has finished, successfully or not
    PostBuild(BuildTrigger),
}

impl BuildEvent {
    /// Trigger of the bracketed build
    pub fn trigger(self) -> BuildTrigger {
        match self {
            Self::PreBuild(trigger) | Self::PostBuild(trigger) => trigger,
        }
    }
}

/// Receives build events
pub trait BuildListener: Send + Sync {
    /// Called synchronously on the building thread
    fn on_event(&self, event: BuildEvent);
}

impl<F> BuildListener for F
where
    F: Fn(BuildEvent) + Send + Sync,
{
    fn on_event(&self, event: BuildEvent) {
        self(event);
    }
}

/// Fan-out of build events to registered listeners
#[derive(Default)]
pub struct BuildNotifier {
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
}

impl BuildNotifier {
    /// Create a notifier without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn BuildListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Deliver an event to every listener, in registration order
    pub fn notify(&self, event: BuildEvent) {
        tracing::trace!("Build event {event:?}");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    /// Fire `PreBuild` now and `PostBuild` when the returned guard drops
    pub fn bracket(&self, trigger: BuildTrigger) -> EventBracket<'_> {
        self.notify(BuildEvent::PreBuild(trigger));
        EventBracket {
            notifier: self,
            trigger,
        }
    }
}

/// Fires `PostBuild` when dropped
pub struct EventBracket<'a> {
    notifier: &'a BuildNotifier,
    trigger: BuildTrigger,
}

impl Drop for EventBracket<'_> {
    fn drop(&mut self) {
        self.notifier.notify(BuildEvent::PostBuild(self.trigger));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_bracket_fires_pre_and_post_in_order() {
        let notifier = BuildNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.subscribe(Arc::new(move |event: BuildEvent| {
            sink.lock().unwrap().push(event);
        }));

        {
            let _bracket = notifier.bracket(BuildTrigger::Full);
            assert_eq!(seen.lock().unwrap().len(), 1);
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                BuildEvent::PreBuild(BuildTrigger::Full),
                BuildEvent::PostBuild(BuildTrigger::Full)
            ]
        );
    }
}
