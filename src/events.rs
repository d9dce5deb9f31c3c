//! Structured lifecycle events.

use crate::error::MicroAppError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Which half of the load barrier completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Links,
    Scripts,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Loading { app: String, url: String },
    PhaseComplete { app: String, phase: LoadPhase },
    Mounted { app: String },
    Unmounted { app: String, destroyed: bool },
    LoadFailed { app: String, error: MicroAppError },
}

impl LifecycleEvent {
    pub fn app(&self) -> &str {
        match self {
            LifecycleEvent::Loading { app, .. }
            | LifecycleEvent::PhaseComplete { app, .. }
            | LifecycleEvent::Mounted { app }
            | LifecycleEvent::Unmounted { app, .. }
            | LifecycleEvent::LoadFailed { app, .. } => app,
        }
    }
}

/// Fan-out point for lifecycle events. Without subscribers, events are
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    subscribers: std::rc::Rc<std::cell::RefCell<Vec<UnboundedSender<LifecycleEvent>>>>,
}

impl EventSink {
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn emit(&self, event: LifecycleEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
