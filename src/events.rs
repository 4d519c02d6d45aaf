//! Tree events for observers

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ident::NodePath;

/// Something that happened in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    NodeCreated {
        path: NodePath,
        depth: u32,
        timeout_secs: u64,
    },
    NodeDestroyed {
        path: NodePath,
    },
    ValidationFinished {
        path: NodePath,
        success: bool,
        tests_found: bool,
        timed_out: bool,
    },
    AttemptRecorded {
        path: NodePath,
        attempt_number: u32,
        succeeded: bool,
    },
    RetryFinished {
        path: NodePath,
        succeeded: bool,
        attempts_used: u32,
    },
}

/// Sending side handed to the tree and orchestrator
///
/// A sink without a receiver drops events silently.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TreeEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: TreeEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Receiving side for observers
#[derive(Clone)]
pub struct EventStream {
    rx: Arc<parking_lot::Mutex<mpsc::UnboundedReceiver<TreeEvent>>>,
}

impl EventStream {
    /// Create a connected stream/sink pair
    pub fn new() -> (Self, EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            rx: Arc::new(parking_lot::Mutex::new(rx)),
        };
        (stream, EventSink { tx: Some(tx) })
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<TreeEvent> {
        self.rx.lock().try_recv().ok()
    }

    /// Everything queued so far
    pub fn drain(&self) -> Vec<TreeEvent> {
        let mut guard = self.rx.lock();
        std::iter::from_fn(|| guard.try_recv().ok()).collect()
    }
}
