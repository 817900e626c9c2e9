//! Progress events published while rendering and applying plans.
//!
//! The bus is a broadcast channel owned by the top-level [`crate::Mason`].
//! Publishing never waits on subscribers; a subscriber that falls behind
//! loses the oldest events rather than stalling the run.

use tokio::sync::broadcast;

use crate::fragment::PostRun;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Which step produced a chunk of Dagger output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSource {
    /// The render-plan script run by a blueprint.
    Render,
    /// A plan script. `post_run` is `None` for the main script.
    Apply {
        phase: String,
        post_run: Option<PostRun>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A phase is about to render its plan.
    RenderPlan { phase: String },
    /// A plan script is about to run.
    ApplyPlan {
        phase: String,
        post_run: Option<PostRun>,
    },
    /// Dagger printed something on stdout.
    DaggerOutput { source: OutputSource, output: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // No subscriber is not an error: events are advisory.
        if self.tx.send(event).is_err() {
            tracing::trace!("event published without subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
