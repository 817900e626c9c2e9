//! Terminal progress output driven by the core's event bus.

use std::io::{self, IsTerminal, Write};

use crossterm::style::Stylize;
use mason_core::{Event, EventBus, OutputSource, PostRun};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Writes one line per progress event.
pub struct Ui<W> {
    out: W,
    color: bool,
}

impl<W: Write> Ui<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    fn tag(&self, phase: &str) -> String {
        let tag = format!("[{phase}]");
        if self.color {
            tag.bold().cyan().to_string()
        } else {
            tag
        }
    }

    pub fn handle(&mut self, event: &Event) -> io::Result<()> {
        match event {
            Event::RenderPlan { phase } => {
                let tag = self.tag(phase);
                writeln!(self.out, "{tag} Rendering plan...")
            }
            Event::ApplyPlan { phase, post_run } => {
                let tag = self.tag(phase);
                let message = match post_run {
                    Some(PostRun::OnSuccess) => "Post run on success...",
                    Some(PostRun::OnFailure) => "Post run on error...",
                    _ => "Applying plan...",
                };
                writeln!(self.out, "{tag} {message}")
            }
            Event::DaggerOutput {
                source: OutputSource::Apply { phase, .. },
                output,
            } => {
                let tag = self.tag(phase);
                let heading = if self.color {
                    "Dagger output:".dim().to_string()
                } else {
                    "Dagger output:".to_owned()
                };
                writeln!(self.out, "{tag} {heading}\n{output}")
            }
            // Render output only feeds the plan; nothing to show.
            Event::DaggerOutput {
                source: OutputSource::Render,
                ..
            } => Ok(()),
        }
    }
}

/// Events the UI fell behind on are gone; say how many.
fn received(result: Result<Event, BroadcastStreamRecvError>) -> Option<Event> {
    match result {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "progress output fell behind, events were dropped");
            None
        }
    }
}

/// Print events until the bus is dropped.
///
/// With `verbosity > 0` the log lines carry the same information, so
/// events are consumed without printing.
pub fn spawn(events: &EventBus, verbosity: u8) -> JoinHandle<()> {
    let mut stream = BroadcastStream::new(events.subscribe()).filter_map(received);

    tokio::spawn(async move {
        let out: Box<dyn Write + Send> = if verbosity > 0 {
            Box::new(io::sink())
        } else {
            Box::new(io::stdout())
        };
        let mut ui = Ui::new(out, io::stdout().is_terminal());
        while let Some(event) = stream.next().await {
            if let Err(err) = ui.handle(&event) {
                tracing::warn!(error = %err, "failed to write progress");
            }
        }
    })
}
