//! Live output subscribers.
//!
//! The engine produces the stream; transport and persistence belong to the
//! subscriber.

use runstep_core::events::OutputEvent;
use runstep_core::{Id, RunKey};
use tokio::sync::mpsc;

/// Receives a run step's output lines as they are produced.
pub trait OutputSink: Send + Sync {
    /// Deliver one raw output line (without its trailing newline).
    fn send(&self, invocation: &Id, run: &RunKey, line: &str);

    /// Called once after the process has exited and all lines were sent.
    fn complete(&self, _invocation: &Id, _run: &RunKey) {}
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl OutputSink for NoopSink {
    fn send(&self, _invocation: &Id, _run: &RunKey, _line: &str) {}
}

/// Forwards output as [`OutputEvent`]s over an unbounded channel.
///
/// Sends after the receiver is dropped are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn send(&self, invocation: &Id, run: &RunKey, line: &str) {
        let _ = self
            .tx
            .send(OutputEvent::line(invocation.clone(), run.clone(), line));
    }

    fn complete(&self, invocation: &Id, run: &RunKey) {
        let _ = self
            .tx
            .send(OutputEvent::complete(invocation.clone(), run.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_emits_lines_then_completion() {
        let (sink, mut rx) = ChannelSink::new();
        let id = Id::from_string("inv");
        let run = RunKey::default();

        sink.send(&id, &run, "first");
        sink.send(&id, &run, "second");
        sink.complete(&id, &run);

        let events: Vec<OutputEvent> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into();
        assert_eq!(events[0].line.as_deref(), Some("first"));
        assert_eq!(events[1].line.as_deref(), Some("second"));
        assert!(events[2].complete);
        assert!(events[2].line.is_none());
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.send(&Id::new(), &RunKey::default(), "nobody listening");
    }
}
