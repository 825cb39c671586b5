use std::sync::mpsc;

/// Receives progress events from a pipeline stage.
///
/// Implementations must not block: stages emit from their hot loops and never
/// wait on the consumer.
pub trait ProgressSink<E>: Send + Sync {
    fn emit(&self, event: E);
}

/// Forwards events into an unbounded channel. Events sent after the receiver
/// is dropped are discarded.
pub struct ChannelProgressSink<E> {
    tx: mpsc::Sender<E>,
}

impl<E> ChannelProgressSink<E> {
    pub fn new(tx: mpsc::Sender<E>) -> Self {
        Self { tx }
    }
}

impl<E: Send> ProgressSink<E> for ChannelProgressSink<E> {
    fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl<E> ProgressSink<E> for NullProgressSink {
    fn emit(&self, _event: E) {}
}
