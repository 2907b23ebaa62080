use std::sync::Arc;

/// Callback through which a running component reports to its owner.
///
/// The owner decides how events are tagged and queued; components only call it.
pub type EventSink<E> = Arc<dyn Fn(E) + Send + Sync>;

#[cfg(test)]
pub(crate) fn channel_sink<E: Send + 'static>() -> (EventSink<E>, tokio::sync::mpsc::UnboundedReceiver<E>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let sink: EventSink<E> = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, rx)
}
