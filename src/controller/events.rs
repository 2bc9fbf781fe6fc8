//! Capture events and the per-channel subscriber registry.
//!
//! Fan-out is an explicit registry: each channel holds an ordered list of
//! subscriber senders and dispatch walks that list synchronously, so the
//! per-channel ordering guarantees stay auditable. Emission happens only on
//! the controller's event loop; the registry lock is never held across an
//! await point.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::capture::{AudioChunk, LogRecord};

/// Event channels exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Raw audio deliveries.
    Data,
    /// Capture confirmed running.
    Started,
    /// Session ended cleanly.
    Stopped,
    /// Session ended abnormally.
    Error,
    /// Permission denial detected in diagnostic output.
    PermissionRequired,
    /// Decoded (or fallback) status records.
    Log,
}

/// Events emitted by a capture session.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// One raw audio delivery, in read order.
    Data(AudioChunk),
    /// First `stream_start` record observed.
    Started,
    /// Process exited cleanly.
    Stopped,
    /// Session failed; payload describes the failure.
    Error(String),
    /// Diagnostic text matched known permission-denial phrasing.
    PermissionRequired,
    /// One status record, in line order.
    Log(LogRecord),
}

impl CaptureEvent {
    /// Channel this event is dispatched on.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Data(_) => Channel::Data,
            Self::Started => Channel::Started,
            Self::Stopped => Channel::Stopped,
            Self::Error(_) => Channel::Error,
            Self::PermissionRequired => Channel::PermissionRequired,
            Self::Log(_) => Channel::Log,
        }
    }
}

/// All channels, used by [`EventBus::subscribe_all`].
const ALL_CHANNELS: [Channel; 6] = [
    Channel::Data,
    Channel::Started,
    Channel::Stopped,
    Channel::Error,
    Channel::PermissionRequired,
    Channel::Log,
];

/// Per-channel subscriber registry with in-order dispatch.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<Channel, Vec<UnboundedSender<CaptureEvent>>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one channel.
    ///
    /// Events are delivered in emission order. Dropping the receiver
    /// unsubscribes on the next dispatch.
    pub fn subscribe(&self, channel: Channel) -> UnboundedReceiver<CaptureEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(channel).or_default().push(tx);
        rx
    }

    /// Subscribe one receiver to every channel.
    ///
    /// The receiver observes the controller's global emission order, which
    /// is useful for recording a full session trace.
    pub fn subscribe_all(&self) -> UnboundedReceiver<CaptureEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        for channel in ALL_CHANNELS {
            subscribers.entry(channel).or_default().push(tx.clone());
        }
        rx
    }

    /// Subscribe to one channel as a `Stream`.
    pub fn subscribe_stream(&self, channel: Channel) -> UnboundedReceiverStream<CaptureEvent> {
        UnboundedReceiverStream::new(self.subscribe(channel))
    }

    /// Dispatch an event to its channel's subscribers, in subscription
    /// order. Subscribers whose receiver is gone are pruned.
    pub fn emit(&self, event: CaptureEvent) {
        let mut subscribers = self.lock();
        if let Some(list) = subscribers.get_mut(&event.channel()) {
            list.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Channel, Vec<UnboundedSender<CaptureEvent>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_route_to_their_channel() {
        let bus = EventBus::new();
        let mut started = bus.subscribe(Channel::Started);
        let mut data = bus.subscribe(Channel::Data);

        bus.emit(CaptureEvent::Started);
        bus.emit(CaptureEvent::Data(AudioChunk::new(vec![1, 2])));

        assert!(matches!(started.try_recv().unwrap(), CaptureEvent::Started));
        assert!(matches!(data.try_recv().unwrap(), CaptureEvent::Data(_)));
        assert!(started.try_recv().is_err());
    }

    #[test]
    fn per_channel_order_is_emission_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Channel::Data);

        for i in 0..4u8 {
            bus.emit(CaptureEvent::Data(AudioChunk::new(vec![i])));
        }

        for i in 0..4u8 {
            match rx.try_recv().unwrap() {
                CaptureEvent::Data(chunk) => assert_eq!(chunk.as_bytes(), &[i]),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn subscribe_all_sees_every_channel() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.emit(CaptureEvent::Started);
        bus.emit(CaptureEvent::Data(AudioChunk::new(vec![0])));
        bus.emit(CaptureEvent::Stopped);

        assert!(matches!(rx.try_recv().unwrap(), CaptureEvent::Started));
        assert!(matches!(rx.try_recv().unwrap(), CaptureEvent::Data(_)));
        assert!(matches!(rx.try_recv().unwrap(), CaptureEvent::Stopped));
    }

    #[tokio::test]
    async fn stream_subscription_yields_events() {
        use futures_util::StreamExt;

        let bus = EventBus::new();
        let mut stream = bus.subscribe_stream(Channel::Stopped);

        bus.emit(CaptureEvent::Stopped);
        assert!(matches!(stream.next().await, Some(CaptureEvent::Stopped)));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Channel::Log);
        drop(rx);

        bus.emit(CaptureEvent::Log(crate::capture::LogRecord::unparsed("x")));
        assert!(bus.lock().get(&Channel::Log).unwrap().is_empty());
    }
}
