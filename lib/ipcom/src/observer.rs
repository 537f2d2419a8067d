use crate::net::frame::Frame;
use crate::snapshot::Snapshot;

/// Engine notifications. The set is closed: connection transitions, every
/// decoded framed reply that passed its checksum, and every accepted
/// snapshot.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session reached `Established`, or `Degraded` when the gateway
    /// negotiated non-secure mode.
    Connected { degraded: bool },
    Disconnected,
    Frame(Frame),
    Snapshot(Snapshot),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EventKind {
    Connect,
    Disconnect,
    Frame,
    Snapshot,
}

impl Event {
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connect,
            Event::Disconnected => EventKind::Disconnect,
            Event::Frame(_) => EventKind::Frame,
            Event::Snapshot(_) => EventKind::Snapshot,
        }
    }
}

/// Receives engine events. Handlers run on engine threads and must return
/// promptly: anything slow belongs on the observer's own executor, not in
/// the handler.
pub trait Observer: Send {
    fn handle(&mut self, event: &Event);
}

/// One replaceable observer slot per event kind.
pub struct ObserverSet {
    connect: Option<Box<dyn Observer>>,
    disconnect: Option<Box<dyn Observer>>,
    frame: Option<Box<dyn Observer>>,
    snapshot: Option<Box<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> ObserverSet {
        ObserverSet {
            connect: None,
            disconnect: None,
            frame: None,
            snapshot: None,
        }
    }

    /// Installs an observer for one event kind, replacing any previous one.
    pub fn set(&mut self, kind: EventKind, observer: Box<dyn Observer>) {
        *self.slot(kind) = Some(observer);
    }

    pub fn clear(&mut self, kind: EventKind) {
        *self.slot(kind) = None;
    }

    /// Routes one event to its subscription, if any.
    pub fn emit(&mut self, event: &Event) {
        if let Some(observer) = self.slot(event.kind()) {
            observer.handle(event);
        }
    }

    #[inline]
    fn slot(&mut self, kind: EventKind) -> &mut Option<Box<dyn Observer>> {
        match kind {
            EventKind::Connect => &mut self.connect,
            EventKind::Disconnect => &mut self.disconnect,
            EventKind::Frame => &mut self.frame,
            EventKind::Snapshot => &mut self.snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        hits: Arc<AtomicUsize>,
    }

    impl Observer for Counter {
        fn handle(&mut self, _event: &Event) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_events_route_by_kind() {
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));

        let mut set = ObserverSet::new();
        set.set(
            EventKind::Connect,
            Box::new(Counter {
                hits: connects.clone(),
            }),
        );
        set.set(
            EventKind::Disconnect,
            Box::new(Counter {
                hits: disconnects.clone(),
            }),
        );

        set.emit(&Event::Connected { degraded: false });
        set.emit(&Event::Connected { degraded: true });
        set.emit(&Event::Disconnected);

        assert_eq!(connects.load(Ordering::Relaxed), 2);
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_replace_and_clear() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut set = ObserverSet::new();
        set.set(
            EventKind::Disconnect,
            Box::new(Counter {
                hits: first.clone(),
            }),
        );
        set.set(
            EventKind::Disconnect,
            Box::new(Counter {
                hits: second.clone(),
            }),
        );

        set.emit(&Event::Disconnected);
        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 1);

        set.clear(EventKind::Disconnect);
        set.emit(&Event::Disconnected);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsubscribed_kind_is_ignored() {
        let mut set = ObserverSet::new();
        set.emit(&Event::Disconnected);
    }
}
