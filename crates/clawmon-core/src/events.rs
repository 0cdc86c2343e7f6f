//! In-process publish point for new usage snapshots.

use tokio::sync::broadcast;

use crate::usage::UsageSnapshot;

/// Notification pushed to subscribers (the UI layer) by the scheduler.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A poll successfully parsed a new snapshot. Emitted exactly once per
    /// successful parse, never on a no-signal poll.
    UsageUpdated(UsageSnapshot),
}

/// Sender half of the event bus
pub type EventSender = broadcast::Sender<MonitorEvent>;
/// Receiver half of the event bus
pub type EventReceiver = broadcast::Receiver<MonitorEvent>;

/// Create the event bus channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    broadcast::channel(16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::Source;

    #[test]
    fn test_event_round_trip() {
        let (tx, mut rx) = event_channel();
        tx.send(MonitorEvent::UsageUpdated(UsageSnapshot::zero(
            Source::DirectInvoke,
        )))
        .unwrap();

        let MonitorEvent::UsageUpdated(snapshot) = rx.try_recv().unwrap();
        assert_eq!(snapshot.percentage, 0.0);
    }
}
