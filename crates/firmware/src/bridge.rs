//! Event bridge between the update task and the UI side

use crate::error::UpdateError;
use crate::machine::UpdatePhase;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::debug;

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 64;

/// Slots progress may never occupy, kept for phase and completion events.
/// A run emits at most six of those.
const LIFECYCLE_RESERVE: usize = 16;

/// Events published while an update runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The orchestrator entered a new phase
    PhaseChanged(UpdatePhase),
    /// Overall progress in percent
    Progress(u32),
    /// Update completed and the device is back
    Finished,
    /// Update aborted
    Failed(UpdateError),
}

/// UI-side handle
#[derive(Clone)]
pub struct UpdateMonitor {
    event_rx: Receiver<UpdateEvent>,
}

impl UpdateMonitor {
    /// Receive the next event
    pub async fn recv_event(&self) -> common::Result<UpdateEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without waiting
    pub fn try_recv_event(&self) -> Option<UpdateEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Update-task handle
///
/// Reporting never fails or blocks the update: if the monitor is gone or
/// not draining, events are dropped.
#[derive(Clone)]
pub struct UpdateReporter {
    event_tx: Sender<UpdateEvent>,
}

impl UpdateReporter {
    /// Send a phase or completion event without waiting
    ///
    /// Progress never fills the reserved slots, so these fit even when the
    /// monitor is not draining. Should the channel still be full, the oldest
    /// queued event is evicted.
    pub fn send_event(&self, event: UpdateEvent) {
        match self.event_tx.force_send(event) {
            Ok(None) => {}
            Ok(Some(evicted)) => debug!("Update event {:?} evicted, channel full", evicted),
            Err(e) => debug!("Update event dropped: {}", e),
        }
    }

    /// Report progress without waiting
    ///
    /// Safe to call from the blocking pool. Progress is dropped once only
    /// the reserved slots are left; a later value supersedes it anyway.
    pub fn progress(&self, percent: u32) {
        if self.event_tx.len() >= EVENT_CAPACITY - LIFECYCLE_RESERVE {
            debug!("Progress {}% dropped, channel full", percent);
            return;
        }
        match self.event_tx.try_send(UpdateEvent::Progress(percent)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Progress {}% dropped, channel full", percent),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Create the event bridge
///
/// Returns (UpdateMonitor for the UI side, UpdateReporter for the update task)
pub fn create_update_bridge() -> (UpdateMonitor, UpdateReporter) {
    let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
    (UpdateMonitor { event_rx }, UpdateReporter { event_tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_in_order() {
        let (monitor, reporter) = create_update_bridge();

        reporter.send_event(UpdateEvent::PhaseChanged(UpdatePhase::Flashing));
        reporter.progress(42);
        reporter.send_event(UpdateEvent::Finished);

        assert_eq!(
            monitor.recv_event().await.unwrap(),
            UpdateEvent::PhaseChanged(UpdatePhase::Flashing)
        );
        assert_eq!(monitor.recv_event().await.unwrap(), UpdateEvent::Progress(42));
        assert_eq!(monitor.recv_event().await.unwrap(), UpdateEvent::Finished);
        assert!(monitor.try_recv_event().is_none());
    }

    #[tokio::test]
    async fn test_progress_from_blocking_thread() {
        let (monitor, reporter) = create_update_bridge();

        let handle = std::thread::spawn(move || {
            for percent in [10, 20, 30] {
                reporter.progress(percent);
            }
        });
        handle.join().unwrap();

        assert_eq!(monitor.recv_event().await.unwrap(), UpdateEvent::Progress(10));
        assert_eq!(monitor.recv_event().await.unwrap(), UpdateEvent::Progress(20));
        assert_eq!(monitor.recv_event().await.unwrap(), UpdateEvent::Progress(30));
        // Reporter dropped with the thread
        assert!(monitor.recv_event().await.is_err());
    }

    #[test]
    fn test_progress_is_lossy_when_full() {
        let (monitor, reporter) = create_update_bridge();
        for percent in 0..(EVENT_CAPACITY as u32 + 10) {
            reporter.progress(percent);
        }
        let mut received = 0;
        while monitor.try_recv_event().is_some() {
            received += 1;
        }
        assert_eq!(received, EVENT_CAPACITY - LIFECYCLE_RESERVE);
    }

    #[test]
    fn test_lifecycle_events_fit_behind_progress_flood() {
        let (monitor, reporter) = create_update_bridge();
        for percent in 0..500 {
            reporter.progress(percent % 101);
        }
        for phase in [
            UpdatePhase::Flashing,
            UpdatePhase::AwaitingReboot,
            UpdatePhase::FlashingRemainder,
            UpdatePhase::Done,
        ] {
            reporter.send_event(UpdateEvent::PhaseChanged(phase));
        }
        reporter.send_event(UpdateEvent::Finished);

        let mut events = Vec::new();
        while let Some(event) = monitor.try_recv_event() {
            events.push(event);
        }
        assert_eq!(events.len(), EVENT_CAPACITY - LIFECYCLE_RESERVE + 5);
        assert_eq!(events.last(), Some(&UpdateEvent::Finished));
        assert_eq!(
            events[EVENT_CAPACITY - LIFECYCLE_RESERVE],
            UpdateEvent::PhaseChanged(UpdatePhase::Flashing)
        );
    }

    #[test]
    fn test_send_event_never_blocks_on_full_channel() {
        let (monitor, reporter) = create_update_bridge();
        for _ in 0..(EVENT_CAPACITY + 3) {
            reporter.send_event(UpdateEvent::PhaseChanged(UpdatePhase::Flashing));
        }
        reporter.send_event(UpdateEvent::Finished);

        let mut last = None;
        let mut received = 0;
        while let Some(event) = monitor.try_recv_event() {
            received += 1;
            last = Some(event);
        }
        assert_eq!(received, EVENT_CAPACITY);
        assert_eq!(last, Some(UpdateEvent::Finished));
    }

    #[test]
    fn test_reporting_without_monitor() {
        let (monitor, reporter) = create_update_bridge();
        drop(monitor);
        reporter.progress(5);
        reporter.send_event(UpdateEvent::Finished);
    }
}
