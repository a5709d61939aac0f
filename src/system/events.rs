//! Event bus for the water tracker
//! Type-safe publish/subscribe over an embassy `PubSubChannel`

use crate::types::{IntakeSnapshot, Reading};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    pubsub::{PubSubChannel, Subscriber, WaitResult},
};
use log::debug;

const EVENT_CAPACITY: usize = 32;
const MAX_SUBSCRIBERS: usize = 4;
const MAX_PUBLISHERS: usize = 1;

/// Outbound notifications for the UI and notification layers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Volume jumped by more than the refill threshold outside refill mode.
    RefillAlert,
    /// Intake was recorded; `hour` is the local hour of day it happened in.
    IntakeOccurred { hour: u32 },
    IntakeChanged(IntakeSnapshot),
    ConnectionChanged(bool),
    Telemetry(Reading),
}

/// Inbound actions from the UI and app lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    AddManual(f64),
    AddGlasses(f64),
    ToggleRefill,
    ResetDaily,
    ConfirmRefill,
    Calibrate,
    Calculate,
    StartScanning,
    EnterForeground,
    EnterBackground,
}

type TrackerChannel =
    PubSubChannel<CriticalSectionRawMutex, TrackerEvent, EVENT_CAPACITY, MAX_SUBSCRIBERS, MAX_PUBLISHERS>;

pub struct EventBus {
    channel: TrackerChannel,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channel: PubSubChannel::new(),
        }
    }

    /// Publish without waiting. Subscribers that fall behind skip the oldest events.
    pub fn publish(&self, event: TrackerEvent) {
        debug!("📡 Publishing: {:?}", event);
        self.channel.immediate_publisher().publish_immediate(event);
    }

    /// `None` once every subscriber slot is taken.
    pub fn subscriber(&self) -> Option<EventSubscriber<'_>> {
        self.channel
            .subscriber()
            .ok()
            .map(|inner| EventSubscriber { inner })
    }
}

pub struct EventSubscriber<'a> {
    inner: Subscriber<'a, CriticalSectionRawMutex, TrackerEvent, EVENT_CAPACITY, MAX_SUBSCRIBERS, MAX_PUBLISHERS>,
}

impl<'a> EventSubscriber<'a> {
    pub async fn next_event(&mut self) -> TrackerEvent {
        loop {
            match self.inner.next_message().await {
                WaitResult::Lagged(count) => {
                    debug!("Event subscriber lagged by {} events", count);
                    continue;
                }
                WaitResult::Message(event) => return event,
            }
        }
    }

    pub fn try_next_event(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.inner.try_next_message()? {
                WaitResult::Lagged(_) => continue,
                WaitResult::Message(event) => return Some(event),
            }
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<TrackerEvent> {
        std::iter::from_fn(|| self.try_next_event()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscriber().unwrap();
        let mut second = bus.subscriber().unwrap();

        bus.publish(TrackerEvent::RefillAlert);
        bus.publish(TrackerEvent::ConnectionChanged(true));

        assert_eq!(
            first.drain(),
            vec![TrackerEvent::RefillAlert, TrackerEvent::ConnectionChanged(true)]
        );
        assert_eq!(
            embassy_futures::block_on(second.next_event()),
            TrackerEvent::RefillAlert
        );
    }

    #[test]
    fn test_lagging_subscriber_skips_ahead() {
        let bus = EventBus::new();
        let mut subscriber = bus.subscriber().unwrap();

        for hour in 0..(EVENT_CAPACITY as u32 + 3) {
            bus.publish(TrackerEvent::IntakeOccurred { hour });
        }

        let events = subscriber.drain();
        assert_eq!(events.len(), EVENT_CAPACITY);
        assert_eq!(events[0], TrackerEvent::IntakeOccurred { hour: 3 });
    }

    #[test]
    fn test_subscriber_slots_are_bounded() {
        let bus = EventBus::new();
        let _held: Vec<_> = (0..MAX_SUBSCRIBERS).filter_map(|_| bus.subscriber()).collect();
        assert!(bus.subscriber().is_none());
    }
}
