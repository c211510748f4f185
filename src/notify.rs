use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::NOTIFY_CHANNEL_CAPACITY;
use crate::model::{ChangeEvent, Table};

/// Broadcast hub for row changes, one channel per table plus a firehose.
pub struct NotifyHub {
    tables: DashMap<Table, broadcast::Sender<ChangeEvent>>,
    all: broadcast::Sender<ChangeEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            all: broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to changes of one table. Creates the channel if needed.
    pub fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .tables
            .entry(table)
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &ChangeEvent) {
        if let Some(sender) = self.tables.get(&event.table()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn venue_event() -> ChangeEvent {
        ChangeEvent::new(
            ChangeKind::Insert,
            ChangeRow::Venue(Venue {
                id: VenueId::new(),
                name: "Audio-Visual Room".into(),
            }),
        )
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Table::Venue);
        let event = venue_event();
        hub.send(&event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn table_channels_are_isolated() {
        let hub = NotifyHub::new();
        let mut reservations = hub.subscribe(Table::Reservation);
        let mut all = hub.subscribe_all();
        hub.send(&venue_event());
        assert!(reservations.try_recv().is_err());
        assert_eq!(all.recv().await.unwrap().table(), Table::Venue);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&venue_event());
    }
}
