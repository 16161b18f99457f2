use tokio::sync::broadcast;

use crate::model::{Booking, PersonId};
use crate::ports::{BookingNotifier, NotifyError};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Created,
    StatusChanged,
}

/// A booking change as handed to in-process subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingNotice {
    pub kind: NoticeKind,
    pub booking: Booking,
}

impl BookingNotice {
    /// People who care about this change: the requester and the owning admin.
    pub fn recipients(&self) -> [PersonId; 2] {
        [self.booking.requester_id, self.booking.owner_id]
    }
}

/// Broadcast hub for booking changes. Delivery to the outside world (mail,
/// chat) is up to whoever subscribes.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingNotice> {
        self.sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: BookingNotice) {
        let _ = self.sender.send(notice);
    }
}

impl BookingNotifier for NotifyHub {
    fn on_booking_created(&self, booking: &Booking) -> Result<(), NotifyError> {
        self.send(BookingNotice {
            kind: NoticeKind::Created,
            booking: booking.clone(),
        });
        Ok(())
    }

    fn on_booking_status_changed(&self, booking: &Booking) -> Result<(), NotifyError> {
        self.send(BookingNotice {
            kind: NoticeKind::StatusChanged,
            booking: booking.clone(),
        });
        Ok(())
    }
}

/// Forward every notice to the log until the hub goes away.
pub async fn log_notices(mut rx: broadcast::Receiver<BookingNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => tracing::info!(
                booking_id = %notice.booking.id,
                status = notice.booking.status.as_str(),
                requester_id = %notice.booking.requester_id,
                owner_id = %notice.booking.owner_id,
                "booking {:?}",
                notice.kind
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("notice log lagged, {n} notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn booking() -> Booking {
        NewBooking {
            id: Ulid::new(),
            availability_id: Ulid::new(),
            requester_id: Ulid::new(),
            owner_id: Ulid::new(),
            window: TimeWindow::new(1_000, 2_000),
            meeting_type: MeetingType::Intro,
            student_id: None,
            note: None,
            created_at: 0,
        }
        .into_pending()
    }

    #[tokio::test]
    async fn subscribers_receive_both_hooks() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let mut b = booking();

        hub.on_booking_created(&b).unwrap();
        b.status = BookingStatus::Accepted;
        hub.on_booking_status_changed(&b).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, NoticeKind::Created);
        assert_eq!(first.booking.status, BookingStatus::Pending);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, NoticeKind::StatusChanged);
        assert_eq!(second.recipients(), [b.requester_id, b.owner_id]);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber: the hook still succeeds
        assert!(hub.on_booking_created(&booking()).is_ok());
    }

    #[tokio::test]
    async fn log_task_ends_with_hub() {
        let hub = NotifyHub::new();
        let task = tokio::spawn(log_notices(hub.subscribe()));
        hub.on_booking_created(&booking()).unwrap();
        drop(hub);
        task.await.unwrap();
    }
}
