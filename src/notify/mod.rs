//! First-confirmation notifications.
//!
//! The manager is the single place where a "new object discovered" signal
//! fires. Persistence goes through a [`NotificationSink`]; in-process
//! listeners register as [`ObjectObserver`]s.

mod manager;
mod writer;

pub use manager::{ObjectNotificationManager, ObjectObserver, ObjectUpdate, ObserverList};
pub use writer::{InMemoryNotificationSink, JsonNotificationWriter, NotificationSink};
