use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use crate::notify::writer::NotificationSink;
use crate::registry::{ObjectRegistry, TrackedObjectState};
use crate::GeoDetection;

/// In-process listener for newly confirmed objects.
pub trait ObjectObserver: Send + Sync {
    fn on_object_confirmed(&self, state: &TrackedObjectState);
}

impl<F> ObjectObserver for F
where
    F: Fn(&TrackedObjectState) + Send + Sync,
{
    fn on_object_confirmed(&self, state: &TrackedObjectState) {
        self(state)
    }
}

/// Shared, clonable list of observers.
///
/// Callbacks run on a snapshot taken under the read lock, so an observer may
/// register further observers or query whoever owns the list.
#[derive(Clone, Default)]
pub struct ObserverList {
    inner: Arc<RwLock<Vec<Arc<dyn ObjectObserver>>>>,
}

impl ObserverList {
    pub fn register(&self, observer: Box<dyn ObjectObserver>) -> Result<()> {
        self.inner
            .write()
            .map_err(|_| anyhow!("observer list lock poisoned"))?
            .push(Arc::from(observer));
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .map_err(|_| anyhow!("observer list lock poisoned"))?
            .len())
    }

    pub fn notify(&self, state: &TrackedObjectState) -> Result<()> {
        let snapshot: Vec<Arc<dyn ObjectObserver>> = self
            .inner
            .read()
            .map_err(|_| anyhow!("observer list lock poisoned"))?
            .clone();
        for observer in &snapshot {
            observer.on_object_confirmed(state);
        }
        Ok(())
    }
}

/// Registry outcome for one confirmation.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectUpdate {
    pub state: TrackedObjectState,
    /// True only for the confirmation that raised the notification.
    pub newly_notified: bool,
}

/// Routes confirmations through the registry and fires exactly one
/// notification per object identity.
pub struct ObjectNotificationManager {
    registry: ObjectRegistry,
    sink: Box<dyn NotificationSink>,
    uav_id: Option<String>,
    observers: ObserverList,
}

impl ObjectNotificationManager {
    pub fn new(
        registry: ObjectRegistry,
        sink: Box<dyn NotificationSink>,
        uav_id: Option<String>,
    ) -> Self {
        Self {
            registry,
            sink,
            uav_id,
            observers: ObserverList::default(),
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Handle to the observer list; callers holding the manager behind a lock
    /// keep a clone and call [`ObserverList::notify`] after releasing it.
    pub fn observers(&self) -> ObserverList {
        self.observers.clone()
    }

    pub fn register_observer(&self, observer: Box<dyn ObjectObserver>) -> Result<()> {
        self.observers.register(observer)
    }

    pub fn set_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sink = sink;
    }

    /// Merge `detection` into the registry and notify observers if the object is new.
    pub fn handle_confirmed_detection(&mut self, detection: &GeoDetection) -> TrackedObjectState {
        let update = self.record_confirmed_detection(detection);
        if update.newly_notified {
            if let Err(e) = self.observers.notify(&update.state) {
                log::error!("observers skipped for {}: {:#}", update.state.object_id, e);
            }
        }
        update.state
    }

    /// Merge `detection` into the registry and write the notification if the
    /// object is new. Observers are not called.
    ///
    /// A failed write is logged and the object still counts as notified.
    pub fn record_confirmed_detection(&mut self, detection: &GeoDetection) -> ObjectUpdate {
        let mut state =
            self.registry
                .create_or_update(detection, self.uav_id.as_deref(), detection.track_id);

        if state.notified {
            log::debug!(
                "Updated object {} (track={:?}) last_seen={}",
                state.object_id,
                state.track_id,
                state.last_seen.to_rfc3339()
            );
            return ObjectUpdate {
                state,
                newly_notified: false,
            };
        }

        if let Err(e) = self.sink.write_notification(&state) {
            log::error!(
                "failed to write notification for {} (class {}, conf {:.2}, lat={:.6}, lon={:.6}): {:#}",
                state.object_id,
                state.class_id,
                state.confidence,
                state.lat,
                state.lon,
                e
            );
        }
        log::info!(
            "Confirmed object {} (class {}, track {:?}, conf {:.2}) at lat={:.6}, lon={:.6}",
            state.object_id,
            state.class_id,
            state.track_id,
            state.confidence,
            state.lat,
            state.lon
        );
        self.registry.mark_notified(&state.object_id);
        state.notified = true;
        ObjectUpdate {
            state,
            newly_notified: true,
        }
    }
}
