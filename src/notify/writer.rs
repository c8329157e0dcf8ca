use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::TrackedObjectState;

/// Destination for first-confirmation records.
pub trait NotificationSink: Send {
    fn write_notification(&mut self, obj: &TrackedObjectState) -> Result<()>;
}

#[derive(Serialize)]
struct NotificationRecord<'a> {
    object_id: &'a str,
    track_id: Option<u64>,
    class_id: u32,
    confidence: f32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    lat: f64,
    lon: f64,
    alt: Option<f64>,
    frames: &'a [String],
    uav_id: Option<&'a str>,
}

impl<'a> From<&'a TrackedObjectState> for NotificationRecord<'a> {
    fn from(obj: &'a TrackedObjectState) -> Self {
        Self {
            object_id: &obj.object_id,
            track_id: obj.track_id,
            class_id: obj.class_id,
            confidence: obj.confidence,
            first_seen: obj.first_seen,
            last_seen: obj.last_seen,
            lat: obj.lat,
            lon: obj.lon,
            alt: obj.alt,
            frames: &obj.frames,
            uav_id: obj.uav_id.as_deref(),
        }
    }
}

/// Writes one pretty-printed JSON file per object:
/// `<base_dir>/<YYYY-MM-DD of first_seen>/<object_id>.json`.
#[derive(Clone, Debug)]
pub struct JsonNotificationWriter {
    base_dir: PathBuf,
}

impl JsonNotificationWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, obj: &TrackedObjectState) -> PathBuf {
        self.base_dir
            .join(obj.first_seen.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", obj.object_id))
    }

    /// Write the record and return its path.
    pub fn write(&self, obj: &TrackedObjectState) -> Result<PathBuf> {
        let path = self.path_for(obj);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create notification dir {}", dir.display()))?;
        }
        let body = serde_json::to_string_pretty(&NotificationRecord::from(obj))?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write notification {}", path.display()))?;
        Ok(path)
    }
}

impl NotificationSink for JsonNotificationWriter {
    fn write_notification(&mut self, obj: &TrackedObjectState) -> Result<()> {
        let path = self.write(obj)?;
        log::debug!("notification for {} written to {}", obj.object_id, path.display());
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNotificationSink {
    records: Arc<Mutex<Vec<TrackedObjectState>>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Result<Vec<TrackedObjectState>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("notification buffer lock poisoned"))?;
        Ok(records.clone())
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn write_notification(&mut self, obj: &TrackedObjectState) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("notification buffer lock poisoned"))?
            .push(obj.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn object() -> TrackedObjectState {
        let ts = Utc.with_ymd_and_hms(2024, 7, 1, 12, 30, 0).unwrap();
        TrackedObjectState {
            object_id: "obj_000004".to_string(),
            track_id: Some(9),
            class_id: 1,
            confidence: 0.75,
            lat: 55.0,
            lon: 37.0,
            alt: Some(100.0),
            first_seen: ts,
            last_seen: ts,
            frames: vec!["f1".to_string(), "f2".to_string()],
            uav_id: Some("uav-7".to_string()),
            notified: false,
        }
    }

    #[test]
    fn writes_dated_file_named_by_object() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = JsonNotificationWriter::new(dir.path());
        let path = writer.write(&object())?;
        assert_eq!(path, dir.path().join("2024-07-01").join("obj_000004.json"));

        let body: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(body["object_id"], "obj_000004");
        assert_eq!(body["track_id"], 9);
        assert_eq!(body["class_id"], 1);
        assert_eq!(body["frames"], serde_json::json!(["f1", "f2"]));
        assert_eq!(body["uav_id"], "uav-7");
        assert_eq!(body["alt"], 100.0);
        assert!(body["first_seen"].as_str().unwrap_or("").starts_with("2024-07-01T12:30:00"));
        assert!(body.get("notified").is_none());
        Ok(())
    }

    #[test]
    fn distinct_objects_get_distinct_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = JsonNotificationWriter::new(dir.path());
        let a = object();
        let mut b = object();
        b.object_id = "obj_000005".to_string();
        writer.write_notification(&a)?;
        writer.write_notification(&b)?;
        let count = std::fs::read_dir(dir.path().join("2024-07-01"))?.count();
        assert_eq!(count, 2);
        Ok(())
    }

    #[test]
    fn unwritable_base_dir_is_an_error() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let writer = JsonNotificationWriter::new(file.path());
        assert!(writer.write(&object()).is_err());
        Ok(())
    }

    #[test]
    fn in_memory_clones_share_records() -> Result<()> {
        let sink = InMemoryNotificationSink::new();
        let mut handle = sink.clone();
        handle.write_notification(&object())?;
        assert_eq!(sink.records()?.len(), 1);
        Ok(())
    }
}
