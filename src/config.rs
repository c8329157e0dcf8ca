use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::aggregate::AggregatorParams;
use crate::camera::CameraParams;
use crate::track::TrackerParams;

pub const SETTINGS_ENV: &str = "FIRE_UAV_SETTINGS";
const ENV_PREFIX: &str = "FIRE_";

const DEFAULT_NOTIFICATIONS_DIR: &str = "data/notifications";
const DEFAULT_REGISTRY_RADIUS_M: f64 = 15.0;
const DEFAULT_GROUND_HOST: &str = "127.0.0.1";
const DEFAULT_GROUND_PORT: u16 = 9000;
const DEFAULT_GROUND_TIMEOUT_S: f64 = 3.0;
const DEFAULT_VISUALIZER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8765";

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    agg_window: Option<usize>,
    agg_votes_required: Option<usize>,
    agg_min_confidence: Option<f32>,
    agg_max_distance_m: Option<f64>,
    agg_ttl_seconds: Option<f64>,
    bbox_smooth_alpha: Option<f64>,
    track_iou_threshold: Option<f64>,
    track_max_center_distance_px: Option<f64>,
    track_max_age_seconds: Option<f64>,
    track_min_hits: Option<u32>,
    track_max_missed: Option<u32>,
    registry_match_radius_m: Option<f64>,
    registry_max_age_seconds: Option<f64>,
    notifications_dir: Option<PathBuf>,
    uav_id: Option<String>,
    use_accelerated_core: Option<bool>,
    camera_sensor_width_mm: Option<f64>,
    camera_focal_length_mm: Option<f64>,
    camera_resolution_px: Option<u32>,
    ground_station_enabled: Option<bool>,
    ground_station_host: Option<String>,
    ground_station_port: Option<u16>,
    ground_station_udp: Option<bool>,
    ground_station_timeout_seconds: Option<f64>,
    visualizer_enabled: Option<bool>,
    visualizer_url: Option<String>,
    api_addr: Option<String>,
    api_token_path: Option<PathBuf>,
}

/// Runtime configuration, built once and handed to each component.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub aggregator: AggregatorParams,
    pub tracker: TrackerParams,
    pub camera: CameraParams,
    pub registry: RegistrySettings,
    pub notifications_dir: PathBuf,
    pub uav_id: Option<String>,
    pub use_accelerated_core: bool,
    pub ground_station: GroundStationSettings,
    pub visualizer: VisualizerSettings,
    pub api_addr: String,
    pub api_token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub match_radius_m: f64,
    /// Idle eviction; `None` keeps objects for the whole process lifetime.
    pub max_age_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GroundStationSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub udp: bool,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct VisualizerSettings {
    pub enabled: bool,
    pub url: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::from_file(FusionConfigFile::default())
    }
}

impl FusionConfig {
    /// Load from the file named by `FIRE_UAV_SETTINGS` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(SETTINGS_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FusionConfigFile) -> Self {
        let agg = AggregatorParams::default();
        let trk = TrackerParams::default();
        let cam = CameraParams::default();
        Self {
            aggregator: AggregatorParams {
                window: file.agg_window.unwrap_or(agg.window),
                votes_required: file.agg_votes_required.unwrap_or(agg.votes_required),
                min_confidence: file.agg_min_confidence.unwrap_or(agg.min_confidence),
                max_distance_m: file.agg_max_distance_m.unwrap_or(agg.max_distance_m),
                ttl_seconds: file.agg_ttl_seconds.unwrap_or(agg.ttl_seconds),
            },
            tracker: TrackerParams {
                alpha: file.bbox_smooth_alpha.unwrap_or(trk.alpha),
                max_center_distance_px: file
                    .track_max_center_distance_px
                    .unwrap_or(trk.max_center_distance_px),
                iou_threshold: file.track_iou_threshold.unwrap_or(trk.iou_threshold),
                max_age_seconds: file.track_max_age_seconds.unwrap_or(trk.max_age_seconds),
                min_hits: file.track_min_hits.unwrap_or(trk.min_hits),
                max_missed: file.track_max_missed.unwrap_or(trk.max_missed),
            },
            camera: CameraParams {
                sensor_width_mm: file.camera_sensor_width_mm.unwrap_or(cam.sensor_width_mm),
                focal_length_mm: file.camera_focal_length_mm.unwrap_or(cam.focal_length_mm),
                resolution_px: file.camera_resolution_px.unwrap_or(cam.resolution_px),
            },
            registry: RegistrySettings {
                match_radius_m: file
                    .registry_match_radius_m
                    .unwrap_or(DEFAULT_REGISTRY_RADIUS_M),
                max_age_seconds: file.registry_max_age_seconds,
            },
            notifications_dir: file
                .notifications_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NOTIFICATIONS_DIR)),
            uav_id: file.uav_id,
            use_accelerated_core: file.use_accelerated_core.unwrap_or(false),
            ground_station: GroundStationSettings {
                enabled: file.ground_station_enabled.unwrap_or(false),
                host: file
                    .ground_station_host
                    .unwrap_or_else(|| DEFAULT_GROUND_HOST.to_string()),
                port: file.ground_station_port.unwrap_or(DEFAULT_GROUND_PORT),
                udp: file.ground_station_udp.unwrap_or(false),
                timeout_seconds: file
                    .ground_station_timeout_seconds
                    .unwrap_or(DEFAULT_GROUND_TIMEOUT_S),
            },
            visualizer: VisualizerSettings {
                enabled: file.visualizer_enabled.unwrap_or(false),
                url: file
                    .visualizer_url
                    .unwrap_or_else(|| DEFAULT_VISUALIZER_URL.to_string()),
            },
            api_addr: file
                .api_addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            api_token_path: file.api_token_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        override_parsed("agg_window", &mut self.aggregator.window)?;
        override_parsed("agg_votes_required", &mut self.aggregator.votes_required)?;
        override_parsed("agg_min_confidence", &mut self.aggregator.min_confidence)?;
        override_parsed("agg_max_distance_m", &mut self.aggregator.max_distance_m)?;
        override_parsed("agg_ttl_seconds", &mut self.aggregator.ttl_seconds)?;

        override_parsed("bbox_smooth_alpha", &mut self.tracker.alpha)?;
        override_parsed("track_iou_threshold", &mut self.tracker.iou_threshold)?;
        override_parsed(
            "track_max_center_distance_px",
            &mut self.tracker.max_center_distance_px,
        )?;
        override_parsed("track_max_age_seconds", &mut self.tracker.max_age_seconds)?;
        override_parsed("track_min_hits", &mut self.tracker.min_hits)?;
        override_parsed("track_max_missed", &mut self.tracker.max_missed)?;

        override_parsed("registry_match_radius_m", &mut self.registry.match_radius_m)?;
        if let Some(secs) = env_parsed::<f64>("registry_max_age_seconds")? {
            self.registry.max_age_seconds = Some(secs);
        }

        if let Some(dir) = env_value("notifications_dir") {
            self.notifications_dir = PathBuf::from(dir);
        }
        if let Some(uav_id) = env_value("uav_id") {
            self.uav_id = Some(uav_id);
        }
        override_bool("use_accelerated_core", &mut self.use_accelerated_core)?;

        override_parsed("camera_sensor_width_mm", &mut self.camera.sensor_width_mm)?;
        override_parsed("camera_focal_length_mm", &mut self.camera.focal_length_mm)?;
        override_parsed("camera_resolution_px", &mut self.camera.resolution_px)?;

        override_bool("ground_station_enabled", &mut self.ground_station.enabled)?;
        if let Some(host) = env_value("ground_station_host") {
            self.ground_station.host = host;
        }
        override_parsed("ground_station_port", &mut self.ground_station.port)?;
        override_bool("ground_station_udp", &mut self.ground_station.udp)?;
        override_parsed(
            "ground_station_timeout_seconds",
            &mut self.ground_station.timeout_seconds,
        )?;

        override_bool("visualizer_enabled", &mut self.visualizer.enabled)?;
        if let Some(url) = env_value("visualizer_url") {
            self.visualizer.url = url;
        }

        if let Some(addr) = env_value("api_addr") {
            self.api_addr = addr;
        }
        if let Some(path) = env_value("api_token_path") {
            self.api_token_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let agg = &self.aggregator;
        if agg.window == 0 {
            return Err(anyhow!("agg_window must be at least 1"));
        }
        if agg.votes_required == 0 {
            return Err(anyhow!("agg_votes_required must be at least 1"));
        }
        check_unit("agg_min_confidence", agg.min_confidence as f64)?;
        check_positive("agg_max_distance_m", agg.max_distance_m)?;
        check_positive("agg_ttl_seconds", agg.ttl_seconds)?;

        let trk = &self.tracker;
        if !(trk.alpha > 0.0 && trk.alpha <= 1.0) {
            return Err(anyhow!("bbox_smooth_alpha must be in (0, 1], got {}", trk.alpha));
        }
        check_unit("track_iou_threshold", trk.iou_threshold)?;
        check_positive("track_max_center_distance_px", trk.max_center_distance_px)?;
        check_positive("track_max_age_seconds", trk.max_age_seconds)?;

        check_positive("registry_match_radius_m", self.registry.match_radius_m)?;
        if let Some(age) = self.registry.max_age_seconds {
            check_positive("registry_max_age_seconds", age)?;
        }

        let cam = &self.camera;
        check_positive("camera_sensor_width_mm", cam.sensor_width_mm)?;
        check_positive("camera_focal_length_mm", cam.focal_length_mm)?;
        if cam.resolution_px == 0 {
            return Err(anyhow!("camera_resolution_px must be greater than zero"));
        }

        if self.ground_station.enabled {
            if self.ground_station.port == 0 {
                return Err(anyhow!("ground_station_port must be non-zero when enabled"));
            }
            if self.ground_station.host.trim().is_empty() {
                return Err(anyhow!("ground_station_host must not be empty when enabled"));
            }
            check_positive(
                "ground_station_timeout_seconds",
                self.ground_station.timeout_seconds,
            )?;
        }
        if self.visualizer.enabled && self.visualizer.url.trim().is_empty() {
            return Err(anyhow!("visualizer_url must not be empty when enabled"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be in [0, 1], got {}", name, value));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(anyhow!("{} must be a positive number, got {}", name, value));
    }
    Ok(())
}

fn env_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.to_uppercase())
}

/// Non-empty value of `FIRE_<KEY>`.
fn env_value(key: &str) -> Option<String> {
    std::env::var(env_name(key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_value(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", env_name(key), raw)),
        None => Ok(None),
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T) -> Result<()> {
    if let Some(value) = env_parsed(key)? {
        *slot = value;
    }
    Ok(())
}

fn override_bool(key: &str, slot: &mut bool) -> Result<()> {
    let Some(raw) = env_value(key) else {
        return Ok(());
    };
    *slot = match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            return Err(anyhow!(
                "{} must be a boolean (true/false), got '{}'",
                env_name(key),
                raw
            ))
        }
    };
    Ok(())
}

fn read_config_file(path: &Path) -> Result<FusionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
