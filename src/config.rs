use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control::Pacing;
use crate::sensor::{SensorTiming, DEFAULT_THRESHOLD_M};
use crate::state::DEFAULT_PLACEHOLDER_IMAGE;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SENSOR_BACKEND: &str = "stub://random";
const DEFAULT_TRIGGER_PIN: u8 = 11;
const DEFAULT_ECHO_PIN: u8 = 8;
const DEFAULT_ECHO_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_SENSOR_SETTLE_MS: u64 = 100;
const DEFAULT_SIMULATED_MAX_M: f64 = 5.0;
const DEFAULT_CAMERA_BACKEND: &str = "stub://fixtures";
const DEFAULT_IMAGE_DIR: &str = "images";
const DEFAULT_IMAGE_URL_PREFIX: &str = "/images";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_SERVO_BACKEND: &str = "stub://servo";
const DEFAULT_SERVO_PIN: u8 = 17;
const DEFAULT_SERVO_FREQUENCY_HZ: f64 = 50.0;
const DEFAULT_SERVO_SETTLE_MS: u64 = 1_000;
const MIN_SERVO_SETTLE_MS: u64 = 500;
const DEFAULT_RECOGNIZE_MS: u64 = 4_000;
const DEFAULT_LOOKUP_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    api: Option<ApiConfigFile>,
    sensor: Option<SensorConfigFile>,
    camera: Option<CameraConfigFile>,
    servo: Option<ServoConfigFile>,
    pacing: Option<PacingConfigFile>,
    plates: Option<PlatesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    backend: Option<String>,
    trigger_pin: Option<u8>,
    echo_pin: Option<u8>,
    threshold_m: Option<f64>,
    echo_timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    simulated_max_m: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backend: Option<String>,
    image_dir: Option<PathBuf>,
    url_prefix: Option<String>,
    placeholder_image: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ServoConfigFile {
    backend: Option<String>,
    pin: Option<u8>,
    frequency_hz: Option<f64>,
    settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PacingConfigFile {
    wait_ms: Option<u64>,
    stopped_ms: Option<u64>,
    capture_settle_ms: Option<u64>,
    process_settle_ms: Option<u64>,
    hold_open_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlatesConfigFile {
    fixtures_path: Option<PathBuf>,
    db_path: Option<String>,
    recognize_ms: Option<u64>,
    lookup_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub api_addr: String,
    pub sensor: SensorSettings,
    pub camera: CameraSettings,
    pub servo: ServoSettings,
    pub pacing: Pacing,
    pub plates: PlateSettings,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    /// `stub://...` or a hardware identifier (e.g. "gpio").
    pub backend: String,
    pub trigger_pin: u8,
    pub echo_pin: u8,
    pub threshold_m: f64,
    pub echo_timeout: Duration,
    pub settle: Duration,
    /// Upper bound of simulated readings.
    pub simulated_max_m: f64,
}

impl SensorSettings {
    pub fn timing(&self) -> SensorTiming {
        SensorTiming {
            settle: self.settle,
            echo_timeout: self.echo_timeout,
            ..SensorTiming::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `stub://...`, `file://<fixture image dir>`, or a V4L2 device path
    /// (e.g. "/dev/video0").
    pub backend: String,
    /// Where captures are written and served from.
    pub image_dir: PathBuf,
    /// URL prefix the dashboard uses for files in `image_dir`.
    pub url_prefix: String,
    pub placeholder_image: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ServoSettings {
    pub backend: String,
    pub pin: u8,
    pub frequency_hz: f64,
    pub settle: Duration,
}

#[derive(Debug, Clone)]
pub struct PlateSettings {
    pub fixtures_path: Option<PathBuf>,
    /// SQLite known-plate table; the fixture known set is used when unset.
    pub db_path: Option<String>,
    pub recognize_delay: Duration,
    pub lookup_delay: Duration,
}

impl GateConfig {
    /// Load from `GATE_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GATE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
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

    fn from_file(file: GateConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let sensor = file.sensor.unwrap_or_default();
        let sensor = SensorSettings {
            backend: sensor
                .backend
                .unwrap_or_else(|| DEFAULT_SENSOR_BACKEND.to_string()),
            trigger_pin: sensor.trigger_pin.unwrap_or(DEFAULT_TRIGGER_PIN),
            echo_pin: sensor.echo_pin.unwrap_or(DEFAULT_ECHO_PIN),
            threshold_m: sensor.threshold_m.unwrap_or(DEFAULT_THRESHOLD_M),
            echo_timeout: Duration::from_millis(
                sensor.echo_timeout_ms.unwrap_or(DEFAULT_ECHO_TIMEOUT_MS),
            ),
            settle: Duration::from_millis(sensor.settle_ms.unwrap_or(DEFAULT_SENSOR_SETTLE_MS)),
            simulated_max_m: sensor.simulated_max_m.unwrap_or(DEFAULT_SIMULATED_MAX_M),
        };

        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            backend: camera
                .backend
                .unwrap_or_else(|| DEFAULT_CAMERA_BACKEND.to_string()),
            image_dir: camera
                .image_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            url_prefix: camera
                .url_prefix
                .unwrap_or_else(|| DEFAULT_IMAGE_URL_PREFIX.to_string()),
            placeholder_image: camera
                .placeholder_image
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER_IMAGE.to_string()),
            width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let servo = file.servo.unwrap_or_default();
        let servo = ServoSettings {
            backend: servo
                .backend
                .unwrap_or_else(|| DEFAULT_SERVO_BACKEND.to_string()),
            pin: servo.pin.unwrap_or(DEFAULT_SERVO_PIN),
            frequency_hz: servo.frequency_hz.unwrap_or(DEFAULT_SERVO_FREQUENCY_HZ),
            settle: Duration::from_millis(servo.settle_ms.unwrap_or(DEFAULT_SERVO_SETTLE_MS)),
        };

        let defaults = Pacing::default();
        let pacing = file.pacing.unwrap_or_default();
        let pacing = Pacing {
            wait: millis_or(pacing.wait_ms, defaults.wait),
            stopped: millis_or(pacing.stopped_ms, defaults.stopped),
            capture_settle: millis_or(pacing.capture_settle_ms, defaults.capture_settle),
            process_settle: millis_or(pacing.process_settle_ms, defaults.process_settle),
            hold_open: millis_or(pacing.hold_open_ms, defaults.hold_open),
        };

        let plates = file.plates.unwrap_or_default();
        let plates = PlateSettings {
            fixtures_path: plates.fixtures_path,
            db_path: plates.db_path,
            recognize_delay: Duration::from_millis(
                plates.recognize_ms.unwrap_or(DEFAULT_RECOGNIZE_MS),
            ),
            lookup_delay: Duration::from_millis(plates.lookup_ms.unwrap_or(DEFAULT_LOOKUP_MS)),
        };

        Self {
            api_addr,
            sensor,
            camera,
            servo,
            pacing,
            plates,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("GATE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = non_empty_env("GATE_IMAGE_DIR") {
            self.camera.image_dir = PathBuf::from(dir);
        }
        if let Some(backend) = non_empty_env("GATE_SENSOR") {
            self.sensor.backend = backend;
        }
        if let Some(backend) = non_empty_env("GATE_CAMERA") {
            self.camera.backend = backend;
        }
        if let Some(backend) = non_empty_env("GATE_SERVO") {
            self.servo.backend = backend;
        }
        if let Some(threshold) = non_empty_env("GATE_THRESHOLD_M") {
            self.sensor.threshold_m = threshold
                .parse()
                .map_err(|_| anyhow!("GATE_THRESHOLD_M must be a distance in meters"))?;
        }
        if let Some(path) = non_empty_env("GATE_FIXTURES") {
            self.plates.fixtures_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("GATE_PLATE_DB") {
            self.plates.db_path = Some(path);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;

        if !(self.sensor.threshold_m > 0.0) {
            return Err(anyhow!("sensor threshold must be greater than zero"));
        }
        if self.sensor.echo_timeout.is_zero() {
            return Err(anyhow!("sensor echo timeout must be greater than zero"));
        }
        if !(self.sensor.simulated_max_m > 0.0) {
            return Err(anyhow!("simulated sensor range must be greater than zero"));
        }
        if !(self.servo.frequency_hz > 0.0) {
            return Err(anyhow!("servo frequency must be greater than zero"));
        }
        if self.servo.settle < Duration::from_millis(MIN_SERVO_SETTLE_MS) {
            return Err(anyhow!(
                "servo settle time must be at least {} ms",
                MIN_SERVO_SETTLE_MS
            ));
        }
        if !self.camera.url_prefix.starts_with('/') {
            return Err(anyhow!("camera url_prefix must start with '/'"));
        }
        self.camera.url_prefix = self.camera.url_prefix.trim_end_matches('/').to_string();
        if self.camera.url_prefix.is_empty() {
            return Err(anyhow!("camera url_prefix must not be the site root"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}
