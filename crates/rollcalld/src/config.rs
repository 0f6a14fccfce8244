use rollcall_core::matcher::ARCFACE_MATCH_THRESHOLD;
use rollcall_core::sampler::DEFAULT_SCALE;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery file listing known people and their reference images.
    pub gallery_path: PathBuf,
    /// Directory holding one attendance CSV per day.
    pub ledger_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match. Defaults to the
    /// ArcFace operating point, since embeddings are unit length.
    pub match_threshold: f32,
    /// Linear downscale applied before perception.
    pub scale: f32,
    /// Pause between capture cycles.
    pub tick: Duration,
    /// Keep drawing the last overlay on skipped frames.
    pub hold_overlay: bool,
    /// Where to write the annotated preview frame, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall");
        let config_dir = xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall");

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir: env_path("ROLLCALL_MODEL_DIR").unwrap_or_else(|| data_dir.join("models")),
            gallery_path: env_path("ROLLCALL_GALLERY").unwrap_or_else(|| config_dir.join("gallery.toml")),
            ledger_dir: env_path("ROLLCALL_LEDGER_DIR").unwrap_or_else(|| data_dir.join("attendance")),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", ARCFACE_MATCH_THRESHOLD),
            scale: env_f32("ROLLCALL_SCALE", DEFAULT_SCALE),
            tick: Duration::from_millis(env_u64("ROLLCALL_TICK_MS", 10)),
            hold_overlay: env_bool("ROLLCALL_HOLD_OVERLAY", true),
            preview_path: env_path("ROLLCALL_PREVIEW_PATH"),
            system_bus: env_bool("ROLLCALL_SYSTEM_BUS", false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn xdg_dir(var: &str, home_fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(home_fallback)
    })
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
