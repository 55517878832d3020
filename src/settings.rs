use anyhow::{Context, Result, bail};
use image::Rgba;
use image::imageops::FilterType;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagesurface";

/// Resampling filter used when scaling overlay bitmaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayFilter {
    /// Blocky, fastest
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    /// Sharpest, slowest
    Lanczos3,
}

impl OverlayFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayFilter::Nearest => "nearest",
            OverlayFilter::Triangle => "triangle",
            OverlayFilter::CatmullRom => "catmull_rom",
            OverlayFilter::Lanczos3 => "lanczos3",
        }
    }

    #[must_use]
    pub fn filter_type(self) -> FilterType {
        match self {
            OverlayFilter::Nearest => FilterType::Nearest,
            OverlayFilter::Triangle => FilterType::Triangle,
            OverlayFilter::CatmullRom => FilterType::CatmullRom,
            OverlayFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Page background as RRGGBB or RRGGBBAA hex
    #[serde(default = "default_background")]
    pub background: String,

    /// Signature overlay size in page units
    #[serde(default = "default_signature_width")]
    pub signature_width: f32,

    #[serde(default = "default_signature_height")]
    pub signature_height: f32,

    /// Largest single pixel buffer the surface may allocate
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Loading time before the busy indicator shows
    #[serde(default = "default_busy_delay_ms")]
    pub busy_delay_ms: u64,

    #[serde(default)]
    pub overlay_filter: OverlayFilter,

    /// Row count above which the checker renderer rasterizes in parallel
    #[serde(default = "default_parallel_row_threshold")]
    pub parallel_row_threshold: u32,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_background() -> String {
    "FFFFFF".to_string()
}

fn default_signature_width() -> f32 {
    100.0
}

fn default_signature_height() -> f32 {
    50.0
}

fn default_max_buffer_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_busy_delay_ms() -> u64 {
    200
}

fn default_parallel_row_threshold() -> u32 {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            background: default_background(),
            signature_width: default_signature_width(),
            signature_height: default_signature_height(),
            max_buffer_bytes: default_max_buffer_bytes(),
            busy_delay_ms: default_busy_delay_ms(),
            overlay_filter: OverlayFilter::default(),
            parallel_row_threshold: default_parallel_row_threshold(),
        }
    }
}

impl Settings {
    /// Parsed background colour; falls back to white on malformed input
    #[must_use]
    pub fn background_rgba(&self) -> Rgba<u8> {
        parse_hex_color(&self.background).unwrap_or_else(|| {
            warn!("Invalid background colour {:?}, using white", self.background);
            Rgba([255, 255, 255, 255])
        })
    }

    #[must_use]
    pub fn busy_delay(&self) -> Duration {
        Duration::from_millis(self.busy_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.signature_width > 0.0 && self.signature_height > 0.0) {
            bail!(
                "signature size must be positive, got {}x{}",
                self.signature_width,
                self.signature_height
            );
        }
        if self.max_buffer_bytes == 0 {
            bail!("max_buffer_bytes must be greater than zero");
        }
        if parse_hex_color(&self.background).is_none() {
            bail!("background {:?} is not an RRGGBB colour", self.background);
        }
        Ok(())
    }
}

/// Parse RRGGBB or RRGGBBAA, with or without a leading `#`
pub fn parse_hex_color(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim().trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load from `path`, migrating and rewriting older versions
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let mut settings: Settings = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        save_settings_to_file(&settings, path)?;
    }
    settings.validate()?;
    Ok(settings)
}

/// Load from an explicit path or the default config location.
///
/// A missing default file is created with defaults; a missing explicit
/// file is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit {
        return load_settings_from_path(path);
    }

    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Ok(Settings::default());
    };
    if path.exists() {
        return load_settings_from_path(&path);
    }

    info!("Settings file not found, creating with defaults at {path:?}");
    let settings = Settings::default();
    if let Err(e) = save_settings_to_file(&settings, &path) {
        warn!("Could not write default settings: {e:#}");
    }
    Ok(settings)
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        // v1 stored the delay in seconds
        if settings.busy_delay_ms < 10 {
            settings.busy_delay_ms *= 1000;
        }
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
    }

    fs::write(path, generate_settings_yaml(settings))
        .with_context(|| format!("Failed to save settings to {path:?}"))?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(SETTINGS_HEADER);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("background: \"{}\"\n", settings.background));
    content.push_str(&format!("signature_width: {}\n", settings.signature_width));
    content.push_str(&format!("signature_height: {}\n", settings.signature_height));
    content.push_str(&format!("max_buffer_bytes: {}\n", settings.max_buffer_bytes));
    content.push_str(&format!("busy_delay_ms: {}\n", settings.busy_delay_ms));
    content.push_str(&format!(
        "overlay_filter: {}\n",
        settings.overlay_filter.as_str()
    ));
    content.push_str(&format!(
        "parallel_row_threshold: {}\n",
        settings.parallel_row_threshold
    ));

    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# pagesurface settings
# ============================================================================
# background:        page background, RRGGBB or RRGGBBAA
# signature_*:       size of placed signatures in page units
# max_buffer_bytes:  largest single pixel buffer
# busy_delay_ms:     loading time before the busy indicator shows
# overlay_filter:    nearest | triangle | catmull_rom | lanczos3

"#;
