use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::graphics::ddraw::{ColorDepth, DisplayMode};
use crate::logging::LogLevel;

/// Display options that can be set via CLI or config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfxOptions {
    pub resolution: Resolution,
    /// Virtual screen size; `None` means the same as `resolution`
    pub virtual_resolution: Option<Resolution>,
    pub color_depth: ColorDepth,
    pub display_mode: DisplayMode,
    /// Wait for the vertical blank before palette updates
    pub vsync: bool,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for GfxOptions {
    fn default() -> Self {
        Self {
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            virtual_resolution: None,
            color_depth: ColorDepth::Indexed8,
            display_mode: DisplayMode::Fullscreen,
            vsync: true,
            log_level: LogLevel::Info,
            log_file: None,
        }
    }
}

impl GfxOptions {
    /// Virtual size as passed to the driver, `(0, 0)` when unset.
    pub fn virtual_size(&self) -> (u32, u32) {
        self.virtual_resolution
            .map_or((0, 0), |r| (r.width, r.height))
    }

    /// Apply one `key = value` setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "resolution" => self.resolution = parse_resolution(value)?,
            "virtual" => self.virtual_resolution = Some(parse_resolution(value)?),
            "depth" => self.color_depth = parse_color_depth(value)?,
            "windowed" => {
                self.display_mode = if parse_bool(value)? {
                    DisplayMode::Windowed
                } else {
                    DisplayMode::Fullscreen
                }
            }
            "vsync" => self.vsync = parse_bool(value)?,
            "loglevel" => self.log_level = LogLevel::parse(value)?,
            "logfile" => self.log_file = Some(value.to_string()),
            _ => anyhow::bail!("Unknown option '{}'", key),
        }
        Ok(())
    }
}

/// Load display options from a `key = value` file
///
/// Blank lines and lines starting with `#` are skipped. A missing file
/// yields the defaults.
pub fn load_config(path: &Path) -> Result<GfxOptions> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(GfxOptions::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Can't read config file {}", path.display()))
        }
    };
    parse_config(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Parse the contents of a config file on top of the defaults
pub fn parse_config(text: &str) -> Result<GfxOptions> {
    let mut opts = GfxOptions::default();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("Line {}: expected 'key = value'", lineno + 1))?;
        opts.apply(key.trim(), value.trim())
            .with_context(|| format!("Line {}", lineno + 1))?;
    }
    Ok(opts)
}

/// Parse a resolution string in the format "WIDTHxHEIGHT"
pub fn parse_resolution(s: &str) -> Result<Resolution> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        anyhow::bail!("Resolution must be in WIDTHxHEIGHT format");
    }

    let width: u32 = parts[0].trim().parse().context("Invalid width value")?;
    let height: u32 = parts[1].trim().parse().context("Invalid height value")?;

    if width == 0 || height == 0 {
        anyhow::bail!("Resolution values must be positive");
    }

    Ok(Resolution { width, height })
}

/// Parse a color depth in bits per pixel (8, 15, 16, 24 or 32)
pub fn parse_color_depth(s: &str) -> Result<ColorDepth> {
    let bits: u32 = s.trim().parse().context("Invalid color depth value")?;
    ColorDepth::from_bits(bits)
        .with_context(|| format!("Unsupported color depth {} (use 8, 15, 16, 24 or 32)", bits))
}

/// Parse a boolean setting
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => anyhow::bail!("Invalid boolean value '{}'", other),
    }
}
