use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::config::{parse_color_depth, parse_resolution, GfxOptions};
use crate::graphics::ddraw::{DisplayMode, SoftFault};
use crate::logging::LogLevel;

/// Fullscreen display driver exerciser
#[derive(Parser, Debug, Default)]
#[command(name = "ddgfx")]
#[command(version)]
#[command(
    about = "Bring a fullscreen display up and down against the software backend",
    long_about = None
)]
pub struct Cli {
    /// Screen resolution (e.g., 640x480)
    #[arg(short, long, value_name = "WIDTHxHEIGHT")]
    pub res: Option<String>,

    /// Virtual screen resolution; must match the screen resolution
    #[arg(long = "virtual", value_name = "WIDTHxHEIGHT")]
    pub virtual_res: Option<String>,

    /// Color depth in bits per pixel (8, 15, 16, 24, 32)
    #[arg(short, long, value_name = "BPP")]
    pub depth: Option<String>,

    /// Enable fullscreen mode
    #[arg(short, long)]
    pub fullscreen: bool,

    /// Enable windowed mode
    #[arg(short, long)]
    pub windowed: bool,

    /// Don't wait for the vertical blank before palette updates
    #[arg(long = "novsync")]
    pub novsync: bool,

    /// Log level (nothing, user, error, warning, info, debug, all, or 0-6)
    #[arg(long, value_name = "LEVEL")]
    pub loglevel: Option<String>,

    /// Log file path
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<String>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Make one initialization step fail to exercise rollback
    #[arg(long = "fail-at", value_enum, value_name = "STEP")]
    pub fail_at: Option<FailStep>,
}

/// Initialization steps that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailStep {
    Connect,
    Cooperative,
    Upgrade,
    Caps,
    Mode,
    Refresh,
    Primary,
    Palette,
    AttachPalette,
    Format,
    Clipper,
    Vblank,
}

impl FailStep {
    /// The backend fault producing this failure.
    pub fn fault(self) -> SoftFault {
        match self {
            FailStep::Connect => SoftFault::CreateInterface,
            FailStep::Cooperative => SoftFault::CooperativeLevel,
            FailStep::Upgrade => SoftFault::QueryExtended,
            FailStep::Caps => SoftFault::Capabilities,
            FailStep::Mode => SoftFault::SetMode,
            FailStep::Refresh => SoftFault::MonitorFrequency,
            FailStep::Primary => SoftFault::CreateSurface,
            FailStep::Palette => SoftFault::CreatePalette,
            FailStep::AttachPalette => SoftFault::AttachPalette,
            FailStep::Format => SoftFault::ColorFormat,
            FailStep::Clipper => SoftFault::CreateClipper,
            FailStep::Vblank => SoftFault::VerticalBlank,
        }
    }
}

impl Cli {
    /// Merge CLI arguments into the options struct
    pub fn merge_into_options(&self, mut opts: GfxOptions) -> Result<GfxOptions> {
        if let Some(ref res) = self.res {
            opts.resolution = parse_resolution(res).context("Invalid resolution format")?;
        }

        if let Some(ref virtual_res) = self.virtual_res {
            opts.virtual_resolution =
                Some(parse_resolution(virtual_res).context("Invalid virtual resolution format")?);
        }

        if let Some(ref depth) = self.depth {
            opts.color_depth = parse_color_depth(depth)?;
        }

        if self.fullscreen && self.windowed {
            anyhow::bail!("--fullscreen and --windowed are mutually exclusive");
        }
        if self.fullscreen {
            opts.display_mode = DisplayMode::Fullscreen;
        }
        if self.windowed {
            opts.display_mode = DisplayMode::Windowed;
        }

        if self.novsync {
            opts.vsync = false;
        }

        if let Some(ref level) = self.loglevel {
            opts.log_level = LogLevel::parse(level).context("Invalid log level")?;
        }

        if let Some(ref log_file) = self.logfile {
            opts.log_file = Some(log_file.clone());
        }

        Ok(opts)
    }
}
