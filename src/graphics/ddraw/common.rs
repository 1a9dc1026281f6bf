//!
//! Common types, traits, and errors for the DirectDraw-style display driver.
//!
//! Everything the orchestration layer needs to talk about the outside world
//! lives here: opaque backend handles, the backend status code, the color
//! depth table, the error taxonomy, and the traits for every collaborator
//! the driver sequences (backend, mode switch, color format, bitmap
//! wrapping, window-owner dispatch, console state).
//!

use std::fmt;

use bitflags::bitflags;

use crate::graphics::ddraw::surface::{BitmapHandle, DisplaySurface};
use crate::threading::OwnerThread;

// ============================================================================
// Backend status codes and handles
// ============================================================================

/// Raw status code reported by the display backend on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendStatus(pub u32);

impl BackendStatus {
    /// Unspecified failure.
    pub const GENERIC: Self = Self(0x8000_4005);
    /// The requested interface or capability is not implemented.
    pub const UNSUPPORTED: Self = Self(0x8000_4001);
    /// The backend ran out of memory.
    pub const OUT_OF_MEMORY: Self = Self(0x8007_000E);
    /// The call was rejected because of the caller's state.
    pub const INVALID_STATE: Self = Self(0x8876_0005);

    /// Get the raw status code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Result type for raw backend calls.
pub type BackendResult<T> = Result<T, BackendStatus>;

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

backend_handle!(
    /// Native handle of the window that owns the display.
    WindowHandle
);
backend_handle!(
    /// Backend interface object (basic or extended).
    InterfaceId
);
backend_handle!(
    /// Backend surface object.
    SurfaceId
);
backend_handle!(
    /// Backend palette object.
    PaletteId
);
backend_handle!(
    /// Backend clipper object.
    ClipperId
);

// ============================================================================
// Modes, depths and descriptors
// ============================================================================

/// Supported color depths, in bits per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorDepth {
    /// 8-bit indexed color through a 256-entry palette.
    Indexed8,
    /// 15-bit RGB 5:5:5.
    Rgb15,
    /// 16-bit RGB 5:6:5.
    Rgb16,
    /// 24-bit packed RGB.
    Rgb24,
    /// 32-bit RGB with an unused byte.
    Rgb32,
}

impl ColorDepth {
    /// Convert a bit count into a depth, `None` for unsupported counts.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Indexed8),
            15 => Some(Self::Rgb15),
            16 => Some(Self::Rgb16),
            24 => Some(Self::Rgb24),
            32 => Some(Self::Rgb32),
            _ => None,
        }
    }

    /// Bits per pixel.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Indexed8 => 8,
            Self::Rgb15 => 15,
            Self::Rgb16 => 16,
            Self::Rgb24 => 24,
            Self::Rgb32 => 32,
        }
    }

    /// Storage bytes per pixel; 15-bit pixels occupy two bytes.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Indexed8 => 1,
            Self::Rgb15 | Self::Rgb16 => 2,
            Self::Rgb24 => 3,
            Self::Rgb32 => 4,
        }
    }

    /// Whether pixels index a palette instead of storing channels.
    #[must_use]
    pub const fn is_indexed(self) -> bool {
        matches!(self, Self::Indexed8)
    }
}

impl fmt::Display for ColorDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bpp", self.bits())
    }
}

/// Sharing policy between this application and others for the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooperativeLevel {
    /// Shared, windowed access.
    Normal,
    /// Exclusive full-screen access.
    Exclusive,
}

/// Role tag for a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    /// The visible hardware display buffer.
    Primary,
    /// Any other surface (back buffers, video bitmaps, system bitmaps).
    Secondary,
}

/// Where a surface's pixels should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Video memory on the display adapter.
    Video,
    /// System memory.
    System,
}

/// Surface creation request passed to the backend.
///
/// A primary surface is requested with zero dimensions; the backend sizes it
/// to the current display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub role: SurfaceRole,
    pub memory: Option<MemoryClass>,
}

/// Pixel layout of a surface, with channel bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelFormat {
    /// Number of bits per pixel.
    pub bits_per_pixel: u32,
    /// Red channel bitmask.
    pub red_mask: u32,
    /// Green channel bitmask.
    pub green_mask: u32,
    /// Blue channel bitmask.
    pub blue_mask: u32,
}

impl PixelFormat {
    /// Palette-indexed layout without channel masks.
    #[must_use]
    pub const fn indexed8() -> Self {
        Self {
            bits_per_pixel: 8,
            red_mask: 0,
            green_mask: 0,
            blue_mask: 0,
        }
    }

    /// Default direct-color layout for a depth.
    #[must_use]
    pub const fn for_depth(depth: ColorDepth) -> Self {
        match depth {
            ColorDepth::Indexed8 => Self::indexed8(),
            ColorDepth::Rgb15 => Self {
                bits_per_pixel: 16,
                red_mask: 0x7C00,
                green_mask: 0x03E0,
                blue_mask: 0x001F,
            },
            ColorDepth::Rgb16 => Self {
                bits_per_pixel: 16,
                red_mask: 0xF800,
                green_mask: 0x07E0,
                blue_mask: 0x001F,
            },
            ColorDepth::Rgb24 => Self {
                bits_per_pixel: 24,
                red_mask: 0x00FF_0000,
                green_mask: 0x0000_FF00,
                blue_mask: 0x0000_00FF,
            },
            ColorDepth::Rgb32 => Self {
                bits_per_pixel: 32,
                red_mask: 0x00FF_0000,
                green_mask: 0x0000_FF00,
                blue_mask: 0x0000_00FF,
            },
        }
    }
}

/// What the backend hands back for a freshly created surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedSurface {
    pub id: SurfaceId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

bitflags! {
    /// Hardware capability flags reported by the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HardwareCaps: u32 {
        /// Hardware blits.
        const BLT = 1 << 0;
        /// Stretching blits.
        const BLT_STRETCH = 1 << 1;
        /// Source color keying.
        const COLORKEY = 1 << 2;
        /// Palette-indexed surfaces.
        const PALETTE = 1 << 3;
        /// Palette changes synchronized to the vertical blank.
        const PALETTE_VSYNC = 1 << 4;
        /// Page flipping.
        const FLIP = 1 << 5;
        /// The adapter can report the vertical blank.
        const VBLANK_WAIT = 1 << 6;
        /// Overlays.
        const OVERLAY = 1 << 7;
    }
}

/// Immutable snapshot of hardware capabilities and video memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    pub flags: HardwareCaps,
    pub total_video_memory: u64,
    pub free_video_memory: u64,
}

bitflags! {
    /// Per-entry palette flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PaletteEntryFlags: u8 {
        /// Do not let the system collapse this entry onto an existing color.
        const NO_COLLAPSE = 0x04;
        /// The entry is reserved for animation and never shared.
        const RESERVED = 0x01;
    }
}

/// One color in the backend's native 8-bit-per-channel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PaletteEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub flags: PaletteEntryFlags,
}

bitflags! {
    /// Palette object creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PaletteCaps: u32 {
        /// 8-bit indices (256 entries).
        const BITS_8 = 0x04;
        /// All 256 entries may be set, including the system colors.
        const ALLOW_256 = 0x02;
    }
}

/// Kind tag for bitmaps wrapping a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitmapKind {
    /// Video-memory bitmap.
    Video,
    /// System-memory bitmap.
    System,
}

/// What happens to the program when the display loses focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// Pause while in the background.
    Pause,
    /// Keep running in the background.
    Background,
}

// ============================================================================
// Errors
// ============================================================================

/// Capability query failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Can't create display interface ({0})")]
    CreateFailed(BackendStatus),
    #[error("Cooperative level rejected ({0})")]
    CooperativeLevelRejected(BackendStatus),
    #[error("Extended display interface unsupported ({0})")]
    UpgradeUnsupported(BackendStatus),
    #[error("Can't get driver caps ({0})")]
    CapabilityQueryFailed(BackendStatus),
}

/// Mode switch failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("Unsupported virtual resolution")]
    UnsupportedVirtualResolution {
        width: u32,
        height: u32,
        virtual_width: u32,
        virtual_height: u32,
    },
    #[error("Can not set video mode ({0})")]
    Rejected(BackendStatus),
}

/// Surface lifecycle failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("Can't create {role:?} surface ({status})")]
    CreateFailed {
        role: SurfaceRole,
        status: BackendStatus,
    },
    #[error("A primary surface already exists")]
    PrimaryAlreadyExists,
}

/// Palette manager failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaletteError {
    #[error("Can't create palette ({0})")]
    CreateFailed(BackendStatus),
    #[error("Can't set palette ({0})")]
    AttachFailed(BackendStatus),
    #[error("Invalid palette range {from}..={to}")]
    InvalidRange { from: usize, to: usize },
    #[error("Palette range ends at {to} but only {len} colors were supplied")]
    TooFewColors { to: usize, len: usize },
    #[error("No palette has been created")]
    NotCreated,
    #[error("Can't update palette entries ({0})")]
    UpdateFailed(BackendStatus),
    #[error("Can't read palette entries ({0})")]
    ReadBackFailed(BackendStatus),
}

/// Color format configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Color depth {0} has no direct-color format")]
    Unsupported(ColorDepth),
    #[error("Can't set color format ({0})")]
    Backend(BackendStatus),
}

/// Clip region failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClipError {
    #[error("Can't create clipper ({0})")]
    CreateFailed(BackendStatus),
    #[error("Can't set clipper window ({0})")]
    SetWindowFailed(BackendStatus),
}

/// Driver binding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("Out of memory allocating {bytes} bytes of pseudo surface memory")]
    OutOfMemory { bytes: usize },
}

/// Everything that can abort display initialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("Display driver already initialized")]
    AlreadyInitialized,
    #[error("Unsupported color depth {0}")]
    UnsupportedColorDepth(u32),
    #[error("Display backend not connected")]
    NotConnected,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Palette(#[from] PaletteError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Clip(#[from] ClipError),
    #[error(transparent)]
    Bind(#[from] BindError),
}

// ============================================================================
// Backend and collaborator traits
// ============================================================================

/// The display-acceleration backend.
///
/// Handles are plain ids; the backend owns the objects behind them. Release
/// calls never fail from the caller's point of view.
pub trait DisplayBackend: Send + Sync {
    /// Instantiate a basic backend interface.
    fn create_interface(&self) -> BackendResult<InterfaceId>;

    /// Upgrade a basic interface to the extended one.
    fn query_extended(&self, basic: InterfaceId) -> BackendResult<InterfaceId>;

    /// Drop one reference to an interface.
    fn release_interface(&self, iface: InterfaceId);

    fn set_cooperative_level(
        &self,
        iface: InterfaceId,
        window: WindowHandle,
        level: CooperativeLevel,
    ) -> BackendResult<()>;

    fn capabilities(&self, iface: InterfaceId) -> BackendResult<CapabilitySet>;

    /// Free memory of the given class, in bytes.
    fn available_video_memory(&self, iface: InterfaceId, class: MemoryClass) -> BackendResult<u64>;

    /// Current monitor refresh rate in Hz.
    fn monitor_frequency(&self, iface: InterfaceId) -> BackendResult<u32>;

    /// Block until the next vertical blank begins.
    fn wait_vertical_blank(&self, iface: InterfaceId) -> BackendResult<()>;

    fn create_surface(&self, iface: InterfaceId, desc: &SurfaceDesc) -> BackendResult<CreatedSurface>;

    fn release_surface(&self, surface: SurfaceId);

    fn create_palette(
        &self,
        iface: InterfaceId,
        caps: PaletteCaps,
        entries: &[PaletteEntry],
    ) -> BackendResult<PaletteId>;

    fn attach_palette(&self, surface: SurfaceId, palette: PaletteId) -> BackendResult<()>;

    /// Overwrite `entries.len()` palette entries starting at `start`.
    fn set_palette_entries(
        &self,
        palette: PaletteId,
        start: usize,
        entries: &[PaletteEntry],
    ) -> BackendResult<()>;

    /// Read back the full palette.
    fn palette_entries(&self, palette: PaletteId) -> BackendResult<Vec<PaletteEntry>>;

    fn release_palette(&self, palette: PaletteId);

    fn create_clipper(&self, iface: InterfaceId) -> BackendResult<ClipperId>;

    fn set_clipper_window(&self, clipper: ClipperId, window: WindowHandle) -> BackendResult<()>;

    fn release_clipper(&self, clipper: ClipperId);
}

/// Video mode switching service.
pub trait ModeSwitch: Send + Sync {
    /// Switch the display to the requested mode.
    ///
    /// Must reject any virtual resolution not equal to the physical one.
    fn set_mode(
        &self,
        width: u32,
        height: u32,
        virtual_width: u32,
        virtual_height: u32,
        depth: ColorDepth,
    ) -> Result<(), ModeError>;
}

/// Pixel format configuration for direct-color depths.
pub trait ColorFormat: Send + Sync {
    fn configure_color_format(
        &self,
        surface: &mut DisplaySurface,
        depth: ColorDepth,
    ) -> Result<(), FormatError>;
}

/// Generic bitmap layer of the rendering stack.
pub trait BitmapService: Send + Sync {
    /// Wrap a surface as a bitmap handle for the rest of the stack.
    fn wrap_surface_as_bitmap(
        &self,
        surface: &DisplaySurface,
        width: u32,
        height: u32,
        kind: BitmapKind,
    ) -> BitmapHandle;

    /// Clear a bitmap's pixels to color zero.
    fn clear_bitmap(&self, bitmap: &BitmapHandle) -> BackendResult<()>;
}

/// A procedure shipped to the window-owner thread.
pub type OwnerJob = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch to the thread that owns the window.
pub trait WindowOwner: Send + Sync {
    /// Run `job` on the owner thread and wait for it to finish.
    fn run_on_owner_thread(&self, job: OwnerJob);
}

impl WindowOwner for OwnerThread {
    fn run_on_owner_thread(&self, job: OwnerJob) {
        if let Err(e) = self.call(job) {
            log::error!("Window owner dispatch failed: {}", e);
        }
    }
}

/// Console and window presentation state.
pub trait ConsoleState: Send + Sync {
    fn set_switch_policy(&self, policy: SwitchPolicy);
    fn restore_console_state(&self);
    fn restore_window_style(&self);
}
