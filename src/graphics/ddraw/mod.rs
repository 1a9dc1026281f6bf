//!
//! Fullscreen DirectDraw-style display driver.
//!
//! This module brings a hardware display surface up and down on top of a
//! display-acceleration backend. The difficult part is the ordering: every
//! setup step can fail, and a failure must release exactly what was already
//! acquired. Teardown must work from any partial state, twice in a row, and
//! hand the final connection release to the thread owning the window.
//!
//! # Architecture
//!
//! - `common`: handles, status codes, color depths, errors, collaborator traits
//! - `caps`: backend connection and capability query
//! - `surface`: surface lifecycle, registry, bitmap handles
//! - `palette`: 256-color table, bulk updates, vertical-blank wait
//! - `clipper`: clip region for windowed display
//! - `binding`: screen vtable overrides, video memory, pseudo memory
//! - `context`: [`DisplayContext`], the initialization and teardown orchestrators
//! - `soft`: in-process software backend

pub mod binding;
pub mod caps;
pub mod clipper;
pub mod common;
pub mod context;
pub mod palette;
pub mod soft;
pub mod surface;


pub use binding::{DriverBinding, GfxDriverInfo, OpOrigin, ScreenVtable, PSEUDO_SCANLINES};
pub use caps::{connect, BackendConnection};
pub use clipper::ClipRegion;
pub use common::{
    BackendStatus, BindError, BitmapKind, BitmapService, CapabilitySet, ClipError, ColorDepth,
    ColorFormat, ConnectError, ConsoleState, DisplayBackend, FormatError, HardwareCaps,
    InitError, ModeError, ModeSwitch, OwnerJob, PaletteEntry, PaletteEntryFlags, PaletteError,
    SurfaceError, SurfaceRole, SwitchPolicy, WindowHandle, WindowOwner,
};
pub use context::{Collaborators, DisplayContext, DisplayMode, InitState};
pub use palette::{expand_channel, PaletteTable, Rgb, PALETTE_SIZE};
pub use soft::{SoftCall, SoftConfig, SoftDisplay, SoftFault, SoftSnapshot};
pub use surface::{BitmapHandle, DisplaySurface, RegisteredSurface, SurfaceManager};
