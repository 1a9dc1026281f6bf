//! Software display backend
//!
//! An in-process stand-in for the display-acceleration backend and every
//! collaborator the driver sequences. It keeps the objects it hands out in
//! tables, so callers can check what is still alive after init or teardown.
//! Two aids for exercising failure paths:
//! - faults injected with [`SoftDisplay::inject`] make the matching call fail
//!   until healed
//! - every call is appended to a journal, readable with [`SoftDisplay::journal`]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::graphics::ddraw::common::{
    BackendResult, BackendStatus, BitmapKind, BitmapService, CapabilitySet, ClipperId,
    ColorDepth, ColorFormat, ConsoleState, CooperativeLevel, CreatedSurface, DisplayBackend,
    FormatError, HardwareCaps, InterfaceId, MemoryClass, ModeError, ModeSwitch, PaletteCaps,
    PaletteEntry, PaletteId, PixelFormat, SurfaceDesc, SurfaceId, SurfaceRole, SwitchPolicy,
    WindowHandle, WindowOwner,
};
use crate::graphics::ddraw::context::Collaborators;
use crate::graphics::ddraw::palette::PALETTE_SIZE;
use crate::graphics::ddraw::surface::{BitmapHandle, DisplaySurface};

/// System memory reported for [`MemoryClass::System`] queries.
const SYSTEM_MEMORY: u64 = 256 * 1024 * 1024;

// ============================================================================
// Configuration, faults and journal
// ============================================================================

/// What the software adapter reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftConfig {
    /// Capability snapshot returned by every capability query
    pub caps: CapabilitySet,
    /// Free video memory returned for [`MemoryClass::Video`]
    pub free_video_memory: u64,
    /// Monitor refresh rate in Hz
    pub refresh_rate: u32,
}

impl Default for SoftConfig {
    fn default() -> Self {
        let total = 8 * 1024 * 1024;
        let free = 6 * 1024 * 1024;
        Self {
            caps: CapabilitySet {
                flags: HardwareCaps::BLT
                    | HardwareCaps::COLORKEY
                    | HardwareCaps::PALETTE
                    | HardwareCaps::FLIP
                    | HardwareCaps::VBLANK_WAIT,
                total_video_memory: total,
                free_video_memory: free,
            },
            free_video_memory: free,
            refresh_rate: 60,
        }
    }
}

/// A call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftFault {
    CreateInterface,
    CooperativeLevel,
    QueryExtended,
    Capabilities,
    VideoMemory,
    MonitorFrequency,
    VerticalBlank,
    SetMode,
    CreateSurface,
    CreatePalette,
    AttachPalette,
    SetPaletteEntries,
    ReadPalette,
    ColorFormat,
    CreateClipper,
    SetClipperWindow,
    ClearBitmap,
}

impl SoftFault {
    /// Status the faulted call reports.
    pub const fn status(self) -> BackendStatus {
        match self {
            Self::CooperativeLevel | Self::AttachPalette => BackendStatus::INVALID_STATE,
            Self::QueryExtended | Self::MonitorFrequency | Self::ReadPalette => {
                BackendStatus::UNSUPPORTED
            }
            Self::CreateSurface | Self::CreatePalette => BackendStatus::OUT_OF_MEMORY,
            _ => BackendStatus::GENERIC,
        }
    }
}

/// One recorded call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftCall {
    CreateInterface,
    QueryExtended,
    ReleaseInterface(InterfaceId),
    SetCooperativeLevel { iface: InterfaceId, level: CooperativeLevel },
    Capabilities,
    AvailableVideoMemory(MemoryClass),
    MonitorFrequency,
    WaitVerticalBlank,
    SetMode { width: u32, height: u32, depth: ColorDepth },
    CreateSurface(SurfaceRole),
    ReleaseSurface(SurfaceId),
    CreatePalette,
    AttachPalette { surface: SurfaceId, palette: PaletteId },
    SetPaletteEntries { palette: PaletteId, start: usize, count: usize },
    ReadPalette(PaletteId),
    ReleasePalette(PaletteId),
    CreateClipper,
    SetClipperWindow(WindowHandle),
    ReleaseClipper(ClipperId),
    ConfigureColorFormat(ColorDepth),
    WrapBitmap(SurfaceId),
    ClearBitmap(SurfaceId),
    SetSwitchPolicy(SwitchPolicy),
    RestoreConsoleState,
    RestoreWindowStyle,
}

/// The current display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftMode {
    pub width: u32,
    pub height: u32,
    pub depth: ColorDepth,
}

/// Counters and live-object totals at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoftSnapshot {
    pub mode: Option<SoftMode>,
    pub live_interfaces: usize,
    pub live_surfaces: usize,
    pub live_palettes: usize,
    pub live_clippers: usize,
    pub surface_releases: usize,
    /// Cooperative level set back to normal on an extended interface
    pub cooperative_resets: usize,
    pub vblank_waits: usize,
    /// Extended interfaces released from a thread other than the window owner
    pub foreign_releases: usize,
    /// Releases of ids the backend does not know
    pub stray_releases: usize,
    pub bitmap_clears: usize,
    pub switch_policy: Option<SwitchPolicy>,
    pub console_restores: usize,
    pub window_style_restores: usize,
}

impl SoftSnapshot {
    /// Whether no backend object or display mode is left over.
    pub fn is_released(&self) -> bool {
        self.mode.is_none()
            && self.live_interfaces == 0
            && self.live_surfaces == 0
            && self.live_palettes == 0
            && self.live_clippers == 0
    }
}

// ============================================================================
// Backend state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceKind {
    Basic,
    Extended,
}

#[derive(Debug)]
struct SoftSurface {
    role: SurfaceRole,
    palette: Option<PaletteId>,
}

#[derive(Debug, Default)]
struct SoftState {
    next_id: u32,
    faults: HashSet<SoftFault>,
    owner_thread: Option<ThreadId>,
    mode: Option<SoftMode>,
    interfaces: HashMap<InterfaceId, InterfaceKind>,
    surfaces: HashMap<SurfaceId, SoftSurface>,
    palettes: HashMap<PaletteId, Vec<PaletteEntry>>,
    clippers: HashMap<ClipperId, Option<WindowHandle>>,
    journal: Vec<SoftCall>,
    stats: SoftSnapshot,
}

impl SoftState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, fault: SoftFault) -> BackendResult<()> {
        if self.faults.contains(&fault) {
            Err(fault.status())
        } else {
            Ok(())
        }
    }

    fn require_interface(&self, iface: InterfaceId) -> BackendResult<InterfaceKind> {
        self.interfaces
            .get(&iface)
            .copied()
            .ok_or(BackendStatus::INVALID_STATE)
    }
}

/// The software display adapter.
#[derive(Debug)]
pub struct SoftDisplay {
    config: SoftConfig,
    state: Mutex<SoftState>,
}

impl SoftDisplay {
    pub fn new(config: SoftConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SoftState::default()),
        }
    }

    pub fn config(&self) -> &SoftConfig {
        &self.config
    }

    /// Make every later call of the given kind fail.
    pub fn inject(&self, fault: SoftFault) {
        self.state.lock().faults.insert(fault);
    }

    /// Undo [`SoftDisplay::inject`].
    pub fn heal(&self, fault: SoftFault) {
        self.state.lock().faults.remove(&fault);
    }

    /// Declare which thread owns the window. Extended interfaces released
    /// anywhere else are counted in [`SoftSnapshot::foreign_releases`].
    pub fn set_owner_thread(&self, owner: ThreadId) {
        self.state.lock().owner_thread = Some(owner);
    }

    pub fn journal(&self) -> Vec<SoftCall> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    pub fn snapshot(&self) -> SoftSnapshot {
        let state = self.state.lock();
        SoftSnapshot {
            mode: state.mode,
            live_interfaces: state.interfaces.len(),
            live_surfaces: state.surfaces.len(),
            live_palettes: state.palettes.len(),
            live_clippers: state.clippers.len(),
            ..state.stats.clone()
        }
    }

    /// Bundle this adapter as every collaborator of a display context.
    pub fn collaborators(
        self: &Arc<Self>,
        window: WindowHandle,
        owner: Arc<dyn WindowOwner>,
    ) -> Collaborators {
        Collaborators {
            backend: self.clone(),
            modes: self.clone(),
            formats: self.clone(),
            bitmaps: self.clone(),
            console: self.clone(),
            owner,
            window,
        }
    }

    fn record(&self, call: SoftCall) -> parking_lot::MutexGuard<'_, SoftState> {
        let mut state = self.state.lock();
        state.journal.push(call);
        state
    }
}

impl DisplayBackend for SoftDisplay {
    fn create_interface(&self) -> BackendResult<InterfaceId> {
        let mut state = self.record(SoftCall::CreateInterface);
        state.check(SoftFault::CreateInterface)?;
        let id = InterfaceId(state.next_id());
        state.interfaces.insert(id, InterfaceKind::Basic);
        Ok(id)
    }

    fn query_extended(&self, basic: InterfaceId) -> BackendResult<InterfaceId> {
        let mut state = self.record(SoftCall::QueryExtended);
        state.require_interface(basic)?;
        state.check(SoftFault::QueryExtended)?;
        let id = InterfaceId(state.next_id());
        state.interfaces.insert(id, InterfaceKind::Extended);
        Ok(id)
    }

    fn release_interface(&self, iface: InterfaceId) {
        let mut state = self.record(SoftCall::ReleaseInterface(iface));
        let released = state.interfaces.remove(&iface);
        match released {
            Some(InterfaceKind::Extended) => {
                let foreign = state
                    .owner_thread
                    .is_some_and(|owner| owner != thread::current().id());
                if foreign {
                    state.stats.foreign_releases += 1;
                }
            }
            Some(InterfaceKind::Basic) => {}
            None => state.stats.stray_releases += 1,
        }
    }

    fn set_cooperative_level(
        &self,
        iface: InterfaceId,
        _window: WindowHandle,
        level: CooperativeLevel,
    ) -> BackendResult<()> {
        let mut state = self.record(SoftCall::SetCooperativeLevel { iface, level });
        let kind = state.require_interface(iface)?;
        state.check(SoftFault::CooperativeLevel)?;
        if kind == InterfaceKind::Extended && level == CooperativeLevel::Normal {
            state.stats.cooperative_resets += 1;
        }
        Ok(())
    }

    fn capabilities(&self, iface: InterfaceId) -> BackendResult<CapabilitySet> {
        let state = self.record(SoftCall::Capabilities);
        state.require_interface(iface)?;
        state.check(SoftFault::Capabilities)?;
        Ok(self.config.caps)
    }

    fn available_video_memory(&self, iface: InterfaceId, class: MemoryClass) -> BackendResult<u64> {
        let state = self.record(SoftCall::AvailableVideoMemory(class));
        state.require_interface(iface)?;
        state.check(SoftFault::VideoMemory)?;
        Ok(match class {
            MemoryClass::Video => self.config.free_video_memory,
            MemoryClass::System => SYSTEM_MEMORY,
        })
    }

    fn monitor_frequency(&self, iface: InterfaceId) -> BackendResult<u32> {
        let state = self.record(SoftCall::MonitorFrequency);
        state.require_interface(iface)?;
        state.check(SoftFault::MonitorFrequency)?;
        Ok(self.config.refresh_rate)
    }

    fn wait_vertical_blank(&self, iface: InterfaceId) -> BackendResult<()> {
        let mut state = self.record(SoftCall::WaitVerticalBlank);
        state.stats.vblank_waits += 1;
        state.require_interface(iface)?;
        state.check(SoftFault::VerticalBlank)
    }

    fn create_surface(&self, iface: InterfaceId, desc: &SurfaceDesc) -> BackendResult<CreatedSurface> {
        let mut state = self.record(SoftCall::CreateSurface(desc.role));
        state.require_interface(iface)?;
        state.check(SoftFault::CreateSurface)?;

        let (width, height, format) = match desc.role {
            SurfaceRole::Primary => {
                // The primary surface is the screen; it needs a mode first.
                let mode = state.mode.ok_or(BackendStatus::INVALID_STATE)?;
                let primaries = state
                    .surfaces
                    .values()
                    .filter(|s| s.role == SurfaceRole::Primary)
                    .count();
                if primaries > 0 {
                    return Err(BackendStatus::INVALID_STATE);
                }
                (mode.width, mode.height, PixelFormat::for_depth(mode.depth))
            }
            SurfaceRole::Secondary => {
                let depth = state.mode.map_or(ColorDepth::Rgb16, |m| m.depth);
                (desc.width, desc.height, PixelFormat::for_depth(depth))
            }
        };

        let id = SurfaceId(state.next_id());
        state.surfaces.insert(
            id,
            SoftSurface {
                role: desc.role,
                palette: None,
            },
        );
        Ok(CreatedSurface {
            id,
            width,
            height,
            format,
        })
    }

    fn release_surface(&self, surface: SurfaceId) {
        let mut state = self.record(SoftCall::ReleaseSurface(surface));
        if state.surfaces.remove(&surface).is_some() {
            state.stats.surface_releases += 1;
        } else {
            state.stats.stray_releases += 1;
        }
    }

    fn create_palette(
        &self,
        iface: InterfaceId,
        caps: PaletteCaps,
        entries: &[PaletteEntry],
    ) -> BackendResult<PaletteId> {
        let mut state = self.record(SoftCall::CreatePalette);
        state.require_interface(iface)?;
        state.check(SoftFault::CreatePalette)?;
        if !caps.contains(PaletteCaps::BITS_8) || entries.len() != PALETTE_SIZE {
            return Err(BackendStatus::UNSUPPORTED);
        }
        let id = PaletteId(state.next_id());
        state.palettes.insert(id, entries.to_vec());
        Ok(id)
    }

    fn attach_palette(&self, surface: SurfaceId, palette: PaletteId) -> BackendResult<()> {
        let mut state = self.record(SoftCall::AttachPalette { surface, palette });
        state.check(SoftFault::AttachPalette)?;
        if !state.palettes.contains_key(&palette) {
            return Err(BackendStatus::INVALID_STATE);
        }
        let target = state
            .surfaces
            .get_mut(&surface)
            .ok_or(BackendStatus::INVALID_STATE)?;
        target.palette = Some(palette);
        Ok(())
    }

    fn set_palette_entries(
        &self,
        palette: PaletteId,
        start: usize,
        entries: &[PaletteEntry],
    ) -> BackendResult<()> {
        let mut state = self.record(SoftCall::SetPaletteEntries {
            palette,
            start,
            count: entries.len(),
        });
        state.check(SoftFault::SetPaletteEntries)?;
        let table = state
            .palettes
            .get_mut(&palette)
            .ok_or(BackendStatus::INVALID_STATE)?;
        let end = start
            .checked_add(entries.len())
            .ok_or(BackendStatus::INVALID_STATE)?;
        let slots = table
            .get_mut(start..end)
            .ok_or(BackendStatus::INVALID_STATE)?;
        slots.copy_from_slice(entries);
        Ok(())
    }

    fn palette_entries(&self, palette: PaletteId) -> BackendResult<Vec<PaletteEntry>> {
        let state = self.record(SoftCall::ReadPalette(palette));
        state.check(SoftFault::ReadPalette)?;
        state
            .palettes
            .get(&palette)
            .cloned()
            .ok_or(BackendStatus::INVALID_STATE)
    }

    fn release_palette(&self, palette: PaletteId) {
        let mut state = self.record(SoftCall::ReleasePalette(palette));
        if state.palettes.remove(&palette).is_none() {
            state.stats.stray_releases += 1;
            return;
        }
        for surface in state.surfaces.values_mut() {
            if surface.palette == Some(palette) {
                surface.palette = None;
            }
        }
    }

    fn create_clipper(&self, iface: InterfaceId) -> BackendResult<ClipperId> {
        let mut state = self.record(SoftCall::CreateClipper);
        state.require_interface(iface)?;
        state.check(SoftFault::CreateClipper)?;
        let id = ClipperId(state.next_id());
        state.clippers.insert(id, None);
        Ok(id)
    }

    fn set_clipper_window(&self, clipper: ClipperId, window: WindowHandle) -> BackendResult<()> {
        let mut state = self.record(SoftCall::SetClipperWindow(window));
        state.check(SoftFault::SetClipperWindow)?;
        let slot = state
            .clippers
            .get_mut(&clipper)
            .ok_or(BackendStatus::INVALID_STATE)?;
        *slot = Some(window);
        Ok(())
    }

    fn release_clipper(&self, clipper: ClipperId) {
        let mut state = self.record(SoftCall::ReleaseClipper(clipper));
        if state.clippers.remove(&clipper).is_none() {
            state.stats.stray_releases += 1;
        }
    }
}

impl ModeSwitch for SoftDisplay {
    fn set_mode(
        &self,
        width: u32,
        height: u32,
        virtual_width: u32,
        virtual_height: u32,
        depth: ColorDepth,
    ) -> Result<(), ModeError> {
        let mut state = self.record(SoftCall::SetMode {
            width,
            height,
            depth,
        });
        let virtual_size = (virtual_width, virtual_height);
        if virtual_size != (0, 0) && virtual_size != (width, height) {
            return Err(ModeError::UnsupportedVirtualResolution {
                width,
                height,
                virtual_width,
                virtual_height,
            });
        }
        state.check(SoftFault::SetMode).map_err(ModeError::Rejected)?;
        state.mode = Some(SoftMode {
            width,
            height,
            depth,
        });
        Ok(())
    }
}

impl ColorFormat for SoftDisplay {
    fn configure_color_format(
        &self,
        surface: &mut DisplaySurface,
        depth: ColorDepth,
    ) -> Result<(), FormatError> {
        let state = self.record(SoftCall::ConfigureColorFormat(depth));
        if depth.is_indexed() {
            return Err(FormatError::Unsupported(depth));
        }
        state.check(SoftFault::ColorFormat).map_err(FormatError::Backend)?;
        surface.set_format(PixelFormat::for_depth(depth));
        Ok(())
    }
}

impl BitmapService for SoftDisplay {
    fn wrap_surface_as_bitmap(
        &self,
        surface: &DisplaySurface,
        width: u32,
        height: u32,
        kind: BitmapKind,
    ) -> BitmapHandle {
        let _state = self.record(SoftCall::WrapBitmap(surface.id()));
        BitmapHandle::wrap(surface, width, height, kind)
    }

    fn clear_bitmap(&self, bitmap: &BitmapHandle) -> BackendResult<()> {
        let mut state = self.record(SoftCall::ClearBitmap(bitmap.surface_id()));
        state.check(SoftFault::ClearBitmap)?;
        if !bitmap.is_valid() || !state.surfaces.contains_key(&bitmap.surface_id()) {
            return Err(BackendStatus::INVALID_STATE);
        }
        state.stats.bitmap_clears += 1;
        Ok(())
    }
}

impl ConsoleState for SoftDisplay {
    fn set_switch_policy(&self, policy: SwitchPolicy) {
        let mut state = self.record(SoftCall::SetSwitchPolicy(policy));
        state.stats.switch_policy = Some(policy);
    }

    fn restore_console_state(&self) {
        let mut state = self.record(SoftCall::RestoreConsoleState);
        state.mode = None;
        state.stats.console_restores += 1;
    }

    fn restore_window_style(&self) {
        let mut state = self.record(SoftCall::RestoreWindowStyle);
        state.stats.window_style_restores += 1;
    }
}
