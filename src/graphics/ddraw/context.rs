//!
//! Display context: initialization and teardown orchestration.
//!
//! [`DisplayContext`] owns every resource the fullscreen driver acquires:
//! the backend connection, the primary surface and its bitmap wrapper, the
//! palette, the optional clip region and the driver binding. Initialization
//! walks a fixed chain of states and records each resource in the context
//! the moment it exists, so a failure at any step can hand the context to
//! [`DisplayContext::shutdown`], which releases exactly what is live.
//!
//! ```text
//! Unconnected -> Connected -> ModeSet -> Finalized -> PrimaryCreated
//!             -> ColorConfigured -> DriverBound -> Ready
//! ```
//!
//! Any failing step moves to `Failed`, runs teardown and lands back in
//! `Unconnected`.
//!

use std::fmt;
use std::sync::Arc;

use crate::graphics::ddraw::binding::{self, DriverBinding, GfxDriverInfo};
use crate::graphics::ddraw::caps::{self, BackendConnection};
use crate::graphics::ddraw::clipper::{self, ClipRegion};
use crate::graphics::ddraw::common::{
    BitmapKind, BitmapService, CapabilitySet, ColorDepth, ColorFormat, ConsoleState,
    DisplayBackend, InitError, ModeError, ModeSwitch, PaletteEntry, PaletteError, SurfaceRole,
    SwitchPolicy, WindowHandle, WindowOwner,
};
use crate::graphics::ddraw::palette::{self, PaletteManager, PaletteTable, Rgb};
use crate::graphics::ddraw::surface::{
    BitmapHandle, DisplaySurface, RegisteredSurface, SurfaceManager,
};
use crate::threading::enter_critical;

// ============================================================================
// Collaborators and states
// ============================================================================

/// Everything outside the orchestration layer that the context sequences.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn DisplayBackend>,
    pub modes: Arc<dyn ModeSwitch>,
    pub formats: Arc<dyn ColorFormat>,
    pub bitmaps: Arc<dyn BitmapService>,
    pub console: Arc<dyn ConsoleState>,
    /// Dispatcher for the thread owning `window`
    pub owner: Arc<dyn WindowOwner>,
    pub window: WindowHandle,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// How the display is shared with other applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Exclusive fullscreen; no clipping needed.
    #[default]
    Fullscreen,
    /// Shared desktop; drawing is clipped to the owning window.
    Windowed,
}

/// Initialization progress of a [`DisplayContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Unconnected,
    Connected,
    ModeSet,
    Finalized,
    PrimaryCreated,
    ColorConfigured,
    DriverBound,
    Ready,
    Failed,
}

// ============================================================================
// Display context
// ============================================================================

/// Owner of the fullscreen display and everything hanging off it.
pub struct DisplayContext {
    services: Collaborators,
    display_mode: DisplayMode,
    state: InitState,
    conn: Option<BackendConnection>,
    surfaces: SurfaceManager,
    primary: Option<DisplaySurface>,
    forefront: Option<BitmapHandle>,
    palette: PaletteManager,
    clip: Option<ClipRegion>,
    binding: Option<DriverBinding>,
    /// Active driver description; rendering routes through it while set.
    driver: Option<GfxDriverInfo>,
    color_depth: Option<ColorDepth>,
    refresh_rate: u32,
    last_error: Option<String>,
}

impl DisplayContext {
    /// Create an idle context. Nothing is acquired until [`initialize`](Self::initialize).
    pub fn new(services: Collaborators, display_mode: DisplayMode) -> Self {
        Self {
            services,
            display_mode,
            state: InitState::Unconnected,
            conn: None,
            surfaces: SurfaceManager::new(),
            primary: None,
            forefront: None,
            palette: PaletteManager::new(),
            clip: None,
            binding: None,
            driver: None,
            color_depth: None,
            refresh_rate: 0,
            last_error: None,
        }
    }

    /// Bring up the display and return the bitmap wrapping the screen.
    ///
    /// All-or-nothing: on failure everything acquired so far is released,
    /// the context is back to its idle state and the message is kept in
    /// [`last_error`](Self::last_error).
    pub fn initialize(
        &mut self,
        width: u32,
        height: u32,
        virtual_width: u32,
        virtual_height: u32,
        color_depth: u32,
    ) -> Result<BitmapHandle, InitError> {
        let _critical = enter_critical();

        if self.state != InitState::Unconnected {
            return Err(InitError::AlreadyInitialized);
        }

        // Nothing is acquired yet, so rejected requests need no teardown.
        let depth = match validate_request(width, height, virtual_width, virtual_height, color_depth)
        {
            Ok(depth) => depth,
            Err(e) => {
                log::error!("{}", e);
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        log::info!(
            "Initializing {:?} display {}x{} at {}",
            self.display_mode,
            width,
            height,
            depth
        );

        match self.run_init(width, height, virtual_width, virtual_height, depth) {
            Ok(bitmap) => {
                self.last_error = None;
                log::info!(
                    "Display ready: {}x{} {} at {} Hz",
                    width,
                    height,
                    depth,
                    self.refresh_rate
                );
                Ok(bitmap)
            }
            Err(e) => {
                log::error!("Display init failed in state {:?}: {}", self.state, e);
                self.advance(InitState::Failed);
                let partial = self.forefront.clone();
                self.shutdown(partial.as_ref());
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn run_init(
        &mut self,
        width: u32,
        height: u32,
        virtual_width: u32,
        virtual_height: u32,
        depth: ColorDepth,
    ) -> Result<BitmapHandle, InitError> {
        let conn = caps::connect(self.services.backend.clone(), self.services.window)?;
        self.conn = Some(conn);
        self.advance(InitState::Connected);

        self.services
            .modes
            .set_mode(width, height, virtual_width, virtual_height, depth)?;
        self.color_depth = Some(depth);
        self.advance(InitState::ModeSet);

        let conn = self.conn.as_ref().ok_or(InitError::NotConnected)?;
        self.refresh_rate = query_refresh_rate(conn);
        self.advance(InitState::Finalized);

        let conn = self.conn.as_ref().ok_or(InitError::NotConnected)?;
        let primary = self
            .surfaces
            .create_surface(conn, 0, 0, SurfaceRole::Primary, None)?;
        let primary = self.primary.insert(primary);
        if self.display_mode == DisplayMode::Windowed {
            self.clip = Some(clipper::create_clipper(conn, self.services.window)?);
        }
        self.state = InitState::PrimaryCreated;
        log::debug!("Display init: {:?}", self.state);

        if depth.is_indexed() {
            self.palette.build(conn, primary)?;
        } else {
            self.services.formats.configure_color_format(primary, depth)?;
        }
        self.state = InitState::ColorConfigured;
        log::debug!("Display init: {:?}", self.state);

        let mut driver = GfxDriverInfo::default();
        self.binding = Some(binding::bind(&mut driver, conn, width, height, depth)?);
        self.driver = Some(driver);
        self.state = InitState::DriverBound;
        log::debug!("Display init: {:?}", self.state);

        let bitmap = self
            .services
            .bitmaps
            .wrap_surface_as_bitmap(primary, width, height, BitmapKind::Video);
        self.forefront = Some(bitmap.clone());
        self.advance(InitState::Ready);

        Ok(bitmap)
    }

    fn advance(&mut self, next: InitState) {
        log::debug!("Display init: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Release everything the display holds.
    ///
    /// Safe from any state, including never initialized, and safe to repeat.
    /// `bitmap` is cleared before the surface behind it goes away.
    pub fn shutdown(&mut self, bitmap: Option<&BitmapHandle>) {
        let _critical = enter_critical();
        let backend = Arc::clone(&self.services.backend);

        self.refresh_rate = 0;

        if let Some(bitmap) = bitmap {
            if let Err(status) = self.services.bitmaps.clear_bitmap(bitmap) {
                log::debug!("Can't clear screen bitmap ({}), continuing", status);
            }
        }

        if self.driver.take().is_some() {
            log::debug!("Detached display driver");
        }

        if let Some(primary) = self.primary.take() {
            self.surfaces.destroy_surface(&*backend, primary);
        }
        self.forefront = None;

        let orphans = self.surfaces.destroy_all_registered(&*backend);
        if orphans > 0 {
            log::warn!("Released {} orphaned surface(s) during shutdown", orphans);
        }

        if let Some(clip) = self.clip.take() {
            clip.release(&*backend);
        }
        self.palette.release(&*backend);

        if let Some(binding) = self.binding.take() {
            log::debug!("Freed {} bytes of pseudo memory", binding.pseudo_memory().len());
        }
        self.color_depth = None;

        if let Some(conn) = self.conn.take() {
            let console = &self.services.console;
            console.set_switch_policy(SwitchPolicy::Pause);
            console.restore_console_state();
            console.restore_window_style();

            // The backend only accepts the final release from the window's thread.
            self.services
                .owner
                .run_on_owner_thread(Box::new(move || conn.release()));
            log::info!("Display connection released");
        }

        self.state = InitState::Unconnected;
    }

    /// Update palette entries `from..=to`; see [`PaletteManager::set_entries`].
    pub fn set_palette(
        &mut self,
        colors: &[Rgb],
        from: usize,
        to: usize,
        vsync: bool,
    ) -> Result<(), PaletteError> {
        let conn = self.conn.as_ref().ok_or(PaletteError::NotCreated)?;
        self.palette.set_entries(conn, from, to, colors, vsync)
    }

    /// Read the palette back from the backend.
    pub fn palette_entries(&self) -> Result<Vec<PaletteEntry>, PaletteError> {
        let conn = self.conn.as_ref().ok_or(PaletteError::NotCreated)?;
        self.palette.read_back(conn)
    }

    /// Wait for the next vertical blank. Does nothing when not connected.
    pub fn sync(&self) {
        if let Some(conn) = &self.conn {
            palette::wait_vblank(conn);
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == InitState::Ready
    }

    /// Monitor refresh rate in Hz, 0 when unknown.
    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    pub fn capabilities(&self) -> Option<&CapabilitySet> {
        self.conn.as_ref().map(BackendConnection::capabilities)
    }

    pub fn driver_info(&self) -> Option<&GfxDriverInfo> {
        self.driver.as_ref()
    }

    pub fn driver_binding(&self) -> Option<&DriverBinding> {
        self.binding.as_ref()
    }

    pub fn primary(&self) -> Option<&DisplaySurface> {
        self.primary.as_ref()
    }

    pub fn forefront(&self) -> Option<&BitmapHandle> {
        self.forefront.as_ref()
    }

    pub fn registered_surfaces(&self) -> &[RegisteredSurface] {
        self.surfaces.registered()
    }

    pub fn palette_table(&self) -> &PaletteTable {
        self.palette.table()
    }

    pub fn clip_region(&self) -> Option<&ClipRegion> {
        self.clip.as_ref()
    }

    pub fn color_depth(&self) -> Option<ColorDepth> {
        self.color_depth
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Message of the last failed [`initialize`](Self::initialize).
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether nothing is held: the state a fresh context starts in.
    pub fn is_baseline(&self) -> bool {
        self.state == InitState::Unconnected
            && self.conn.is_none()
            && self.primary.is_none()
            && self.forefront.is_none()
            && self.surfaces.is_empty()
            && self.palette.handle().is_none()
            && self.clip.is_none()
            && self.binding.is_none()
            && self.driver.is_none()
            && self.refresh_rate == 0
    }
}

impl Drop for DisplayContext {
    fn drop(&mut self) {
        if !self.is_baseline() {
            log::debug!("Display context dropped while live, shutting down");
            self.shutdown(None);
        }
    }
}

impl fmt::Debug for DisplayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayContext")
            .field("state", &self.state)
            .field("display_mode", &self.display_mode)
            .field("color_depth", &self.color_depth)
            .field("refresh_rate", &self.refresh_rate)
            .field("conn", &self.conn)
            .field("surfaces", &self.surfaces.len())
            .finish()
    }
}

/// Reject requests the driver can never satisfy.
///
/// Virtual screens are not supported: the virtual size must be zero or
/// equal to the physical one.
fn validate_request(
    width: u32,
    height: u32,
    virtual_width: u32,
    virtual_height: u32,
    color_depth: u32,
) -> Result<ColorDepth, InitError> {
    let virtual_size = (virtual_width, virtual_height);
    if virtual_size != (0, 0) && virtual_size != (width, height) {
        return Err(ModeError::UnsupportedVirtualResolution {
            width,
            height,
            virtual_width,
            virtual_height,
        }
        .into());
    }
    ColorDepth::from_bits(color_depth).ok_or(InitError::UnsupportedColorDepth(color_depth))
}

/// Current monitor refresh rate, or 0 when the backend can't tell.
fn query_refresh_rate(conn: &BackendConnection) -> u32 {
    match conn.backend().monitor_frequency(conn.interface()) {
        Ok(hz) => hz,
        Err(status) => {
            log::warn!("Can't query refresh rate ({}), assuming unknown", status);
            0
        }
    }
}
