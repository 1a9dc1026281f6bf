//! Palette management for 8-bit indexed display modes.
//!
//! This module owns the 256-entry color table shared between the indexed
//! primary surface and the backend palette object:
//! - PaletteTable: the native-precision entries, flags included
//! - PaletteManager: palette object creation, attachment, bulk updates
//! - Channel expansion from 6-bit source precision to the backend's 8 bits
//! - Vertical-blank wait used to time palette updates

use crate::graphics::ddraw::caps::BackendConnection;
use crate::graphics::ddraw::common::{
    DisplayBackend, PaletteCaps, PaletteEntry, PaletteEntryFlags, PaletteError, PaletteId,
};
use crate::graphics::ddraw::surface::DisplaySurface;

pub const PALETTE_SIZE: usize = 256;

/// Source color with 6-bit channels (0..=63).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Expand a 6-bit channel to 8 bits.
///
/// The two most significant source bits are replicated into the two new low
/// bits so that 0x3F maps to 0xFF instead of 0xFC.
pub const fn expand_channel(value: u8) -> u8 {
    let v = value as u32;
    ((v << 2) | ((v & 0x30) >> 4)) as u8
}

/// The 256-entry color table in backend precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteTable {
    entries: [PaletteEntry; PALETTE_SIZE],
}

impl PaletteTable {
    pub fn new() -> Self {
        Self {
            entries: [PaletteEntry::default(); PALETTE_SIZE],
        }
    }

    /// Flag every entry no-collapse and reserved so the system never remaps
    /// or shares these colors with other applications.
    pub fn reserve_all(&mut self) {
        for entry in &mut self.entries {
            entry.flags = PaletteEntryFlags::NO_COLLAPSE | PaletteEntryFlags::RESERVED;
        }
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> PaletteEntry {
        self.entries[index]
    }

    /// Convert `colors[from..=to]` into the table. The range must already be valid.
    fn store_range(&mut self, colors: &[Rgb], from: usize, to: usize) {
        for (entry, color) in self.entries[from..=to].iter_mut().zip(&colors[from..=to]) {
            entry.red = expand_channel(color.r);
            entry.green = expand_channel(color.g);
            entry.blue = expand_channel(color.b);
        }
    }
}

impl Default for PaletteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the backend palette object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaletteHandle {
    id: PaletteId,
}

impl PaletteHandle {
    pub fn id(&self) -> PaletteId {
        self.id
    }
}

/// Check an inclusive palette range against the table and the input.
pub fn validate_range(from: usize, to: usize, colors_len: usize) -> Result<(), PaletteError> {
    if from > to || to >= PALETTE_SIZE {
        return Err(PaletteError::InvalidRange { from, to });
    }
    if to >= colors_len {
        return Err(PaletteError::TooFewColors {
            to,
            len: colors_len,
        });
    }
    Ok(())
}

/// Block until the next vertical blank begins.
///
/// Best effort: a failed wait is logged and ignored, a torn frame is
/// preferable to skipping the update.
pub fn wait_vblank(conn: &BackendConnection) {
    if let Err(status) = conn.backend().wait_vertical_blank(conn.interface()) {
        log::debug!("Vertical blank wait failed ({}), continuing", status);
    }
}

/// Owns the color table and the backend palette object.
#[derive(Debug, Default)]
pub struct PaletteManager {
    table: PaletteTable,
    handle: Option<PaletteHandle>,
}

impl PaletteManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the 256-color palette object and attach it to `surface`.
    ///
    /// On success the surface is marked indexed. If attaching fails the new
    /// palette object is released before returning.
    pub fn build(
        &mut self,
        conn: &BackendConnection,
        surface: &mut DisplaySurface,
    ) -> Result<PaletteHandle, PaletteError> {
        let backend = conn.backend();
        self.table.reserve_all();

        let id = backend
            .create_palette(
                conn.interface(),
                PaletteCaps::BITS_8 | PaletteCaps::ALLOW_256,
                self.table.entries(),
            )
            .map_err(|status| {
                log::error!("Can't create palette ({})", status);
                PaletteError::CreateFailed(status)
            })?;

        if let Err(status) = backend.attach_palette(surface.id(), id) {
            log::error!("Can't set palette ({})", status);
            backend.release_palette(id);
            return Err(PaletteError::AttachFailed(status));
        }

        surface.set_indexed();
        let handle = PaletteHandle { id };
        self.handle = Some(handle);
        log::debug!("Palette {} attached to surface {}", id, surface.id());
        Ok(handle)
    }

    /// Update entries `from..=to` from `colors`, optionally after a vblank wait.
    ///
    /// `colors` is indexed by palette slot, so it must hold at least `to + 1`
    /// colors. The backend sees one bulk write covering exactly the range.
    pub fn set_entries(
        &mut self,
        conn: &BackendConnection,
        from: usize,
        to: usize,
        colors: &[Rgb],
        vsync: bool,
    ) -> Result<(), PaletteError> {
        validate_range(from, to, colors.len())?;
        let handle = self.handle.ok_or(PaletteError::NotCreated)?;

        self.table.store_range(colors, from, to);

        if vsync {
            wait_vblank(conn);
        }

        conn.backend()
            .set_palette_entries(handle.id, from, &self.table.entries()[from..=to])
            .map_err(PaletteError::UpdateFailed)
    }

    /// Read the palette back from the backend.
    pub fn read_back(&self, conn: &BackendConnection) -> Result<Vec<PaletteEntry>, PaletteError> {
        let handle = self.handle.ok_or(PaletteError::NotCreated)?;
        conn.backend()
            .palette_entries(handle.id)
            .map_err(PaletteError::ReadBackFailed)
    }

    /// Release the backend palette object, if any, and reset the table.
    pub fn release(&mut self, backend: &dyn DisplayBackend) {
        if let Some(handle) = self.handle.take() {
            backend.release_palette(handle.id);
            log::debug!("Released palette {}", handle.id);
        }
        self.table = PaletteTable::new();
    }

    pub fn handle(&self) -> Option<PaletteHandle> {
        self.handle
    }

    pub fn table(&self) -> &PaletteTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::ddraw::caps;
    use crate::graphics::ddraw::common::{
        BackendStatus, ColorDepth, SurfaceRole, WindowHandle,
    };
    use crate::graphics::ddraw::soft::{SoftCall, SoftConfig, SoftDisplay, SoftFault};
    use crate::graphics::ddraw::surface::SurfaceManager;
    use crate::graphics::ddraw::ModeSwitch;
    use proptest::prelude::*;
    use std::sync::Arc;

    struct Fixture {
        display: Arc<SoftDisplay>,
        conn: Option<BackendConnection>,
        surfaces: SurfaceManager,
        primary: Option<DisplaySurface>,
    }

    impl Fixture {
        fn new() -> Self {
            let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
            display.set_mode(320, 200, 0, 0, ColorDepth::Indexed8).unwrap();
            let conn = caps::connect(display.clone(), WindowHandle(1)).unwrap();
            let mut surfaces = SurfaceManager::new();
            let primary = surfaces
                .create_surface(&conn, 0, 0, SurfaceRole::Primary, None)
                .unwrap();
            Self {
                display,
                conn: Some(conn),
                surfaces,
                primary: Some(primary),
            }
        }

        fn conn(&self) -> &BackendConnection {
            self.conn.as_ref().unwrap()
        }

        fn parts(&mut self) -> (&BackendConnection, &mut DisplaySurface) {
            (self.conn.as_ref().unwrap(), self.primary.as_mut().unwrap())
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            if let Some(primary) = self.primary.take() {
                self.surfaces.destroy_surface(&*self.display, primary);
            }
            if let Some(conn) = self.conn.take() {
                conn.release();
            }
        }
    }

    fn gray_ramp() -> Vec<Rgb> {
        (0..PALETTE_SIZE)
            .map(|i| {
                let v = (i % 64) as u8;
                Rgb::new(v, v, v)
            })
            .collect()
    }

    #[test]
    fn test_expand_channel_endpoints() {
        assert_eq!(expand_channel(0), 0);
        assert_eq!(expand_channel(0x3F), 0xFF);
        assert_eq!(expand_channel(0x20), 0x82);
        assert_eq!(expand_channel(0x10), 0x41);
        assert_eq!(expand_channel(0x0F), 0x3C);
    }

    proptest! {
        #[test]
        fn prop_expand_channel_matches_formula(v in 0u8..64) {
            let expected = ((v << 2) | ((v & 0x30) >> 4)) as u8;
            prop_assert_eq!(expand_channel(v), expected);
            // Top six bits of the result are the source value.
            prop_assert_eq!(expand_channel(v) >> 2, v);
        }

        #[test]
        fn prop_expand_channel_is_monotonic(a in 0u8..64, b in 0u8..64) {
            if a <= b {
                prop_assert!(expand_channel(a) <= expand_channel(b));
            }
        }
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(0, 255, 256).is_ok());
        assert!(validate_range(10, 10, 11).is_ok());
        assert_eq!(
            validate_range(5, 4, 256),
            Err(PaletteError::InvalidRange { from: 5, to: 4 })
        );
        assert_eq!(
            validate_range(0, 256, 300),
            Err(PaletteError::InvalidRange { from: 0, to: 256 })
        );
        assert_eq!(
            validate_range(0, 20, 16),
            Err(PaletteError::TooFewColors { to: 20, len: 16 })
        );
    }

    #[test]
    fn test_build_marks_surface_indexed() {
        let mut fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();

        let handle = manager.build(conn, primary).unwrap();
        assert!(primary.is_indexed());
        assert_eq!(manager.handle(), Some(handle));
        assert!(manager
            .table()
            .entries()
            .iter()
            .all(|e| e.flags == PaletteEntryFlags::NO_COLLAPSE | PaletteEntryFlags::RESERVED));

        manager.release(&*fx.display);
        assert_eq!(fx.display.snapshot().live_palettes, 0);
    }

    #[test]
    fn test_build_create_failure() {
        let mut fx = Fixture::new();
        fx.display.inject(SoftFault::CreatePalette);
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();

        let err = manager.build(conn, primary).unwrap_err();
        assert_eq!(err, PaletteError::CreateFailed(BackendStatus::OUT_OF_MEMORY));
        assert!(!primary.is_indexed());
        assert!(manager.handle().is_none());
    }

    #[test]
    fn test_build_attach_failure_releases_palette() {
        let mut fx = Fixture::new();
        fx.display.inject(SoftFault::AttachPalette);
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();

        let err = manager.build(conn, primary).unwrap_err();
        assert!(matches!(err, PaletteError::AttachFailed(_)));
        assert!(!primary.is_indexed());
        assert!(manager.handle().is_none());
        assert_eq!(fx.display.snapshot().live_palettes, 0);
    }

    #[test]
    fn test_set_entries_full_range_round_trip() {
        let mut fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();
        manager.build(conn, primary).unwrap();

        let colors = gray_ramp();
        manager.set_entries(fx.conn(), 0, 255, &colors, false).unwrap();

        let read = manager.read_back(fx.conn()).unwrap();
        assert_eq!(read.len(), PALETTE_SIZE);
        for (entry, color) in read.iter().zip(&colors) {
            assert_eq!(entry.red, expand_channel(color.r));
            assert_eq!(entry.green, expand_channel(color.g));
            assert_eq!(entry.blue, expand_channel(color.b));
        }
        assert_eq!(fx.display.snapshot().vblank_waits, 0);
        manager.release(&*fx.display);
    }

    #[test]
    fn test_set_entries_is_one_bulk_write_on_subrange() {
        let mut fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();
        manager.build(conn, primary).unwrap();
        fx.display.clear_journal();

        let colors = vec![Rgb::new(0x3F, 0x20, 0x01); PALETTE_SIZE];
        manager.set_entries(fx.conn(), 16, 31, &colors, false).unwrap();

        let writes: Vec<_> = fx
            .display
            .journal()
            .into_iter()
            .filter(|c| matches!(c, SoftCall::SetPaletteEntries { .. }))
            .collect();
        assert_eq!(writes.len(), 1);
        assert!(matches!(
            writes[0],
            SoftCall::SetPaletteEntries { start: 16, count: 16, .. }
        ));

        let read = manager.read_back(fx.conn()).unwrap();
        assert_eq!(read[15].red, 0);
        assert_eq!(read[16].red, 0xFF);
        assert_eq!(read[16].green, 0x82);
        assert_eq!(read[31].blue, 0x04);
        assert_eq!(read[32].red, 0);
        manager.release(&*fx.display);
    }

    #[test]
    fn test_set_entries_vsync_waits_once_before_write() {
        let mut fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();
        manager.build(conn, primary).unwrap();
        fx.display.clear_journal();
        fx.display.inject(SoftFault::VerticalBlank);

        let colors = vec![Rgb::new(0x3F, 0, 0); PALETTE_SIZE];
        manager.set_entries(fx.conn(), 0, 255, &colors, true).unwrap();

        let journal = fx.display.journal();
        let wait = journal
            .iter()
            .position(|c| matches!(c, SoftCall::WaitVerticalBlank))
            .expect("vblank wait expected");
        let write = journal
            .iter()
            .position(|c| matches!(c, SoftCall::SetPaletteEntries { .. }))
            .expect("palette write expected");
        assert!(wait < write);
        assert_eq!(fx.display.snapshot().vblank_waits, 1);
        manager.release(&*fx.display);
    }

    #[test]
    fn test_set_entries_rejects_bad_range_without_touching_table() {
        let mut fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let (conn, primary) = fx.parts();
        manager.build(conn, primary).unwrap();
        let before = manager.table().clone();

        let colors = vec![Rgb::new(1, 2, 3); PALETTE_SIZE];
        let err = manager
            .set_entries(fx.conn(), 200, 100, &colors, false)
            .unwrap_err();
        assert_eq!(err, PaletteError::InvalidRange { from: 200, to: 100 });
        assert_eq!(manager.table(), &before);
        manager.release(&*fx.display);
    }

    #[test]
    fn test_set_entries_without_palette() {
        let fx = Fixture::new();
        let mut manager = PaletteManager::new();
        let colors = vec![Rgb::default(); PALETTE_SIZE];
        assert_eq!(
            manager.set_entries(fx.conn(), 0, 255, &colors, false),
            Err(PaletteError::NotCreated)
        );
        assert_eq!(manager.table(), &PaletteTable::new());
    }
}
