//! Display surfaces and their lifecycle
//!
//! [`SurfaceManager`] creates and destroys backend surfaces and keeps a
//! registry of every surface it handed out, so teardown can find surfaces that
//! leaked past their owner. [`BitmapHandle`] is the weak, generic view of a
//! surface handed to the rest of the rendering stack.

use std::sync::{Arc, Weak};

use crate::graphics::ddraw::caps::BackendConnection;
use crate::graphics::ddraw::common::{
    BitmapKind, DisplayBackend, MemoryClass, PixelFormat, SurfaceDesc, SurfaceError, SurfaceId,
    SurfaceRole,
};

// ==============================================================================
// Display Surface
// ==============================================================================

/// One hardware or pseudo surface.
///
/// Owning handle: not `Clone`. Destroy it through [`SurfaceManager::destroy_surface`].
#[derive(Debug)]
pub struct DisplaySurface {
    id: SurfaceId,
    width: u32,
    height: u32,
    format: PixelFormat,
    indexed: bool,
    role: SurfaceRole,
    alive: Arc<()>,
}

impl DisplaySurface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    /// Whether the surface displays through a palette.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Mark the surface as palette-indexed.
    pub fn set_indexed(&mut self) {
        self.indexed = true;
        self.format = PixelFormat::indexed8();
    }

    /// Replace the pixel format descriptor.
    pub fn set_format(&mut self, format: PixelFormat) {
        self.format = format;
    }

    fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }
}

// ==============================================================================
// Bitmap Handle
// ==============================================================================

/// Generic bitmap view of a surface.
///
/// Holds only a weak reference: once the surface is destroyed the handle
/// reports itself invalid. It is never destroyed on its own, only cleared.
#[derive(Debug, Clone)]
pub struct BitmapHandle {
    surface: SurfaceId,
    width: u32,
    height: u32,
    kind: BitmapKind,
    target: Weak<()>,
}

impl BitmapHandle {
    /// Wrap `surface` as a `width` x `height` bitmap.
    pub fn wrap(surface: &DisplaySurface, width: u32, height: u32, kind: BitmapKind) -> Self {
        Self {
            surface: surface.id(),
            width,
            height,
            kind,
            target: surface.liveness(),
        }
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> BitmapKind {
        self.kind
    }

    /// Whether the wrapped surface still exists.
    pub fn is_valid(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Whether this handle wraps `surface`.
    pub fn wraps(&self, surface: &DisplaySurface) -> bool {
        self.surface == surface.id() && Weak::ptr_eq(&self.target, &surface.liveness())
    }
}

impl PartialEq for BitmapHandle {
    fn eq(&self, other: &Self) -> bool {
        self.surface == other.surface
            && self.width == other.width
            && self.height == other.height
            && self.kind == other.kind
            && Weak::ptr_eq(&self.target, &other.target)
    }
}

impl Eq for BitmapHandle {}

// ==============================================================================
// Surface Manager
// ==============================================================================

/// Registry entry for a live surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredSurface {
    pub id: SurfaceId,
    pub role: SurfaceRole,
    pub width: u32,
    pub height: u32,
}

/// Creates, tracks, and destroys display surfaces.
#[derive(Debug, Default)]
pub struct SurfaceManager {
    registry: Vec<RegisteredSurface>,
}

impl SurfaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a surface through the backend and register it.
    ///
    /// At most one primary surface may exist at a time. Passing zero
    /// dimensions for a primary surface sizes it to the current mode.
    pub fn create_surface(
        &mut self,
        conn: &BackendConnection,
        width: u32,
        height: u32,
        role: SurfaceRole,
        memory: Option<MemoryClass>,
    ) -> Result<DisplaySurface, SurfaceError> {
        if role == SurfaceRole::Primary && self.primary().is_some() {
            return Err(SurfaceError::PrimaryAlreadyExists);
        }

        let desc = SurfaceDesc {
            width,
            height,
            role,
            memory,
        };
        let created = conn
            .backend()
            .create_surface(conn.interface(), &desc)
            .map_err(|status| SurfaceError::CreateFailed { role, status })?;

        self.registry.push(RegisteredSurface {
            id: created.id,
            role,
            width: created.width,
            height: created.height,
        });
        log::debug!(
            "Created {:?} surface {} ({}x{}, {} bpp)",
            role,
            created.id,
            created.width,
            created.height,
            created.format.bits_per_pixel
        );

        Ok(DisplaySurface {
            id: created.id,
            width: created.width,
            height: created.height,
            format: created.format,
            indexed: false,
            role,
            alive: Arc::new(()),
        })
    }

    /// Unregister `surface` and release its backend object.
    ///
    /// A surface that is no longer registered (already force-released) is
    /// left alone so the backend object is never released twice.
    pub fn destroy_surface(&mut self, backend: &dyn DisplayBackend, surface: DisplaySurface) {
        match self.position(surface.id) {
            Some(idx) => {
                self.registry.remove(idx);
                backend.release_surface(surface.id);
                log::debug!("Destroyed {:?} surface {}", surface.role, surface.id);
            }
            None => {
                log::warn!("Surface {} is not registered, skipping release", surface.id);
            }
        }
    }

    /// Force-release every surface still registered.
    ///
    /// Only teardown calls this; under correct operation the registry is
    /// already empty. Returns the number of orphans released.
    pub fn destroy_all_registered(&mut self, backend: &dyn DisplayBackend) -> usize {
        let orphans = std::mem::take(&mut self.registry);
        for entry in &orphans {
            log::warn!(
                "Releasing orphaned {:?} surface {} ({}x{})",
                entry.role,
                entry.id,
                entry.width,
                entry.height
            );
            backend.release_surface(entry.id);
        }
        orphans.len()
    }

    /// The registered primary surface, if any.
    pub fn primary(&self) -> Option<&RegisteredSurface> {
        self.registry.iter().find(|s| s.role == SurfaceRole::Primary)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.position(id).is_some()
    }

    pub fn registered(&self) -> &[RegisteredSurface] {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn position(&self, id: SurfaceId) -> Option<usize> {
        self.registry.iter().position(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::ddraw::caps;
    use crate::graphics::ddraw::common::{BackendStatus, ColorDepth, WindowHandle};
    use crate::graphics::ddraw::soft::{SoftConfig, SoftDisplay, SoftFault};
    use crate::graphics::ddraw::ModeSwitch;

    fn connected() -> (Arc<SoftDisplay>, BackendConnection) {
        let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
        display.set_mode(640, 480, 0, 0, ColorDepth::Rgb16).unwrap();
        let conn = caps::connect(display.clone(), WindowHandle(1)).unwrap();
        (display, conn)
    }

    #[test]
    fn test_create_primary_uses_mode_size() {
        let (display, conn) = connected();
        let mut manager = SurfaceManager::new();

        let primary = manager
            .create_surface(&conn, 0, 0, SurfaceRole::Primary, None)
            .unwrap();
        assert_eq!(primary.width(), 640);
        assert_eq!(primary.height(), 480);
        assert_eq!(primary.role(), SurfaceRole::Primary);
        assert!(!primary.is_indexed());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.primary().map(|p| p.id), Some(primary.id()));

        manager.destroy_surface(&*display, primary);
        assert!(manager.is_empty());
        assert_eq!(display.snapshot().live_surfaces, 0);
        conn.release();
    }

    #[test]
    fn test_second_primary_rejected() {
        let (display, conn) = connected();
        let mut manager = SurfaceManager::new();

        let primary = manager
            .create_surface(&conn, 0, 0, SurfaceRole::Primary, None)
            .unwrap();
        let second = manager.create_surface(&conn, 0, 0, SurfaceRole::Primary, None);
        assert_eq!(second.unwrap_err(), SurfaceError::PrimaryAlreadyExists);
        assert_eq!(manager.len(), 1);

        manager.destroy_surface(&*display, primary);
        conn.release();
    }

    #[test]
    fn test_create_failure_leaves_registry_untouched() {
        let (display, conn) = connected();
        display.inject(SoftFault::CreateSurface);
        let mut manager = SurfaceManager::new();

        let result = manager.create_surface(&conn, 64, 64, SurfaceRole::Secondary, Some(MemoryClass::Video));
        assert_eq!(
            result.unwrap_err(),
            SurfaceError::CreateFailed {
                role: SurfaceRole::Secondary,
                status: BackendStatus::OUT_OF_MEMORY,
            }
        );
        assert!(manager.is_empty());
        conn.release();
    }

    #[test]
    fn test_destroy_after_force_release_is_noop() {
        let (display, conn) = connected();
        let mut manager = SurfaceManager::new();

        let secondary = manager
            .create_surface(&conn, 32, 32, SurfaceRole::Secondary, Some(MemoryClass::System))
            .unwrap();
        assert_eq!(manager.destroy_all_registered(&*display), 1);
        assert_eq!(display.snapshot().surface_releases, 1);

        manager.destroy_surface(&*display, secondary);
        assert_eq!(display.snapshot().surface_releases, 1);
        assert!(manager.is_empty());
        conn.release();
    }

    #[test]
    fn test_destroy_all_registered_on_empty_registry() {
        let (display, conn) = connected();
        let mut manager = SurfaceManager::new();
        assert_eq!(manager.destroy_all_registered(&*display), 0);
        conn.release();
    }

    #[test]
    fn test_bitmap_handle_invalidated_by_destroy() {
        let (display, conn) = connected();
        let mut manager = SurfaceManager::new();
        let primary = manager
            .create_surface(&conn, 0, 0, SurfaceRole::Primary, None)
            .unwrap();

        let bmp = BitmapHandle::wrap(&primary, 640, 480, BitmapKind::Video);
        assert!(bmp.is_valid());
        assert!(bmp.wraps(&primary));
        assert_eq!(bmp.clone(), bmp);

        manager.destroy_surface(&*display, primary);
        assert!(!bmp.is_valid());
        conn.release();
    }
}
