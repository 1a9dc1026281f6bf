//! Clip region for windowed display
//!
//! In a shared (windowed) display the primary surface covers the whole
//! screen, so drawing must be clipped to the owning window or it paints over
//! whatever overlaps it. Fullscreen exclusive mode never needs one.

use crate::graphics::ddraw::caps::BackendConnection;
use crate::graphics::ddraw::common::{ClipError, ClipperId, DisplayBackend, WindowHandle};

/// A backend clipper bound to one window.
#[derive(Debug, PartialEq, Eq)]
pub struct ClipRegion {
    id: ClipperId,
    window: WindowHandle,
}

impl ClipRegion {
    pub fn id(&self) -> ClipperId {
        self.id
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn release(self, backend: &dyn DisplayBackend) {
        backend.release_clipper(self.id);
        log::debug!("Released clipper {} for {}", self.id, self.window);
    }
}

/// Create a clipper and bind it to `window`.
///
/// A clipper that could not be bound is released before returning.
pub fn create_clipper(conn: &BackendConnection, window: WindowHandle) -> Result<ClipRegion, ClipError> {
    let backend = conn.backend();
    let id = backend
        .create_clipper(conn.interface())
        .map_err(ClipError::CreateFailed)?;

    if let Err(status) = backend.set_clipper_window(id, window) {
        backend.release_clipper(id);
        return Err(ClipError::SetWindowFailed(status));
    }

    log::debug!("Clipper {} bound to {}", id, window);
    Ok(ClipRegion { id, window })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::ddraw::caps;
    use crate::graphics::ddraw::common::BackendStatus;
    use crate::graphics::ddraw::soft::{SoftConfig, SoftDisplay, SoftFault};
    use std::sync::Arc;

    fn connected() -> (Arc<SoftDisplay>, BackendConnection) {
        let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
        let conn = caps::connect(display.clone(), WindowHandle(3)).unwrap();
        (display, conn)
    }

    #[test]
    fn test_create_and_release() {
        let (display, conn) = connected();
        let clip = create_clipper(&conn, WindowHandle(3)).unwrap();
        assert_eq!(clip.window(), WindowHandle(3));
        assert_eq!(display.snapshot().live_clippers, 1);

        clip.release(&*display);
        assert_eq!(display.snapshot().live_clippers, 0);
        conn.release();
    }

    #[test]
    fn test_create_failure() {
        let (display, conn) = connected();
        display.inject(SoftFault::CreateClipper);
        assert_eq!(
            create_clipper(&conn, WindowHandle(3)),
            Err(ClipError::CreateFailed(BackendStatus::GENERIC))
        );
        conn.release();
    }

    #[test]
    fn test_set_window_failure_releases_clipper() {
        let (display, conn) = connected();
        display.inject(SoftFault::SetClipperWindow);
        assert_eq!(
            create_clipper(&conn, WindowHandle(3)),
            Err(ClipError::SetWindowFailed(BackendStatus::GENERIC))
        );
        assert_eq!(display.snapshot().live_clippers, 0);
        conn.release();
    }
}
