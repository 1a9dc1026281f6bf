//!
//! Backend connection and capability query.
//!
//! [`connect`] walks the backend handshake: create the basic interface, set
//! the cooperative level on the owning window, upgrade to the extended
//! interface, drop the basic one, and snapshot the hardware capabilities.
//! It is all-or-nothing: on any failure every interface it obtained is
//! released again and no [`BackendConnection`] escapes.
//!

use std::fmt;
use std::sync::Arc;

use crate::graphics::ddraw::common::{
    CapabilitySet, ConnectError, CooperativeLevel, DisplayBackend, InterfaceId, WindowHandle,
};

/// Exclusively-owned connection to the backend's extended interface.
///
/// Not `Clone`. Only [`BackendConnection::release`] gives the interface
/// back, and teardown runs that on the window-owner thread.
pub struct BackendConnection {
    backend: Arc<dyn DisplayBackend>,
    iface: InterfaceId,
    window: WindowHandle,
    caps: CapabilitySet,
}

impl BackendConnection {
    /// The backend this connection talks to.
    pub fn backend(&self) -> &dyn DisplayBackend {
        &*self.backend
    }

    /// Extended interface handle.
    pub fn interface(&self) -> InterfaceId {
        self.iface
    }

    /// Window the cooperative level was set on.
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    /// Capabilities captured at connect time.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    /// Reset the cooperative level and release the extended interface.
    ///
    /// Must run on the thread that owns the window.
    pub fn release(self) {
        if let Err(status) =
            self.backend
                .set_cooperative_level(self.iface, self.window, CooperativeLevel::Normal)
        {
            log::warn!("Can't reset cooperative level ({})", status);
        }
        self.backend.release_interface(self.iface);
        log::debug!("Released display interface {}", self.iface);
    }
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("iface", &self.iface)
            .field("window", &self.window)
            .field("caps", &self.caps)
            .finish()
    }
}

/// Interface reference released when it goes out of scope.
struct ScopedInterface<'a> {
    backend: &'a dyn DisplayBackend,
    id: InterfaceId,
}

impl ScopedInterface<'_> {
    /// Stop managing the reference and hand back the id.
    fn keep(self) -> InterfaceId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for ScopedInterface<'_> {
    fn drop(&mut self) {
        self.backend.release_interface(self.id);
    }
}

/// Open a connection to the display backend on behalf of `window`.
pub fn connect(
    backend: Arc<dyn DisplayBackend>,
    window: WindowHandle,
) -> Result<BackendConnection, ConnectError> {
    let basic = ScopedInterface {
        backend: &*backend,
        id: backend.create_interface().map_err(ConnectError::CreateFailed)?,
    };

    backend
        .set_cooperative_level(basic.id, window, CooperativeLevel::Normal)
        .map_err(ConnectError::CooperativeLevelRejected)?;

    let extended = ScopedInterface {
        backend: &*backend,
        id: backend
            .query_extended(basic.id)
            .map_err(ConnectError::UpgradeUnsupported)?,
    };
    // The extended interface holds its own reference.
    drop(basic);

    let caps = match backend.capabilities(extended.id) {
        Ok(caps) => caps,
        Err(status) => {
            log::error!("Can't get driver caps ({})", status);
            return Err(ConnectError::CapabilityQueryFailed(status));
        }
    };

    let iface = extended.keep();
    log::info!(
        "Connected to display backend: {} ({:?}, {} KiB video memory)",
        iface,
        caps.flags,
        caps.total_video_memory / 1024
    );

    Ok(BackendConnection {
        backend,
        iface,
        window,
        caps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::ddraw::common::BackendStatus;
    use crate::graphics::ddraw::soft::{SoftConfig, SoftDisplay, SoftFault};
    use rstest::rstest;

    fn display() -> Arc<SoftDisplay> {
        Arc::new(SoftDisplay::new(SoftConfig::default()))
    }

    #[test]
    fn test_connect_transfers_to_extended_interface() {
        let display = display();
        let conn = connect(display.clone(), WindowHandle(7)).unwrap();

        let snap = display.snapshot();
        assert_eq!(snap.live_interfaces, 1);
        assert_eq!(conn.window(), WindowHandle(7));
        assert_eq!(conn.capabilities(), &display.config().caps);

        conn.release();
        let snap = display.snapshot();
        assert_eq!(snap.live_interfaces, 0);
        assert_eq!(snap.cooperative_resets, 1);
    }

    #[rstest]
    #[case(SoftFault::CreateInterface, ConnectError::CreateFailed(BackendStatus::GENERIC))]
    #[case(
        SoftFault::CooperativeLevel,
        ConnectError::CooperativeLevelRejected(BackendStatus::INVALID_STATE)
    )]
    #[case(SoftFault::QueryExtended, ConnectError::UpgradeUnsupported(BackendStatus::UNSUPPORTED))]
    #[case(
        SoftFault::Capabilities,
        ConnectError::CapabilityQueryFailed(BackendStatus::GENERIC)
    )]
    fn test_connect_failure_is_all_or_nothing(#[case] fault: SoftFault, #[case] expected: ConnectError) {
        let display = display();
        display.inject(fault);

        let err = connect(display.clone(), WindowHandle(1)).unwrap_err();
        assert_eq!(err, expected);
        assert_eq!(display.snapshot().live_interfaces, 0);
    }
}
