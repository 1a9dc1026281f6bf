//!
//! Driver binding: hooks the display backend into the generic screen driver.
//!
//! Binding records the screen geometry, declares the surface linearly
//! addressable, computes the usable video memory, reserves the pseudo
//! surface memory used as a software staging area, and installs the four
//! backend-specific operations into the screen vtable.
//!

use crate::graphics::ddraw::caps::BackendConnection;
use crate::graphics::ddraw::common::{BindError, ColorDepth, MemoryClass};

/// Scanlines of pseudo surface memory reserved, independent of screen height.
pub const PSEUDO_SCANLINES: usize = 2048;

/// Generic description of the active screen driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GfxDriverInfo {
    /// Screen width in pixels.
    pub width: u32,
    /// Screen height in pixels.
    pub height: u32,
    /// Surface memory is linear; callers never need to switch banks.
    pub linear: bool,
    /// Usable video memory in bytes, including the primary surface.
    pub vid_mem: u64,
}

/// Where a vtable entry's implementation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOrigin {
    /// Generic software routine for the given depth.
    Generic(ColorDepth),
    /// Display-backend override.
    Backend,
}

/// One vtable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtableOp {
    pub name: &'static str,
    pub origin: OpOrigin,
}

impl VtableOp {
    const fn generic(name: &'static str, depth: ColorDepth) -> Self {
        Self {
            name,
            origin: OpOrigin::Generic(depth),
        }
    }

    const fn backend(name: &'static str) -> Self {
        Self {
            name,
            origin: OpOrigin::Backend,
        }
    }
}

/// Pixel-format operation table of the screen bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenVtable {
    pub color_depth: ColorDepth,
    pub unwrite_bank: VtableOp,
    pub acquire: VtableOp,
    pub release: VtableOp,
    pub created_sub_bitmap: VtableOp,
    pub putpixel: VtableOp,
    pub getpixel: VtableOp,
    pub hline: VtableOp,
    pub vline: VtableOp,
    pub rectfill: VtableOp,
    pub clear_to_color: VtableOp,
    pub blit_to_self: VtableOp,
    pub draw_sprite: VtableOp,
}

impl ScreenVtable {
    /// The stock software table for `depth`.
    pub const fn generic(depth: ColorDepth) -> Self {
        Self {
            color_depth: depth,
            unwrite_bank: VtableOp::generic("unwrite_bank", depth),
            acquire: VtableOp::generic("acquire", depth),
            release: VtableOp::generic("release", depth),
            created_sub_bitmap: VtableOp::generic("created_sub_bitmap", depth),
            putpixel: VtableOp::generic("putpixel", depth),
            getpixel: VtableOp::generic("getpixel", depth),
            hline: VtableOp::generic("hline", depth),
            vline: VtableOp::generic("vline", depth),
            rectfill: VtableOp::generic("rectfill", depth),
            clear_to_color: VtableOp::generic("clear_to_color", depth),
            blit_to_self: VtableOp::generic("blit_to_self", depth),
            draw_sprite: VtableOp::generic("draw_sprite", depth),
        }
    }

    /// The generic table for `depth` with the surface lock/unlock, bank
    /// unwrite and sub-bitmap hooks routed to the backend.
    pub const fn for_backend(depth: ColorDepth) -> Self {
        let mut table = Self::generic(depth);
        table.unwrite_bank = VtableOp::backend("unwrite_bank");
        table.acquire = VtableOp::backend("acquire");
        table.release = VtableOp::backend("release");
        table.created_sub_bitmap = VtableOp::backend("created_sub_bitmap");
        table
    }

    /// All slots in declaration order.
    pub fn ops(&self) -> [VtableOp; 12] {
        [
            self.unwrite_bank,
            self.acquire,
            self.release,
            self.created_sub_bitmap,
            self.putpixel,
            self.getpixel,
            self.hline,
            self.vline,
            self.rectfill,
            self.clear_to_color,
            self.blit_to_self,
            self.draw_sprite,
        ]
    }
}

/// Software staging buffer standing in for non-mapped video memory.
pub struct PseudoMemory {
    bytes: Vec<u8>,
}

impl PseudoMemory {
    /// Reserve `len` zeroed bytes without aborting on allocation failure.
    pub fn allocate(len: usize) -> Result<Self, BindError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| BindError::OutOfMemory { bytes: len })?;
        bytes.resize(len, 0);
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Start of the staging line `line`, if it exists.
    pub fn line_mut(&mut self, line: usize, bytes_per_line: usize) -> Option<&mut [u8]> {
        let start = line.checked_mul(bytes_per_line)?;
        let end = start.checked_add(bytes_per_line)?;
        self.bytes.get_mut(start..end)
    }
}

impl std::fmt::Debug for PseudoMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoMemory").field("len", &self.bytes.len()).finish()
    }
}

/// Everything installed by [`bind`]; released as a unit by dropping it.
#[derive(Debug)]
pub struct DriverBinding {
    vtable: ScreenVtable,
    pseudo_mem: PseudoMemory,
}

impl DriverBinding {
    pub fn vtable(&self) -> &ScreenVtable {
        &self.vtable
    }

    pub fn pseudo_memory(&self) -> &PseudoMemory {
        &self.pseudo_mem
    }

    pub fn pseudo_memory_mut(&mut self) -> &mut PseudoMemory {
        &mut self.pseudo_mem
    }
}

/// Bytes of pseudo memory reserved for `depth`.
pub const fn pseudo_memory_size(depth: ColorDepth) -> usize {
    PSEUDO_SCANLINES * depth.bytes_per_pixel()
}

/// Bind the backend to the generic screen driver described by `driver`.
pub fn bind(
    driver: &mut GfxDriverInfo,
    conn: &BackendConnection,
    width: u32,
    height: u32,
    depth: ColorDepth,
) -> Result<DriverBinding, BindError> {
    driver.width = width;
    driver.height = height;
    driver.linear = true;

    let free = match conn
        .backend()
        .available_video_memory(conn.interface(), MemoryClass::Video)
    {
        Ok(bytes) => bytes,
        Err(status) => {
            log::warn!("Can't query available video memory ({}), assuming none", status);
            0
        }
    };
    let screen = u64::from(width) * u64::from(height) * depth.bytes_per_pixel() as u64;
    driver.vid_mem = free + screen;

    let pseudo_mem = PseudoMemory::allocate(pseudo_memory_size(depth))?;

    log::debug!(
        "Bound {}x{} {} driver: {} bytes video memory, {} bytes pseudo memory",
        width,
        height,
        depth,
        driver.vid_mem,
        pseudo_mem.len()
    );

    Ok(DriverBinding {
        vtable: ScreenVtable::for_backend(depth),
        pseudo_mem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::ddraw::caps;
    use crate::graphics::ddraw::common::WindowHandle;
    use crate::graphics::ddraw::soft::{SoftConfig, SoftDisplay, SoftFault};
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    #[case(ColorDepth::Indexed8)]
    #[case(ColorDepth::Rgb15)]
    #[case(ColorDepth::Rgb16)]
    #[case(ColorDepth::Rgb24)]
    #[case(ColorDepth::Rgb32)]
    fn test_bind_computes_memory_and_vtable(#[case] depth: ColorDepth) {
        let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
        let conn = caps::connect(display.clone(), WindowHandle(1)).unwrap();
        let mut driver = GfxDriverInfo::default();

        let binding = bind(&mut driver, &conn, 640, 480, depth).unwrap();

        let bpp = depth.bytes_per_pixel() as u64;
        assert_eq!(driver.width, 640);
        assert_eq!(driver.height, 480);
        assert!(driver.linear);
        assert_eq!(
            driver.vid_mem,
            display.config().free_video_memory + 640 * 480 * bpp
        );
        assert_eq!(binding.pseudo_memory().len(), PSEUDO_SCANLINES * bpp as usize);

        let table = binding.vtable();
        assert_eq!(table.color_depth, depth);
        let overridden: Vec<_> = table
            .ops()
            .iter()
            .filter(|op| op.origin == OpOrigin::Backend)
            .map(|op| op.name)
            .collect();
        assert_eq!(
            overridden,
            vec!["unwrite_bank", "acquire", "release", "created_sub_bitmap"]
        );
        assert!(table.ops()[4..]
            .iter()
            .all(|op| op.origin == OpOrigin::Generic(depth)));
        conn.release();
    }

    #[test]
    fn test_bind_degrades_without_video_memory_query() {
        let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
        display.inject(SoftFault::VideoMemory);
        let conn = caps::connect(display.clone(), WindowHandle(1)).unwrap();
        let mut driver = GfxDriverInfo::default();

        bind(&mut driver, &conn, 320, 200, ColorDepth::Indexed8).unwrap();
        assert_eq!(driver.vid_mem, 320 * 200);
        conn.release();
    }

    #[test]
    fn test_pseudo_memory_out_of_memory() {
        let err = PseudoMemory::allocate(usize::MAX).unwrap_err();
        assert_eq!(err, BindError::OutOfMemory { bytes: usize::MAX });
    }

    #[test]
    fn test_pseudo_memory_lines() {
        let mut mem = PseudoMemory::allocate(pseudo_memory_size(ColorDepth::Rgb16)).unwrap();
        assert!(!mem.is_empty());
        assert_eq!(mem.line_mut(0, 640 * 2).map(|l| l.len()), Some(1280));
        assert!(mem.line_mut(PSEUDO_SCANLINES, 2).is_none());
        assert!(mem.line_mut(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_generic_table_has_no_backend_ops() {
        let table = ScreenVtable::generic(ColorDepth::Rgb32);
        assert!(table
            .ops()
            .iter()
            .all(|op| op.origin == OpOrigin::Generic(ColorDepth::Rgb32)));
    }
}
