use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use ddgfx::cli::Cli;
use ddgfx::config::{self, GfxOptions};
use ddgfx::graphics::ddraw::{
    DisplayContext, Rgb, SoftConfig, SoftDisplay, WindowHandle, PALETTE_SIZE,
};
use ddgfx::logging;
use ddgfx::threading::OwnerThread;

/// Handle of the demo window owned by the owner thread.
const DEMO_WINDOW: WindowHandle = WindowHandle(1);

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => GfxOptions::default(),
    };
    let options = cli.merge_into_options(options)?;

    logging::init_logging(options.log_level, options.log_file.as_deref().map(Path::new))?;
    log::info!("ddgfx {} starting", env!("CARGO_PKG_VERSION"));
    log::debug!("Options: {:?}", options);

    let display = Arc::new(SoftDisplay::new(SoftConfig::default()));
    let owner = Arc::new(OwnerThread::spawn("window-owner").context("Can't start window thread")?);
    display.set_owner_thread(owner.thread_id());
    if let Some(step) = cli.fail_at {
        log::info!("Injecting failure at {:?}", step);
        display.inject(step.fault());
    }

    let mut ctx = DisplayContext::new(
        display.collaborators(DEMO_WINDOW, owner.clone()),
        options.display_mode,
    );

    let ok = run_cycle(&mut ctx, &options);

    let snap = display.snapshot();
    println!(
        "state: {:?}, surfaces: {}, palettes: {}, clippers: {}, interfaces: {}",
        ctx.state(),
        snap.live_surfaces,
        snap.live_palettes,
        snap.live_clippers,
        snap.live_interfaces
    );
    if !snap.is_released() {
        log::warn!("Backend objects left after shutdown: {:?}", snap);
        return Ok(ExitCode::FAILURE);
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Initialize, push a palette ramp when indexed, shut down.
fn run_cycle(ctx: &mut DisplayContext, options: &GfxOptions) -> bool {
    let res = options.resolution;
    let (vw, vh) = options.virtual_size();

    let bitmap = match ctx.initialize(res.width, res.height, vw, vh, options.color_depth.bits()) {
        Ok(bitmap) => bitmap,
        Err(e) => {
            println!("initialization failed: {}", e);
            return false;
        }
    };
    println!(
        "display ready: {}x{} {} at {} Hz",
        bitmap.width(),
        bitmap.height(),
        options.color_depth,
        ctx.refresh_rate()
    );
    if let Some(driver) = ctx.driver_info() {
        println!("video memory: {} KiB", driver.vid_mem / 1024);
    }

    let mut ok = true;
    if options.color_depth.is_indexed() {
        let ramp: Vec<Rgb> = (0..PALETTE_SIZE)
            .map(|i| {
                let v = (i / 4) as u8;
                Rgb::new(v, v, v)
            })
            .collect();
        if let Err(e) = ctx.set_palette(&ramp, 0, PALETTE_SIZE - 1, options.vsync) {
            println!("palette update failed: {}", e);
            ok = false;
        }
    }
    ctx.sync();

    ctx.shutdown(Some(&bitmap));
    ok
}
