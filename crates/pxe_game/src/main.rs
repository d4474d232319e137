//! Pixie Engine -- runtime entry point.
//!
//! A Lua entry script defines `Game` with `init()`, `update()` and
//! `draw(fraction)`. The engine drives it on a fixed 60Hz logical tick decoupled
//! from the render rate, presents a 320x240 framebuffer scaled into the window,
//! and can record every presented frame to an animated GIF.
//!
//! See `engine.rs` for the per-iteration order and `script_host.rs` for the VM
//! lifecycle.

mod app;
mod bindings;
mod capture;
mod config;
mod context;
mod dispatcher;
mod engine;
mod files;
mod images;
mod script_host;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use engine::EngineError;

/// Run a Lua game on the Pixie Engine.
#[derive(Parser)]
#[command(name = "pxe", version)]
struct Cli {
    /// Entry script defining the `Game` class
    entry: PathBuf,

    /// JSON engine configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Record every presented frame to this GIF file
    #[arg(long, value_name = "FILE.gif")]
    capture: Option<PathBuf>,

    /// Window scale factor over the 320x240 framebuffer
    #[arg(long)]
    scale: Option<u32>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::info!("Pixie Engine starting...");

    let result = config::resolve_config(cli.config.as_deref(), cli.scale, cli.capture)
        .map_err(EngineError::Config)
        .and_then(|config| app::run(&cli.entry, &config));

    match result {
        Ok(report) => {
            log::info!(
                "Exited cleanly after {} frames ({} captured)",
                report.iterations,
                report.captured_frames
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
