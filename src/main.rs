//! multicursor -- one virtual cursor per physical pointing device.
//!
//! Entry point: command line, logging, config, platform backends, and the
//! engine lifecycle.

mod capture;
mod config;
mod control;
mod device;
mod engine;
mod mirror;
mod platform;
mod presence;
mod render;
mod sampler;
mod scheduler;
mod shape;
mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use config::{Config, DEFAULT_CONFIG_FILE};
use engine::{Backends, Engine};
use store::ScreenBounds;

/// Fallback render-surface size when neither config nor the OS provides one.
const FALLBACK_SCREEN: (f64, f64) = (1920.0, 1080.0);

#[derive(Debug, Parser)]
#[command(version, about = "Multi-device virtual cursor multiplexer")]
struct Args {
    /// Settings file. Created with defaults on exit if absent.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write render messages to this file or FIFO instead of stdout.
    #[arg(long, value_name = "PATH")]
    render_output: Option<PathBuf>,

    /// Run without a shape sampler; every cursor keeps the arrow shape.
    #[arg(long)]
    no_sampler: bool,

    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("fatal: {info}");
        default_hook(info);
    }));
}

/// Render-surface geometry: config override, else the OS screen divided by
/// the scale factor, else a fixed fallback.
fn resolve_bounds(config: &Config) -> ScreenBounds {
    let detected = platform::detect_screen().map(|s| {
        let scale = config.screen.scale_factor;
        (f64::from(s.width) / scale, f64::from(s.height) / scale)
    });
    if detected.is_none() && (config.screen.width.is_none() || config.screen.height.is_none()) {
        log::warn!(
            "main: screen size not detected, using {}x{}",
            FALLBACK_SCREEN.0,
            FALLBACK_SCREEN.1
        );
    }
    let (dw, dh) = detected.unwrap_or(FALLBACK_SCREEN);
    let bounds = ScreenBounds::new(
        config.screen.width.unwrap_or(dw),
        config.screen.height.unwrap_or(dh),
    );
    log::info!("main: render surface {:?}", bounds);
    bounds
}

fn sampler_command(config: &Config, disabled: bool) -> Vec<String> {
    if disabled || !config.sampler.enabled {
        return Vec::new();
    }
    if config.sampler.command.is_empty() {
        sampler::default_command()
    } else {
        config.sampler.command.clone()
    }
}

fn build_backends(config: &Config, no_sampler: bool) -> Result<Backends, platform::PlatformError> {
    let capture = platform::create_input_capture()?;
    let enumerator = Arc::from(platform::create_device_enumerator()?);
    let writer = match platform::create_cursor_writer() {
        Ok(w) => Some(w),
        Err(e) => {
            log::warn!("main: OS cursor will not follow the active device: {e}");
            None
        }
    };
    Ok(Backends {
        capture,
        enumerator,
        writer,
        sampler_command: sampler_command(config, no_sampler),
    })
}

fn run(args: &Args) -> Result<(), String> {
    let config = Config::load_or_default(&args.config);
    let bounds = resolve_bounds(&config);

    let output = args
        .render_output
        .as_deref()
        .or(config.render.output.as_deref());
    let sink = render::open_sink(output).map_err(|e| {
        format!(
            "cannot open render output {}: {e}",
            output.map_or_else(|| "<stdout>".into(), |p: &Path| p.display().to_string())
        )
    })?;

    let backends = build_backends(&config, args.no_sampler).map_err(|e| e.to_string())?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    let engine = Engine::new(config, Some(args.config.clone()), bounds, backends, sink);
    rt.block_on(engine.run());

    // The stdin reader sits in a blocking read; do not wait for it.
    rt.shutdown_timeout(Duration::from_millis(100));
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    log::info!("multicursor v{}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("main: {e}");
            ExitCode::FAILURE
        }
    }
}
