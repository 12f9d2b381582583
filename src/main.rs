// =============================================================================
// VK-RENDERER - Vulkan bring-up and a single-triangle frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Acquire the next chain image (signals image_available)
// 2. Submit that image's pre-recorded commands (waits image_available,
//    signals render_finished)
// 3. Present the image (waits render_finished)
//
// Usage: vk-renderer [CONFIG_PATH]   (defaults to ./config.toml)
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;

use anyhow::{Context, Result};
use config::{Config, DebugConfig};
use renderer::Renderer;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, config_warning) = Config::load(config_path.as_deref());

    let sink = init_logging(&config.debug);
    if let Some(warning) = config_warning {
        log::warn!("{}", warning);
    }

    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            if error_needs_stderr(sink, log::log_enabled!(log::Level::Error)) {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Where `init_logging` sent the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSink {
    Stderr,
    File,
}

/// A fatal error must reach stderr even when the logger is elsewhere or muted.
fn error_needs_stderr(sink: LogSink, error_logged: bool) -> bool {
    sink != LogSink::Stderr || !error_logged
}

/// Route `log` output to stderr, or to `log_file` when `log_to_file` is set.
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(debug: &DebugConfig) -> LogSink {
    let mut builder = env_logger::Builder::new();

    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    } else {
        builder.parse_filters(&debug.log_level);
    }

    let mut sink = LogSink::Stderr;
    let file_error = if debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&debug.log_file)
        {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
                sink = LogSink::File;
                None
            }
            Err(e) => Some(e),
        }
    } else {
        None
    };

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Could not open log file {}: {}. Logging to stderr.", debug.log_file, e);
    }

    sink
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer must go before the window its
/// surface was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    config: Config,
    /// First fatal error; ends the loop and sets the exit code.
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.renderer = None;
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        // Fixed-size window: the chain is never rebuilt
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        if let WindowEvent::CloseRequested = event {
            log::info!("Close requested, shutting down...");
            // Waits for the device and releases everything before the window
            self.renderer = None;
            event_loop.exit();
        }
    }

    /// Draws one frame per loop iteration for as long as the window is open.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        if let Err(e) = renderer.draw_frame() {
            self.fail(event_loop, e.context("Frame loop failed"));
        }
    }
}
