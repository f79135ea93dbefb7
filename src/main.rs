// =============================================================================
// VULKAN BOOTSTRAP
// =============================================================================
//
// Brings up a Vulkan instance, picks the most capable GPU for the window
// surface, creates a logical device + queue, and clears the window every
// frame.
//
// STARTUP ORDER:
// 1. Config + logging
// 2. Instance (platform extensions, validation, debug report callback)
// 3. Window + surface
// 4. GPU ranking + logical device
// 5. Swapchain, depth-stencil, render pass, framebuffers
//
// Shutdown runs the same list backwards.
//
// =============================================================================

mod backend;
mod config;

use anyhow::Result;
use backend::sync::FrameCommands;
use backend::{InitError, Renderer, Window};
use config::Config;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
};

fn main() -> Result<()> {
    init_logging();

    let config = Config::load();
    log::info!("Starting Vulkan bootstrap");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `RUST_LOG` overrides the default `info` level
fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: per-frame objects, then the window, then
/// the device and instance.
struct App {
    config: Config,
    frame: Option<FrameCommands>,
    window: Option<Window>,
    renderer: Option<Renderer>,
    /// Why the event loop stopped early, if it did
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            frame: None,
            window: None,
            renderer: None,
            failure: None,
        }
    }

    fn init_vulkan(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let platform_extensions = backend::window::required_instance_extensions(event_loop)?;
        let mut renderer = Renderer::new(
            &self.config.instance_settings(),
            self.config.selection_settings(),
            &platform_extensions,
        )?;

        let window = Window::open(event_loop, &mut renderer, &self.config)?;
        let frame = FrameCommands::new(window.device_context())?;

        self.frame = Some(frame);
        self.window = Some(window);
        self.renderer = Some(renderer);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    fn render_frame(&mut self) -> Result<()> {
        let (Some(window), Some(frame)) = (self.window.as_mut(), self.frame.as_ref()) else {
            return Ok(());
        };

        let Some(image_index) = window.begin_render()? else {
            return Ok(());
        };
        let framebuffer = match window.framebuffer(image_index) {
            Some(framebuffer) => framebuffer,
            None => anyhow::bail!("No framebuffer for swapchain image {}", image_index),
        };

        frame.record_and_submit(
            window.render_pass(),
            framebuffer,
            window.surface_size(),
            self.config.graphics.clear_color,
        )?;
        window.end_render(&[frame.render_complete])
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        if e.downcast_ref::<InitError>().is_some() {
            log::error!("Unrecoverable initialization failure: {:#}", e);
        } else {
            log::error!("Fatal error: {:?}", e);
        }
        self.failure = Some(e);
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.failure.is_some() {
            return;
        }

        if let Err(e) = self.init_vulkan(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref window) = self.window {
            window.wait_idle();
        }
        self.frame = None;
        self.window = None;
        self.renderer = None;

        log::info!("Cleanup complete");
    }
}
