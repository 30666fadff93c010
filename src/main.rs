// =============================================================================
// SURFACE RENDERER - Vulkan device and swapchain lifecycle
// =============================================================================
//
// Opens a window, brings up a Vulkan device and swapchain for it, and draws a
// single triangle with two frames in flight.
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire a swapchain image
// 3. Submit the image's pre-recorded command buffer
// 4. Present
// Out-of-date swapchains are rebuilt in place; everything else is fatal.
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod session;

use anyhow::Result;
use config::Config;
use frame::FrameStatus;
use session::{RenderSession, SessionSettings};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    let (config, source) = Config::load();

    init_logging(&config);
    source.report();
    log::info!("Starting surface renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode preference: {:?} (FIFO fallback)", config.graphics.present_modes);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Config sets the default level, RUST_LOG overrides it.
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// The session drops before the window: the surface must not outlive it.
struct App {
    session: Option<RenderSession>,
    window: Option<Arc<Window>>,
    config: Config,
    is_fullscreen: bool,
    /// First fatal error; reported from main once the loop has exited.
    failure: Option<anyhow::Error>,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            session: None,
            window: None,
            config,
            is_fullscreen,
            failure: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            app_name: self.config.window.title.clone(),
            instance: self.config.instance_config(),
            present_modes: self.config.present_mode_preference(),
            clear_color: self.config.graphics.clear_color,
            vertex_shader: self.config.shaders.vertex.clone(),
            fragment_shader: self.config.shaders.fragment.clone(),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.failure.get_or_insert(error);
        event_loop.exit();
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        self.is_fullscreen = !self.is_fullscreen;

        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        if let Some(session) = &mut self.session {
            session.mark_stale();
        }
    }

    /// Title shows FPS and frame time, refreshed once per second.
    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        if let Some(window) = &self.window {
            let fps = self.frame_count as f32 / elapsed;
            let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title,
                fps,
                frame_time * 1000.0,
                mode
            ));
        }

        self.frame_count = 0;
        self.last_fps_update = now;
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match RenderSession::new(window.clone(), self.session_settings()) {
            Ok(session) => {
                log::info!("Rendering on {} ({:?})", session.device_name(), session.present_mode());
                self.session = Some(session);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(session) = &self.session {
                    if let Err(e) = session.wait_idle() {
                        log::warn!("Device did not go idle: {}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(session) = &mut self.session {
                    session.mark_stale();
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(session) = &mut self.session else {
                    return;
                };
                match session.draw_frame() {
                    Ok(Some(FrameStatus::Presented | FrameStatus::PresentedThenRebuilt)) => self.update_fps(),
                    Ok(Some(FrameStatus::Rebuilt) | None) => {}
                    Err(e) => {
                        let frames = session.frame_counter();
                        self.fail(
                            event_loop,
                            anyhow::Error::new(e).context(format!("Rendering stopped after {} frames", frames)),
                        );
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if !event.state.is_pressed() {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }

    /// Continuous redraw.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down while the window still exists.
        self.session = None;
        log::info!("Cleanup complete");
    }
}
