mod camera;
mod input_state;

use std::sync::Arc;
use std::time::Instant;
use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::camera::ViewCamera;
use crate::app::input_state::InputState;
use crate::renderer::config::RenderConfig;
use crate::renderer::Renderer;

const WINDOW_TITLE: &str = "Gravwell";
const WINDOW_WIDTH: f64 = 1920.0;
const WINDOW_HEIGHT: f64 = 1080.0;

pub struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,

    // State
    input_state: InputState,
    camera: ViewCamera,
    start_time: Instant,
    prev_frame_time: Instant,
    delta_time_secs: f32,
    fps_timer_secs: f32,
    fps_frames: u32,
    close_requested: bool,
    fatal: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Result<Self> {
        Ok(Self {
            config,
            window: None,
            renderer: None,

            input_state: InputState::default(),
            camera: ViewCamera::new(),
            start_time: Instant::now(),
            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            fps_timer_secs: 0.0,
            fps_frames: 0,
            close_requested: false,
            fatal: None,
        })
    }

    /// Drive the event loop until the window closes or a fatal error
    /// unwinds out of the frame loop.
    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(self)?;

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.shutdown();
        }

        match self.fatal.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, report: Report) {
        self.fatal = Some(report);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        self.camera.update(
            self.input_state.pan_direction(),
            self.input_state.zoom_direction(),
            self.input_state.take_reset(),
            self.delta_time_secs,
        );
        let params = self.camera.frame_params(self.start_time.elapsed().as_secs_f32());

        if let Err(report) = renderer.draw(params) {
            self.fail(event_loop, report);
            return;
        }

        self.fps_frames += 1;
        self.fps_timer_secs += self.delta_time_secs;
        if self.fps_timer_secs >= 1.0 {
            let offset = self.camera.offset();
            log::info!(
                "{} fps | pan ({:.3}, {:.3}) | zoom {:.3}",
                self.fps_frames, offset.x, offset.y, self.camera.zoom(),
            );
            self.fps_timer_secs -= 1.0;
            self.fps_frames = 0;
        }
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time.duration_since(self.prev_frame_time).as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(WINDOW_TITLE)
                .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => {
                    self.fail(event_loop, eyre!("failed to create window: {err}"));
                    return;
                }
            }
        }

        if self.renderer.is_none() {
            let window = self.window.as_ref().cloned();
            if let Some(window) = window {
                match Renderer::new(window, self.config.clone()) {
                    Ok(renderer) => self.renderer = Some(renderer),
                    Err(report) => self.fail(event_loop, report),
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        self.input_state.process_window_events(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.logical_key == Key::Named(NamedKey::Escape)
                {
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
