// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use strata_core::{init_tracing, FpsCounter, FrameClock};
use strata_platform::{client_size, is_zero_area};
use strata_render::{
    FrameOrchestrator, FrameOutcome, RenderConfig, RenderError, RenderSize, RenderState,
};
use strata_render_vk::VkBackend;
use tracing::{error, info, warn};

use strata_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{AppCfg, Args};

type Renderer = FrameOrchestrator<VkBackend>;

struct App {
    cfg: AppCfg,
    // Dropped before the window: the surface borrows its handles.
    renderer: Option<Renderer>,
    window: Option<Window>,
    clock: FrameClock,
    fps: FpsCounter,
    /// First fatal error; turned into the process exit status.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            renderer: None,
            window: None,
            clock: FrameClock::new(),
            fps: FpsCounter::new(),
            failure: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = event_loop.create_window(attrs)?;

        let backend = VkBackend::new(&window, &window)
            .map_err(|cause| RenderError::Startup { stage: "device", cause })?;

        let mut renderer = FrameOrchestrator::new(backend, self.cfg.render_config())?;
        let (w, h) = client_size(window.inner_size());
        renderer.init(RenderSize::new(w, h))?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure.get_or_insert(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.notify_closing();
            let stats = renderer.stats();
            info!(
                presented = stats.presented,
                dropped = stats.dropped,
                recreations = stats.recreations,
                per_slot = ?stats.submissions,
                "renderer finalized"
            );
        }
        self.window = None;
        event_loop.exit();
    }

    fn request_redraw_if_ready(&self) {
        let ready = self.renderer.as_ref().map(Renderer::state) == Some(RenderState::Ready);
        if let (true, Some(window)) = (ready, &self.window) {
            window.request_redraw();
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match renderer.render_frame(self.clock.tick()) {
            Ok(FrameOutcome::Presented { .. }) => self.fps.frame(),
            Ok(FrameOutcome::Dropped(reason)) => warn!(?reason, "frame dropped"),
            Ok(FrameOutcome::Suspended) => {
                self.fps.clear();
                self.clock.reset();
            }
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => return self.fail(event_loop, e.into()),
        }
        if let Some(fps) = self.fps.poll(Instant::now()) {
            info!("fps ~ {fps}");
        }
        self.request_redraw_if_ready();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() || self.failure.is_some() {
            return;
        }
        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        match self.start(event_loop) {
            Ok(()) => self.request_redraw_if_ready(),
            Err(e) => {
                let e = e.context("renderer could not start");
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(Window::id) != Some(window_id) {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let res: Result<(), RenderError> = match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                return self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                info!(
                    width = size.width,
                    height = size.height,
                    minimized = is_zero_area(size),
                    "resized"
                );
                let (w, h) = client_size(size);
                renderer.notify_resize(w, h)
            }
            WindowEvent::Occluded(occluded) => {
                info!(occluded, "occlusion changed");
                renderer.notify_minimized(occluded)
            }
            WindowEvent::RedrawRequested => return self.redraw(event_loop),
            _ => return,
        };

        match res {
            Ok(()) => self.request_redraw_if_ready(),
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        self.shutdown(event_loop);
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(args.config.as_deref())?;
    cfg.apply(&args);
    let rc: RenderConfig = cfg.render_config();
    info!(
        frames_in_flight = rc.frames_in_flight,
        vsync = rc.vsync,
        fence_timeout = ?rc.fence_timeout,
        "render config"
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
