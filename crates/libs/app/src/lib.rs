pub use anyhow;
pub use nalgebra::{self as na};
pub use raytracing;
pub use vulkan;

pub mod camera;
pub mod panel;
pub mod types;

use anyhow::{Context as _, Result};
use camera::{Camera, Controls, InputEvent};
use panel::{DebugPanel, PanelInfo, Tunables};
use raytracing::{
    Device as _, Format, FrameOrchestrator, FrameView, ImageDesc, ImageUsage, RendererConfig,
    ResourceState,
};
use resource_manager::ShaderDirectory;
use std::time::{Duration, Instant};
use types::{Mat4, Vec3};
use vulkan::{Context, ContextBuilder, Image};

pub trait App {
    type Panel: DebugPanel;

    /// Input that arrived before `frame` is rendered.
    fn input(&mut self, frame: u64) -> Vec<InputEvent>;

    fn panel(&mut self) -> &mut Self::Panel;

    /// Whether [`App::on_last_frame`] receives a readback of the final frame.
    fn capture_last_frame(&self) -> bool {
        false
    }

    fn on_last_frame(&mut self, capture: &FrameCapture) -> Result<()> {
        let _ = capture;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub renderer: RendererConfig,
    /// Frames to render before exiting.
    pub frames: u64,
    /// Searched for shader binaries before the default locations.
    pub shader_dir: Option<String>,
}

/// Tightly packed RGBA8 pixels of the presented image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCapture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn run<A: App>(app_name: &str, config: RunConfig, mut app: A) -> Result<()> {
    pretty_env_logger::init();

    let result = render_frames(app_name, &config, &mut app);
    if let Err(error) = &result {
        log::error!("{app_name} stopped: {error:#}");
    }
    result
}

fn render_frames<A: App>(app_name: &str, config: &RunConfig, app: &mut A) -> Result<()> {
    let shaders = match &config.shader_dir {
        Some(dir) => ShaderDirectory::with_dir(dir)?,
        None => ShaderDirectory::new(),
    };
    let mut base_app = BaseApp::new(app_name, config.renderer, &shaders)?;
    let mut controls = Controls::default();
    let mut frame_stats = FrameStats::default();
    let mut last_frame = Instant::now();

    for frame in 0..config.frames {
        let now = Instant::now();
        frame_stats.set_frame_time(now - last_frame);
        last_frame = now;

        for event in app.input(frame) {
            controls = controls.handle_event(&event);
        }

        let info = PanelInfo {
            mode: base_app.renderer.mode(),
            fps: frame_stats.fps_counter,
            frame,
        };
        app.panel().build(&info, &mut base_app.scene.tunables.sliders());

        base_app.draw(&controls)?;
        controls = controls.reset();
        frame_stats.tick();
    }

    base_app.renderer.wait_idle(&base_app.context)?;
    if app.capture_last_frame() {
        let capture = base_app.capture()?;
        app.on_last_frame(&capture)?;
    }
    base_app.shutdown()
}

/// Camera, world rotation and tunables: everything input changes between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneState {
    pub camera: Camera,
    pub tunables: Tunables,
    /// Rotation of the world around Y, in radians.
    pub world_angle: f32,
    viewport: [f32; 2],
}

impl SceneState {
    pub fn new(width: u32, height: u32) -> Self {
        let viewport = [width as f32, height.max(1) as f32];
        Self {
            camera: Camera::new(viewport[0] / viewport[1]),
            tunables: Tunables::default(),
            world_angle: 0.0,
            viewport,
        }
    }

    pub fn apply(&mut self, controls: &Controls) {
        self.camera = self
            .camera
            .update(controls, self.viewport, self.tunables.zoom_scale);
        self.world_angle += controls.world_rotation;
    }

    pub fn frame_view(&self) -> FrameView {
        FrameView {
            world: Mat4::from_axis_angle(&Vec3::y_axis(), self.world_angle),
            view: self.camera.view_matrix(),
            projection: self.camera.projection_matrix(),
            eye: self.camera.eye,
            light_intensity: self.tunables.light_intensity,
        }
    }
}

pub struct BaseApp {
    renderer: FrameOrchestrator<Context>,
    target: Image,
    pub scene: SceneState,
    pub context: Context,
}

impl BaseApp {
    fn new(app_name: &str, config: RendererConfig, shaders: &ShaderDirectory) -> Result<Self> {
        log::info!("Create application");

        let context = ContextBuilder::new().app_name(app_name).build()?;
        log::info!(
            "Rendering on {} ({} raytracing)",
            context.device_name(),
            context.raytracing_tier()
        );

        let target = context
            .create_image(&ImageDesc {
                label: "frame target",
                width: config.width,
                height: config.height,
                format: Format::Rgba8Unorm,
                usage: ImageUsage::RenderTarget,
                initial_state: ResourceState::Present,
            })
            .context("Failed to create the frame target")?;
        let renderer = FrameOrchestrator::new(&context, shaders, config)?;

        Ok(Self {
            renderer,
            target,
            scene: SceneState::new(config.width, config.height),
            context,
        })
    }

    pub fn renderer(&self) -> &FrameOrchestrator<Context> {
        &self.renderer
    }

    fn draw(&mut self, controls: &Controls) -> Result<()> {
        for _ in 0..controls.mode_toggles {
            self.renderer.toggle_mode();
        }
        self.scene.apply(controls);
        self.renderer
            .render(&self.context, &self.target, &self.scene.frame_view())?;
        Ok(())
    }

    fn capture(&self) -> Result<FrameCapture> {
        let config = self.renderer.config();
        let pixels = self
            .context
            .read_image(&self.target, ResourceState::Present)
            .context("Failed to read back the frame target")?;
        Ok(FrameCapture {
            width: config.width,
            height: config.height,
            pixels,
        })
    }

    fn shutdown(self) -> Result<()> {
        let Self {
            renderer,
            target,
            context,
            ..
        } = self;
        renderer.shutdown(&context)?;
        drop(target);
        drop(context);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FrameStats {
    pub frame_time: Duration,
    frame_time_ms_log: Queue<f32>,
    total_frame_count: u64,
    pub frame_count: u32,
    pub fps_counter: u32,
    timer: Duration,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frame_time: Default::default(),
            frame_time_ms_log: Queue::new(FrameStats::MAX_LOG_SIZE),
            total_frame_count: Default::default(),
            frame_count: Default::default(),
            fps_counter: Default::default(),
            timer: Default::default(),
        }
    }
}

impl FrameStats {
    const ONE_SEC: Duration = Duration::from_secs(1);
    const MAX_LOG_SIZE: usize = 1000;

    fn tick(&mut self) {
        self.frame_time_ms_log
            .push(self.frame_time.as_secs_f32() * 1000.0);

        self.total_frame_count += 1;
        self.frame_count += 1;
        self.timer += self.frame_time;

        // reset counter if a sec has passed
        if self.timer > FrameStats::ONE_SEC {
            self.fps_counter = self.frame_count;
            self.frame_count = 0;
            self.timer -= FrameStats::ONE_SEC;
            log::info!(
                "{} fps, {:.2} ms average frame time, {} frames total",
                self.fps_counter,
                self.frame_time_ms_log.average(),
                self.total_frame_count
            );
        }
    }

    fn set_frame_time(&mut self, frame_time: Duration) {
        self.frame_time = frame_time;
    }
}

#[derive(Debug)]
struct Queue<T>(Vec<T>, usize);

impl<T> Queue<T> {
    fn new(max_size: usize) -> Self {
        Self(Vec::with_capacity(max_size), max_size)
    }

    fn push(&mut self, value: T) {
        if self.0.len() == self.1 {
            self.0.remove(0);
        }
        self.0.push(value);
    }
}

impl Queue<f32> {
    fn average(&self) -> f32 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().sum::<f32>() / self.0.len() as f32
    }
}
