use std::path::PathBuf;
use std::str::FromStr;

use app::anyhow::{anyhow, Context, Result};
use app::camera::{drag_for_yaw, InputEvent, Key};
use app::panel::{DebugPanel, PanelInfo, Slider};
use app::raytracing::{RenderMode, RendererConfig};
use app::{App, FrameCapture, RunConfig};
use clap::Parser;

mod args;

use args::Args;

const APP_NAME: &str = "Ground plane";

fn main() -> Result<()> {
    let args = Args::parse();
    let mode = RenderMode::from_str(&args.mode)
        .map_err(|_| anyhow!("Unknown render mode {}, expected rasterize or raytrace", args.mode))?;

    let config = RunConfig {
        renderer: RendererConfig {
            width: args.width,
            height: args.height,
            initial_mode: mode,
            ..Default::default()
        },
        frames: args.frames,
        shader_dir: args.shader_dir.clone(),
    };
    app::run(APP_NAME, config, GroundPlane::new(&args))
}

struct GroundPlane {
    toggle_every: Option<u64>,
    /// Horizontal drag per frame, in pixels.
    orbit_drag: f32,
    screenshot: Option<PathBuf>,
    panel: ScriptedPanel,
}

impl GroundPlane {
    fn new(args: &Args) -> Self {
        let viewport = [args.width as f32, args.height as f32];
        let mut settings = Vec::new();
        if let Some(value) = args.zoom_scale {
            settings.push(("Zoom intensity", value));
        }
        if let Some(value) = args.light_intensity {
            settings.push(("Light intensity", value));
        }

        Self {
            toggle_every: args.toggle_every.filter(|every| *every > 0),
            orbit_drag: drag_for_yaw(args.orbit.to_radians(), viewport),
            screenshot: args.screenshot.clone(),
            panel: ScriptedPanel { settings },
        }
    }
}

impl App for GroundPlane {
    type Panel = ScriptedPanel;

    fn input(&mut self, frame: u64) -> Vec<InputEvent> {
        let mut events = Vec::new();
        if let Some(every) = self.toggle_every {
            if frame > 0 && frame % every == 0 {
                events.push(InputEvent::KeyPressed(Key::R));
            }
        }
        if self.orbit_drag != 0.0 {
            events.push(InputEvent::Drag {
                dx: self.orbit_drag,
                dy: 0.0,
            });
        }
        events
    }

    fn panel(&mut self) -> &mut ScriptedPanel {
        &mut self.panel
    }

    fn capture_last_frame(&self) -> bool {
        self.screenshot.is_some()
    }

    fn on_last_frame(&mut self, capture: &FrameCapture) -> Result<()> {
        let Some(path) = &self.screenshot else {
            return Ok(());
        };
        let expected = capture.width as usize * capture.height as usize * 4;
        if capture.pixels.len() < expected {
            log::warn!(
                "Skipping screenshot, read back {} bytes for a {}x{} frame",
                capture.pixels.len(),
                capture.width,
                capture.height
            );
            return Ok(());
        }

        image::save_buffer(
            path,
            &capture.pixels[..expected],
            capture.width,
            capture.height,
            image::ColorType::Rgba8,
        )
        .with_context(|| format!("Failed to write screenshot {}", path.display()))?;
        log::info!("Saved screenshot to {}", path.display());
        Ok(())
    }
}

/// Applies the slider values given on the command line once, on the first frame.
struct ScriptedPanel {
    settings: Vec<(&'static str, f32)>,
}

impl DebugPanel for ScriptedPanel {
    fn build(&mut self, info: &PanelInfo, sliders: &mut [Slider<'_>]) {
        for (label, value) in self.settings.drain(..) {
            if let Some(slider) = sliders.iter_mut().find(|slider| slider.label == label) {
                slider.set(value);
                log::info!("{label}: {} (frame {})", slider.value, info.frame);
            }
        }
    }
}
