use clap::Parser;
use std::path::PathBuf;

/// Ground plane drawn by rasterization or by ray tracing
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, value_parser, default_value_t = 1280)]
    pub width: u32,

    #[clap(long, value_parser, default_value_t = 720)]
    pub height: u32,

    /// Frames to render before exiting
    #[clap(short, long, value_parser, default_value_t = 120)]
    pub frames: u64,

    /// Render mode of the first frame: rasterize or raytrace
    #[clap(short, long, value_parser, default_value = "rasterize")]
    pub mode: String,

    /// Switch render mode every N frames, as if R was pressed
    #[clap(long, value_parser)]
    pub toggle_every: Option<u64>,

    /// Orbit the camera around its target by this many degrees per frame
    #[clap(long, value_parser, default_value_t = 0.0)]
    pub orbit: f32,

    /// Zoom intensity slider value, 0 to 10
    #[clap(long, value_parser)]
    pub zoom_scale: Option<f32>,

    /// Light intensity slider value, 0 to 1
    #[clap(long, value_parser)]
    pub light_intensity: Option<f32>,

    /// Directory holding the compiled shaders, searched before ./spv
    #[clap(long, value_parser)]
    pub shader_dir: Option<String>,

    /// Write the last frame to this PNG file
    #[clap(short, long, value_parser)]
    pub screenshot: Option<PathBuf>,
}
