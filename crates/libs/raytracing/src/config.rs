use crate::render_mode::RenderMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    /// Frames that may be in flight on the GPU at once.
    pub frames_in_flight: usize,
    pub initial_mode: RenderMode,
    /// Primary ray plus one shadow ray.
    pub max_recursion_depth: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames_in_flight: 2,
            initial_mode: RenderMode::Rasterize,
            max_recursion_depth: 2,
        }
    }
}

impl RendererConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}
