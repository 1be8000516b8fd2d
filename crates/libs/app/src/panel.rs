use std::ops::RangeInclusive;

use raytracing::RenderMode;

/// Values the debug panel edits in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    /// Multiplier on the wheel zoom step.
    pub zoom_scale: f32,
    pub light_intensity: f32,
}

impl Tunables {
    pub const ZOOM_SCALE_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    pub const LIGHT_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;

    pub fn sliders(&mut self) -> [Slider<'_>; 2] {
        [
            Slider {
                label: "Zoom intensity",
                value: &mut self.zoom_scale,
                range: Self::ZOOM_SCALE_RANGE,
            },
            Slider {
                label: "Light intensity",
                value: &mut self.light_intensity,
                range: Self::LIGHT_INTENSITY_RANGE,
            },
        ]
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            zoom_scale: 10.0,
            light_intensity: 0.3,
        }
    }
}

/// A float the panel may edit, with the range its widget offers.
#[derive(Debug)]
pub struct Slider<'a> {
    pub label: &'static str,
    pub value: &'a mut f32,
    pub range: RangeInclusive<f32>,
}

impl Slider<'_> {
    /// Stores `value` clamped to the slider's range.
    pub fn set(&mut self, value: f32) {
        *self.value = value.clamp(*self.range.start(), *self.range.end());
    }
}

/// Read-only frame information shown next to the sliders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelInfo {
    pub mode: RenderMode,
    pub fps: u32,
    pub frame: u64,
}

/// Debug UI. Called once per frame, before the frame is rendered.
pub trait DebugPanel {
    fn build(&mut self, info: &PanelInfo, sliders: &mut [Slider<'_>]);
}

impl DebugPanel for () {
    fn build(&mut self, _info: &PanelInfo, _sliders: &mut [Slider<'_>]) {}
}
