use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// How a frame is produced. Exactly one path runs per frame.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumIter,
    EnumCount,
    EnumString,
    IntoStaticStr,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Rasterize,
    Raytrace,
}

impl RenderMode {
    /// Next mode in declaration order, wrapping around.
    pub fn next(self) -> Self {
        let index = Self::iter().position(|mode| mode == self).unwrap_or_default();
        Self::iter()
            .nth((index + 1) % Self::COUNT)
            .unwrap_or_default()
    }
}
