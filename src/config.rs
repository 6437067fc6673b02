use serde::Deserialize;

/// Weight given to the zeroframe cache when blending it over a stale pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossFadeWeight {
    /// Replace the pose with the cache whenever the caller reports a stall.
    #[default]
    Unit,
    /// Blend by the stall factor itself.
    Stall,
}

impl CrossFadeWeight {
    pub fn weight(self, stall: f32) -> f32 {
        match self {
            Self::Unit => 1.0,
            Self::Stall => stall.min(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Sub-frame offsets at or below this decode a single curve sample.
    pub subframe_epsilon: f32,
    pub cross_fade: CrossFadeWeight,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            subframe_epsilon: 0.001,
            cross_fade: CrossFadeWeight::Unit,
        }
    }
}
