mod config;
mod registry;

pub use config::{AspectRatio, EnhancementConfig};
pub use registry::{ModeRegistry, ModeSpec, ASPECT_RATIO_PLACEHOLDER};
