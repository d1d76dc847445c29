use crate::errors::ConfigError;
use crate::modes::{EnhancementConfig, ModeRegistry};

/// Joins the user's note onto the mode template.
pub const NOTE_CONNECTOR: &str = " Nota extra: ";

/// Base instruction for the configured mode, with the ratio interpolated.
pub fn base_prompt(
    modes: &ModeRegistry,
    config: &EnhancementConfig,
) -> Result<String, ConfigError> {
    let mode = modes.ensure(&config.mode)?;
    Ok(mode.render(config.aspect_ratio))
}

/// Builds the instruction sent to the image model.
///
/// A note that is empty after trimming is treated as absent. Unknown modes
/// are rejected rather than mapped to a default template.
pub fn build_prompt(
    modes: &ModeRegistry,
    config: &EnhancementConfig,
    note: &str,
) -> Result<String, ConfigError> {
    let base = base_prompt(modes, config)?;
    let note = note.trim();
    if note.is_empty() {
        return Ok(base);
    }
    Ok(format!("{base}{NOTE_CONNECTOR}{note}"))
}
