use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Target aspect ratio passed to the image model as a generation constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Wide,
        AspectRatio::Tall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "4:3",
            Self::Portrait => "3:4",
            Self::Wide => "16:9",
            Self::Tall => "9:16",
        }
    }

    /// Width over height.
    pub fn ratio(self) -> f64 {
        match self {
            Self::Square => 1.0,
            Self::Landscape => 4.0 / 3.0,
            Self::Portrait => 3.0 / 4.0,
            Self::Wide => 16.0 / 9.0,
            Self::Tall => 9.0 / 16.0,
        }
    }

    /// Pixel dimensions with the longest side equal to `longest`.
    pub fn dimensions(self, longest: u32) -> (u32, u32) {
        let ratio = self.ratio();
        if ratio >= 1.0 {
            (longest, ((longest as f64) / ratio).round().max(1.0) as u32)
        } else {
            (((longest as f64) * ratio).round().max(1.0) as u32, longest)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace(['x', 'X', '/'], ":");
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownAspectRatio(raw.trim().to_string()))
    }
}

/// User-selected enhancement settings. Persists across submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementConfig {
    pub aspect_ratio: AspectRatio,
    pub mode: String,
}

impl EnhancementConfig {
    pub fn new(mode: impl Into<String>, aspect_ratio: AspectRatio) -> Self {
        Self {
            aspect_ratio,
            mode: mode.into(),
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self::new("reconstruct", AspectRatio::Square)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_listed_ratio_and_common_spellings() {
        for ratio in AspectRatio::ALL {
            assert_eq!(ratio.as_str().parse::<AspectRatio>(), Ok(ratio));
        }
        assert_eq!("16x9".parse::<AspectRatio>(), Ok(AspectRatio::Wide));
        assert_eq!(" 3/4 ".parse::<AspectRatio>(), Ok(AspectRatio::Portrait));
    }

    #[test]
    fn rejects_unlisted_ratio() {
        assert_eq!(
            "21:9".parse::<AspectRatio>(),
            Err(ConfigError::UnknownAspectRatio("21:9".to_string()))
        );
    }

    #[test]
    fn serde_uses_literal_ratio_strings() -> anyhow::Result<()> {
        let config = EnhancementConfig::new("resize", AspectRatio::Tall);
        let encoded = serde_json::to_value(&config)?;
        assert_eq!(encoded["aspect_ratio"], serde_json::json!("9:16"));
        let decoded: EnhancementConfig = serde_json::from_value(encoded)?;
        assert_eq!(decoded, config);
        Ok(())
    }

    #[test]
    fn dimensions_follow_ratio() {
        assert_eq!(AspectRatio::Square.dimensions(64), (64, 64));
        assert_eq!(AspectRatio::Landscape.dimensions(64), (64, 48));
        assert_eq!(AspectRatio::Tall.dimensions(64), (36, 64));
    }

    #[test]
    fn default_matches_lab_startup() {
        let config = EnhancementConfig::default();
        assert_eq!(config.mode, "reconstruct");
        assert_eq!(config.aspect_ratio, AspectRatio::Square);
    }
}
