use crate::errors::SessionError;
use crate::images::SharedImage;

/// The image pair currently on screen. `enhanced` never exists without
/// `original`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveView {
    original: Option<SharedImage>,
    enhanced: Option<SharedImage>,
}

impl ActiveView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_original(original: SharedImage) -> Self {
        Self {
            original: Some(original),
            enhanced: None,
        }
    }

    pub fn pair(original: SharedImage, enhanced: SharedImage) -> Self {
        Self {
            original: Some(original),
            enhanced: Some(enhanced),
        }
    }

    pub fn original(&self) -> Option<&SharedImage> {
        self.original.as_ref()
    }

    pub fn enhanced(&self) -> Option<&SharedImage> {
        self.enhanced.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_none()
    }

    pub fn set_enhanced(&mut self, enhanced: SharedImage) -> Result<(), SessionError> {
        if self.original.is_none() {
            return Err(SessionError::NoImage);
        }
        self.enhanced = Some(enhanced);
        Ok(())
    }

    /// Drops the result but keeps the original ("re-adjust").
    pub fn clear_enhanced(&mut self) {
        self.enhanced = None;
    }

    pub fn clear(&mut self) {
        self.original = None;
        self.enhanced = None;
    }
}
