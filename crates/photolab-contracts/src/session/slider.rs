use crate::images::{same_image, SharedImage};

pub const INITIAL_POSITION: f64 = 50.0;

/// Horizontal extent of the widget, in the same units as pointer events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub width: f64,
}

impl BoundingBox {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }
}

/// Geometry of one composite frame for a given frame width.
///
/// `before_width` is always the full frame width: the before image is laid
/// out at full size and only its left `clip_width` is shown, so the visible
/// slice lines up with the after image underneath.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderLayout {
    pub frame_width: f64,
    pub clip_width: f64,
    pub before_width: f64,
    pub handle_x: f64,
}

/// Divider position in percent for a pointer at `pointer_x`, clamped to
/// [0, 100]. `None` when the box has no width or the input is not finite.
pub fn position_for_pointer(pointer_x: f64, bounds: BoundingBox) -> Option<f64> {
    if !pointer_x.is_finite() || !bounds.left.is_finite() || !(bounds.width > 0.0) {
        return None;
    }
    Some((100.0 * (pointer_x - bounds.left) / bounds.width).clamp(0.0, 100.0))
}

/// Before/after divider state.
#[derive(Debug, Clone)]
pub struct ComparisonSlider {
    position: f64,
    pair: Option<(SharedImage, SharedImage)>,
}

impl Default for ComparisonSlider {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonSlider {
    pub fn new() -> Self {
        Self {
            position: INITIAL_POSITION,
            pair: None,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn pair(&self) -> Option<(&SharedImage, &SharedImage)> {
        self.pair.as_ref().map(|(before, after)| (before, after))
    }

    /// Attaches a before/after pair. A pair that differs from the current one
    /// resets the divider; returns whether that happened.
    pub fn bind(&mut self, before: &SharedImage, after: &SharedImage) -> bool {
        let unchanged = self
            .pair
            .as_ref()
            .map(|(current_before, current_after)| {
                same_image(current_before, before) && same_image(current_after, after)
            })
            .unwrap_or(false);
        if unchanged {
            return false;
        }
        self.pair = Some((before.clone(), after.clone()));
        self.position = INITIAL_POSITION;
        true
    }

    pub fn unbind(&mut self) {
        self.pair = None;
        self.position = INITIAL_POSITION;
    }

    /// Applies a move event. Returns the new position, or `None` when the
    /// event was ignored.
    pub fn pointer_move(&mut self, pointer_x: f64, bounds: BoundingBox) -> Option<f64> {
        let position = position_for_pointer(pointer_x, bounds)?;
        self.position = position;
        Some(position)
    }

    pub fn set_position(&mut self, percent: f64) -> f64 {
        if percent.is_finite() {
            self.position = percent.clamp(0.0, 100.0);
        }
        self.position
    }

    pub fn layout(&self, frame_width: f64) -> SliderLayout {
        let frame_width = frame_width.max(0.0);
        let clip_width = frame_width * self.position / 100.0;
        SliderLayout {
            frame_width,
            clip_width,
            before_width: frame_width,
            handle_x: clip_width,
        }
    }
}
