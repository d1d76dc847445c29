mod history;
mod slider;
mod view;

pub use history::{EnhancementResult, SessionHistory, DEFAULT_HISTORY_CAPACITY};
pub use slider::{
    position_for_pointer, BoundingBox, ComparisonSlider, SliderLayout, INITIAL_POSITION,
};
pub use view::ActiveView;
