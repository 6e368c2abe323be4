pub mod grid_search;
pub mod preprocess;
pub mod seasonal;
pub mod smoothing;

// Re-exports for convenience
pub use grid_search::{GridSearch, Selection};
pub use preprocess::Preprocessor;
pub use seasonal::SeasonalProfile;
pub use smoothing::{DampedHolt, ModelState, SmoothingMode};
