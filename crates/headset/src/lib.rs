pub mod types;
pub mod analysis;
pub mod mock;

// Re-export the main types that users need
pub use types::{Headset, HeadsetError, HeadsetEvent};
pub use analysis::dominant_frequency;
pub use mock::MockHeadset;
