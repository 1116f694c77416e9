pub mod driver;
pub mod waveform_generator;

pub use driver::MockHeadset;
