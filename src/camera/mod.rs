pub mod capture;
pub mod encode;

pub use capture::{open_source, Frame, FrameSource, SyntheticSource};
pub use encode::FrameEncoder;
