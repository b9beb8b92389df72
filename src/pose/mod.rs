pub mod keypoint;

pub use keypoint::{Keypoint, KeypointMap, Landmark};
