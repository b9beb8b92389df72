pub mod overlay;
pub mod raster;
pub mod skeleton;
pub mod window;

pub use overlay::{DrawList, DrawOp, OverlayInput, OverlayRenderer, OverlayStats};
pub use skeleton::SKELETON_EDGES;
pub use window::{Display, HeadlessDisplay, UserAction};

#[cfg(feature = "desktop")]
pub use window::MinifbDisplay;
