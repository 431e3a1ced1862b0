pub mod render;

pub use render::{SlidingWindowRenderer, WholeSpaceRenderer};
