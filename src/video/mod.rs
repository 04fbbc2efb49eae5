pub mod ffmpeg;
pub mod filters;
pub mod generator;
pub mod transform;

pub use ffmpeg::{FfmpegEngine, FfmpegJob, MediaEngine};
pub use generator::{RenderReport, TimelineRenderer};
pub use transform::SceneTransform;
