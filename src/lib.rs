//! Scene visual resolution and timeline composition for narrated story videos.
//!
//! A [`scene::Script`] goes in; every scene gets a visual (library clip,
//! generated still, evidence photo or solid fallback frame), each visual is
//! cut to its narration length, and the [`video::TimelineRenderer`] joins
//! them with evidence overlays and mixed audio into one file.

pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod scene;
pub mod video;

pub use config::Config;
pub use error::{Result, Stage, VideoError};
pub use pipeline::{Document, Pipeline, RunInputs, RunOutcome, RunRecord, Services};
