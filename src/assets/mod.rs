pub mod clip_library;
pub mod sfx;

pub use clip_library::{ClipEntry, ClipLibrary, UsageLedger};
pub use sfx::SfxMatcher;
