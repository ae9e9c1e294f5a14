//! Client for a remote Hopfield associative memory: a 35×35 bipolar pattern
//! grid edited locally, captured from a camera, trained into and recalled
//! from the memory service, and played back as a slideshow.

#[path = "core/capture.rs"]
pub mod capture;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/grid.rs"]
pub mod grid;

#[path = "core/http.rs"]
pub mod http;

#[path = "core/paths.rs"]
pub mod paths;

#[path = "core/playback.rs"]
pub mod playback;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/render.rs"]
pub mod render;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/store.rs"]
pub mod store;

#[path = "core/task.rs"]
pub mod task;

#[cfg(test)]
#[path = "core/testing.rs"]
mod testing;

pub use capture::{binarize, CapturePipeline, FrameSource, RgbaFrame, SweepCamera};
pub use config::SessionConfig;
pub use error::{Result, SessionError, ValidationError};
pub use grid::{Cell, Grid, GridModel, GridView, GRID_SIZE};
pub use http::HttpBackend;
pub use playback::PlaybackController;
pub use render::{RenderSurface, Surface, TextSurface};
pub use session::Session;
pub use store::{MemoryBackend, PatternIndex, PatternStore, Submission};
