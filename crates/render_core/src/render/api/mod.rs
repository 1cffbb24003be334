//! Public rendering API
//!
//! Errors, handle types and the backend device traits that every rendering
//! subsystem is written against.

pub mod device;
pub mod error;
pub mod handles;
pub mod types;

// Re-export commonly used types
pub use device::{BufferDevice, FrameDevice, PassDevice, PipelineDevice, RenderDevice, TextureDevice};
pub use error::{BackendResult, RenderError, RenderResult};
pub use handles::*;
pub use types::*;
