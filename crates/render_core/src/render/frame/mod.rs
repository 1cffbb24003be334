//! Frame pacing
//!
//! The [`FrameCoordinator`] drives acquire, record, submit and present for a
//! fixed number of frames in flight and rebuilds the swapchain when it goes
//! stale.

pub mod coordinator;

pub use coordinator::{FrameCoordinator, FrameInfo, FrameState, FrameSync};
