//! Buffer arena
//!
//! Large device buffers sub-allocated through a free list. The geometry system
//! keeps one arena each for vertices and indices, and every shader owns one for
//! its uniform blocks.

pub mod freelist;
pub mod renderbuffer;

pub use freelist::{FreeBlock, FreeList};
pub use renderbuffer::RenderBuffer;
