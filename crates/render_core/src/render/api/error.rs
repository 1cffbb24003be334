//! Error types shared by every rendering subsystem

use crate::assets::mesh_cache::MeshCacheError;
use crate::config::ConfigError;

/// Rendering system errors
///
/// Comprehensive error type covering every failure surfaced by the renderer,
/// from configuration problems through resource exhaustion to backend failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    ///
    /// Occurs when a subsystem cannot be brought up, typically because the
    /// backend rejected a required object or a builtin resource failed to load.
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    ///
    /// Indicates failure while recording, submitting or presenting a frame.
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Backend-specific error occurred
    ///
    /// Wraps backend errors (Vulkan result codes and the like) in a generic form.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// A configuration value was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fixed-capacity table has no free slot
    #[error("No free {kind} slot (capacity {capacity})")]
    ResourceExhausted {
        /// Kind of slot that ran out
        kind: &'static str,
        /// Configured capacity of the table
        capacity: usize,
    },

    /// A named or indexed resource does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of resource looked up
        kind: &'static str,
        /// Name or identifier used for the lookup
        name: String,
    },

    /// An operation was attempted in a state that does not permit it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A byte range falls outside the target buffer
    #[error("Range [{offset}, {offset}+{size}) exceeds capacity {capacity}")]
    OutOfRange {
        /// Start of the requested range
        offset: u64,
        /// Length of the requested range
        size: u64,
        /// Capacity of the target
        capacity: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Mesh cache decoding error
    #[error("Mesh cache error: {0}")]
    MeshCache(#[from] MeshCacheError),
}

impl RenderError {
    /// Shorthand for a [`RenderError::NotFound`]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;
