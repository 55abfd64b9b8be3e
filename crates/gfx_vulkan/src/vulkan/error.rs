//! Vulkan backend error types

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A descriptor pool could not satisfy an allocation even after growing
    #[error("Descriptor pool exhausted: {requested} sets requested")]
    OutOfPoolMemory {
        /// Number of descriptor sets that were requested
        requested: usize,
    },

    /// Backend initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A required device extension was not enabled
    #[error("Missing device extension: {0}")]
    MissingExtension(&'static str),
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
