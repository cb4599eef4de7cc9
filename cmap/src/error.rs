use thiserror::Error;

/// Errors that can occur when working with a concurrent map
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CmapError {
    /// A constructor or bucket operation was handed an out-of-range or missing argument
    #[error("Illegal parameter: {0}")]
    IllegalParameter(String),
}

pub type Result<T> = std::result::Result<T, CmapError>;

impl CmapError {
    pub(crate) fn illegal_parameter(msg: impl Into<String>) -> Self {
        CmapError::IllegalParameter(msg.into())
    }
}
