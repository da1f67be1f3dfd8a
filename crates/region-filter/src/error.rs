//! Filter Rejection Reasons

use thiserror::Error;

/// Why a region was excluded from inference
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterReject {
    /// Region smaller than the configured minimum
    #[error("region {width}x{height} is below minimum {min_width}x{min_height}")]
    TooSmall {
        width: f32,
        height: f32,
        min_width: u32,
        min_height: u32,
    },

    /// Region larger than the configured maximum
    #[error("region {width}x{height} exceeds maximum {max_width}x{max_height}")]
    TooLarge {
        width: f32,
        height: f32,
        max_width: u32,
        max_height: u32,
    },

    /// Region produced by a component we do not operate on
    #[error("region from component {actual}, operating on component {expected}")]
    ComponentMismatch { expected: i32, actual: i32 },

    /// Class id missing from the allow list
    #[error("class id {0} not in operate-on list")]
    ClassNotSelected(i32),

    /// Class id present in the deny list
    #[error("class id {0} is filtered out")]
    ClassFilteredOut(i32),
}

impl FilterReject {
    /// Short label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReject::TooSmall { .. } => "too_small",
            FilterReject::TooLarge { .. } => "too_large",
            FilterReject::ComponentMismatch { .. } => "component_mismatch",
            FilterReject::ClassNotSelected(_) => "class_not_selected",
            FilterReject::ClassFilteredOut(_) => "class_filtered_out",
        }
    }
}

/// Error parsing a class-id list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid class id '{token}' in list '{input}'")]
pub struct ClassIdParseError {
    pub input: String,
    pub token: String,
}
