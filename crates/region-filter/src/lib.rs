//! Region Eligibility Filtering
//!
//! Decides which detected objects are handed to a secondary network:
//! size bounds, class-id allow/deny lists and the producing component id.

mod class_ids;
mod error;
mod filter;

pub use class_ids::{deserialize_class_ids, parse_class_ids};
pub use error::{ClassIdParseError, FilterReject};
pub use filter::{RegionFilter, RegionFilterConfig, MIN_INPUT_OBJECT_HEIGHT, MIN_INPUT_OBJECT_WIDTH};
