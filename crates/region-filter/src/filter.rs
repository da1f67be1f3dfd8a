//! Region filter for secondary inference

use std::collections::BTreeSet;

use frame_meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::class_ids::deserialize_class_ids;
use crate::error::FilterReject;

/// Smallest region width the converter accepts
pub const MIN_INPUT_OBJECT_WIDTH: u32 = 16;
/// Smallest region height the converter accepts
pub const MIN_INPUT_OBJECT_HEIGHT: u32 = 16;

/// Region filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFilterConfig {
    /// Minimum region width (px), floored to [`MIN_INPUT_OBJECT_WIDTH`]
    pub min_width: u32,
    /// Minimum region height (px), floored to [`MIN_INPUT_OBJECT_HEIGHT`]
    pub min_height: u32,
    /// Maximum region width (px), 0 for unbounded
    pub max_width: u32,
    /// Maximum region height (px), 0 for unbounded
    pub max_height: u32,
    /// Only operate on objects produced by this component, -1 for any
    pub operate_on_component_id: i32,
    /// Class ids to operate on, empty for all
    #[serde(deserialize_with = "deserialize_class_ids")]
    pub operate_on_class_ids: Vec<i32>,
    /// Class ids never operated on
    #[serde(deserialize_with = "deserialize_class_ids")]
    pub filter_out_class_ids: Vec<i32>,
}

impl Default for RegionFilterConfig {
    fn default() -> Self {
        Self {
            min_width: MIN_INPUT_OBJECT_WIDTH,
            min_height: MIN_INPUT_OBJECT_HEIGHT,
            max_width: 0,
            max_height: 0,
            operate_on_component_id: -1,
            operate_on_class_ids: Vec::new(),
            filter_out_class_ids: Vec::new(),
        }
    }
}

/// Eligibility checks applied to every candidate region
#[derive(Debug, Clone)]
pub struct RegionFilter {
    min_width: u32,
    min_height: u32,
    max_width: u32,
    max_height: u32,
    operate_on_component_id: i32,
    operate_on: BTreeSet<i32>,
    filter_out: BTreeSet<i32>,
}

impl RegionFilter {
    /// Create a new filter with given config
    pub fn new(config: &RegionFilterConfig) -> Self {
        Self {
            min_width: config.min_width.max(MIN_INPUT_OBJECT_WIDTH),
            min_height: config.min_height.max(MIN_INPUT_OBJECT_HEIGHT),
            max_width: config.max_width,
            max_height: config.max_height,
            operate_on_component_id: config.operate_on_component_id,
            operate_on: config.operate_on_class_ids.iter().copied().collect(),
            filter_out: config.filter_out_class_ids.iter().copied().collect(),
        }
    }

    /// Effective minimum size after flooring
    pub fn min_size(&self) -> (u32, u32) {
        (self.min_width, self.min_height)
    }

    /// True when detections of this class must be dropped
    pub fn is_filtered_out(&self, class_id: i32) -> bool {
        self.filter_out.contains(&class_id)
    }

    /// Check whether an object is eligible for inference
    pub fn check(&self, object: &ObjectMeta) -> Result<(), FilterReject> {
        let result = self.check_inner(object);
        if let Err(reason) = &result {
            debug!(
                object_id = ?object.object_id,
                class_id = object.class_id,
                reason = reason.as_str(),
                "Region skipped"
            );
        }
        result
    }

    fn check_inner(&self, object: &ObjectMeta) -> Result<(), FilterReject> {
        if self.operate_on_component_id > -1
            && object.component_id != self.operate_on_component_id
        {
            return Err(FilterReject::ComponentMismatch {
                expected: self.operate_on_component_id,
                actual: object.component_id,
            });
        }

        self.check_size(object.rect.width, object.rect.height)?;

        if !self.operate_on.is_empty() && !self.operate_on.contains(&object.class_id) {
            return Err(FilterReject::ClassNotSelected(object.class_id));
        }

        if self.is_filtered_out(object.class_id) {
            return Err(FilterReject::ClassFilteredOut(object.class_id));
        }

        Ok(())
    }

    /// Check region dimensions against the size bounds
    pub fn check_size(&self, width: f32, height: f32) -> Result<(), FilterReject> {
        if width < self.min_width as f32 || height < self.min_height as f32 {
            return Err(FilterReject::TooSmall {
                width,
                height,
                min_width: self.min_width,
                min_height: self.min_height,
            });
        }

        let too_wide = self.max_width > 0 && width > self.max_width as f32;
        let too_tall = self.max_height > 0 && height > self.max_height as f32;
        if too_wide || too_tall {
            return Err(FilterReject::TooLarge {
                width,
                height,
                max_width: self.max_width,
                max_height: self.max_height,
            });
        }

        Ok(())
    }
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self::new(&RegionFilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_meta::Rect;
    use proptest::prelude::*;

    fn object(class_id: i32, w: f32, h: f32) -> ObjectMeta {
        ObjectMeta::tracked(1, class_id, 1, Rect::new(0.0, 0.0, w, h))
    }

    #[test]
    fn test_minimum_is_floored() {
        let filter = RegionFilter::new(&RegionFilterConfig {
            min_width: 4,
            min_height: 40,
            ..Default::default()
        });
        assert_eq!(filter.min_size(), (16, 40));
        assert!(matches!(
            filter.check(&object(0, 10.0, 10.0)),
            Err(FilterReject::TooSmall { .. })
        ));
    }

    #[test]
    fn test_max_zero_is_unbounded() {
        let filter = RegionFilter::default();
        assert!(filter.check(&object(0, 4000.0, 4000.0)).is_ok());

        let bounded = RegionFilter::new(&RegionFilterConfig {
            max_width: 200,
            ..Default::default()
        });
        assert!(matches!(
            bounded.check(&object(0, 201.0, 50.0)),
            Err(FilterReject::TooLarge { .. })
        ));
        assert!(bounded.check(&object(0, 200.0, 5000.0)).is_ok());
    }

    #[test]
    fn test_class_lists() {
        let filter = RegionFilter::new(&RegionFilterConfig {
            operate_on_class_ids: vec![1, 3],
            filter_out_class_ids: vec![3],
            ..Default::default()
        });
        assert!(filter.check(&object(1, 32.0, 32.0)).is_ok());
        assert_eq!(
            filter.check(&object(2, 32.0, 32.0)),
            Err(FilterReject::ClassNotSelected(2))
        );
        assert_eq!(
            filter.check(&object(3, 32.0, 32.0)),
            Err(FilterReject::ClassFilteredOut(3))
        );
    }

    #[test]
    fn test_component_id() {
        let filter = RegionFilter::new(&RegionFilterConfig {
            operate_on_component_id: 2,
            ..Default::default()
        });
        assert_eq!(
            filter.check(&object(0, 32.0, 32.0)),
            Err(FilterReject::ComponentMismatch { expected: 2, actual: 1 })
        );

        let mut from_two = object(0, 32.0, 32.0);
        from_two.component_id = 2;
        assert!(filter.check(&from_two).is_ok());
    }

    #[test]
    fn test_config_accepts_string_lists() {
        let config: RegionFilterConfig = serde_json::from_str(
            r#"{"operate_on_class_ids": "0:2:3", "filter_out_class_ids": [7]}"#,
        )
        .unwrap();
        assert_eq!(config.operate_on_class_ids, vec![0, 2, 3]);
        assert_eq!(config.filter_out_class_ids, vec![7]);
        assert_eq!(config.min_width, 16);
        assert_eq!(config.operate_on_component_id, -1);
    }

    proptest! {
        #[test]
        fn prop_size_bounds(w in 0.0f32..512.0, h in 0.0f32..512.0) {
            let filter = RegionFilter::new(&RegionFilterConfig {
                min_width: 32,
                min_height: 24,
                max_width: 256,
                max_height: 0,
                ..Default::default()
            });
            let ok = filter.check_size(w, h).is_ok();
            let expected = w >= 32.0 && h >= 24.0 && w <= 256.0;
            prop_assert_eq!(ok, expected);
        }
    }
}
