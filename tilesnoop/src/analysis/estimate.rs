//! Location estimation.
//!
//! Rectangle centres are bucketed per axis at a fixed precision and the
//! estimate is the frequency-weighted mean of the bucket centres. The two
//! axes are weighted independently.

use std::collections::BTreeMap;

use tracing::trace;

use super::rectangles::Rectangle;

/// The inferred viewing location of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationEstimate {
    pub lat: f64,
    pub lon: f64,
    /// Rectangles the estimate was built from.
    pub rectangles: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    count: u32,
    sum: f64,
}

impl Bucket {
    fn centre(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Frequency histogram of one coordinate axis.
#[derive(Debug, Clone, Default)]
pub struct AxisHistogram {
    precision: f64,
    buckets: BTreeMap<i64, Bucket>,
}

impl AxisHistogram {
    pub fn new(precision: f64) -> Self {
        Self {
            precision,
            buckets: BTreeMap::new(),
        }
    }

    /// Add one value to its bucket.
    pub fn add(&mut self, value: f64) {
        let key = (value * self.precision).trunc() as i64;
        let bucket = self.buckets.entry(key).or_default();
        bucket.count += 1;
        bucket.sum += value;
    }

    /// Distinct buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Count of the bucket holding `value`.
    #[cfg(test)]
    fn frequency(&self, value: f64) -> u32 {
        let key = (value * self.precision).trunc() as i64;
        self.buckets.get(&key).map_or(0, |b| b.count)
    }

    /// Frequency-weighted mean of the bucket centres, `None` when empty.
    pub fn weighted_mean(&self) -> Option<f64> {
        let total: u32 = self.buckets.values().map(|b| b.count).sum();
        if total == 0 {
            return None;
        }
        let weighted: f64 = self
            .buckets
            .values()
            .map(|b| b.centre() * b.count as f64)
            .sum();
        Some(weighted / total as f64)
    }
}

/// Estimate a location from the rectangles of one window.
///
/// Returns `None` when there are no rectangles.
pub fn estimate_location(rectangles: &[Rectangle], precision: f64) -> Option<LocationEstimate> {
    let mut lat = AxisHistogram::new(precision);
    let mut lon = AxisHistogram::new(precision);
    for rectangle in rectangles {
        lat.add(rectangle.lat);
        lon.add(rectangle.lon);
    }
    trace!(
        lat_buckets = lat.bucket_count(),
        lon_buckets = lon.bucket_count(),
        "Location histograms built"
    );

    Some(LocationEstimate {
        lat: lat.weighted_mean()?,
        lon: lon.weighted_mean()?,
        rectangles: rectangles.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rectangles_no_estimate() {
        assert!(estimate_location(&[], 10_000.0).is_none());
        assert!(AxisHistogram::new(10_000.0).weighted_mean().is_none());
    }

    #[test]
    fn test_single_rectangle_reproduces_centre() {
        let r = Rectangle::new(5, 2103, 2104, 1405, 1406);
        let estimate = estimate_location(&[r], 10_000.0).unwrap();
        assert_eq!(estimate.lat, r.lat);
        assert_eq!(estimate.lon, r.lon);
        assert_eq!(estimate.rectangles, 1);
    }

    #[test]
    fn test_frequency_weighting() {
        let mut axis = AxisHistogram::new(10.0);
        axis.add(1.0);
        axis.add(1.0);
        axis.add(1.0);
        axis.add(2.0);

        assert_eq!(axis.bucket_count(), 2);
        assert_eq!(axis.frequency(1.05), 3);
        assert_eq!(axis.weighted_mean(), Some(1.25));
    }

    #[test]
    fn test_negative_coordinates_bucket_separately() {
        let mut axis = AxisHistogram::new(10_000.0);
        axis.add(-33.86);
        axis.add(33.86);
        assert_eq!(axis.bucket_count(), 2);
        assert!(axis.weighted_mean().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_axes_are_independent() {
        let a = Rectangle::new(8, 10, 11, 20, 21);
        let b = Rectangle::new(8, 30, 31, 20, 21);
        let estimate = estimate_location(&[a, b], 10_000.0).unwrap();
        assert!((estimate.lat - a.lat).abs() < 1e-9);
        assert!((estimate.lon - (a.lon + b.lon) / 2.0).abs() < 1e-9);
    }
}
