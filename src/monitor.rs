use crate::geometry::Point;
use std::collections::BTreeMap;

/// Running extrema for one monitored quantity: the values, where they were
/// attained, and when. Populated lazily; `min <= max` once both are set.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ExtremaBlock {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_location: Option<Point>,
    pub max_location: Option<Point>,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
}

impl ExtremaBlock {
    /// Record a new maximum if it improves on the stored one by more than
    /// the tolerance.
    pub fn consider_max(&mut self, value: f64, location: Point, time: f64, tolerance: f64) {
        if self.max.map_or(true, |m| value > m + tolerance) {
            self.max = Some(value);
            self.max_location = Some(location);
            self.max_time = Some(time);
        }
    }

    pub fn consider_min(&mut self, value: f64, location: Point, time: f64, tolerance: f64) {
        if self.min.map_or(true, |m| value < m - tolerance) {
            self.min = Some(value);
            self.min_location = Some(location);
            self.min_time = Some(time);
        }
    }
}

/// Extrema-monitoring registration: which quantities (or derived
/// expressions) to watch, over which cells, during which time window.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Monitor {
    pub blocks: BTreeMap<String, ExtremaBlock>,
    pub polygon: Option<Vec<Point>>,
    pub time_interval: Option<(f64, f64)>,
    /// Cells whose centroid lies strictly inside the polygon; computed once
    /// at registration. `None` means every cell.
    pub indices: Option<Vec<usize>>,
}

impl Monitor {
    pub fn wants_time(&self, time: f64) -> bool {
        match self.time_interval {
            Some((t0, t1)) => time >= t0 && time <= t1,
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::ExtremaBlock;
    use crate::geometry::Point;

    #[test]
    fn improvements_must_clear_the_tolerance() {
        let mut block = ExtremaBlock::default();
        let here = Point::new(1.0, 2.0);

        block.consider_max(5.0, here, 0.0, 1e-3);
        assert_eq!(block.max, Some(5.0));
        assert_eq!(block.max_time, Some(0.0));

        // Within tolerance: the earlier record stands.
        block.consider_max(5.0005, here, 1.0, 1e-3);
        assert_eq!(block.max, Some(5.0));
        assert_eq!(block.max_time, Some(0.0));

        block.consider_max(5.1, Point::new(3.0, 4.0), 2.0, 1e-3);
        assert_eq!(block.max, Some(5.1));
        assert_eq!(block.max_location, Some(Point::new(3.0, 4.0)));
        assert_eq!(block.max_time, Some(2.0));
    }

    #[test]
    fn min_and_max_are_independent() {
        let mut block = ExtremaBlock::default();
        let here = Point::default();

        block.consider_min(-1.0, here, 0.0, 0.0);
        block.consider_max(1.0, here, 0.0, 0.0);
        assert!(block.min.unwrap() <= block.max.unwrap());
    }
}
