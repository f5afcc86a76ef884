use std::ops::{Add, Mul, Sub};

/// A point (or displacement) in the plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z-component of the cross product; twice the signed area of the
    /// triangle (origin, self, other).
    pub fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other - self).norm()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, a: f64) -> Point {
        Point::new(self.x * a, self.y * a)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point::new(x, y)
    }
}

/// Whether `point` lies strictly inside the polygon, by the even-odd rule.
/// Points on an edge count as outside.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let a = polygon[j];
        let b = polygon[i];

        // Reject points sitting on the segment a-b.
        let ab = b - a;
        let ap = point - a;
        if ab.cross(ap).abs() == 0.0
            && ap.dot(ab) >= 0.0
            && ap.dot(ab) <= ab.dot(ab)
        {
            return false;
        }

        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Indices of the points lying strictly inside the polygon.
pub fn points_in_polygon(points: &[Point], polygon: &[Point]) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, &p)| point_in_polygon(p, polygon))
        .map(|(i, _)| i)
        .collect()
}

/// Distance from a point to the segment a-b.
pub fn distance_to_segment(point: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return point.distance_to(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance_to(a + ab * t)
}

#[cfg(test)]
mod test {
    use super::{distance_to_segment, point_in_polygon, points_in_polygon, Point};

    fn unit_square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ]
    }

    #[test]
    fn polygon_containment() {
        let square = unit_square();
        assert!(point_in_polygon(Point::new(0.5, 0.5), &square));
        assert!(!point_in_polygon(Point::new(1.5, 0.5), &square));
        assert!(!point_in_polygon(Point::new(-0.1, 0.5), &square));

        // On the boundary is not strictly inside
        assert!(!point_in_polygon(Point::new(0.0, 0.5), &square));
        assert!(!point_in_polygon(Point::new(0.5, 1.0), &square));
    }

    #[test]
    fn containment_filter_returns_indices() {
        let square = unit_square();
        let points = vec![
            Point::new(0.25, 0.25),
            Point::new(2.0, 2.0),
            Point::new(0.75, 0.5),
        ];
        assert_eq!(points_in_polygon(&points, &square), vec![0, 2]);
    }

    #[test]
    fn segment_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(2.0, 0.0);
        assert_eq!(distance_to_segment(Point::new(1.0, 1.0), a, b), 1.0);
        assert_eq!(distance_to_segment(Point::new(-1.0, 0.0), a, b), 1.0);
        assert_eq!(distance_to_segment(Point::new(3.0, 0.0), a, b), 1.0);
    }
}
