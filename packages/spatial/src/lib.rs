#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spatial primitives for accident clustering.
//!
//! Provides great-circle distances (haversine on the mean Earth radius),
//! an R-tree backed [`PointIndex`] for k-th nearest neighbour distances in
//! any fixed dimension, and convex hull construction for cluster
//! boundaries.

use geo::{ConvexHull, MultiPoint, Point};
use rstar::RTree;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance in kilometers between two positions given in
/// degrees.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    EARTH_RADIUS_KM
        * central_angle(
            lat1.to_radians(),
            lon1.to_radians(),
            lat2.to_radians(),
            lon2.to_radians(),
        )
}

/// Angle in radians subtended at the Earth's center by two positions given
/// in radians. This is the haversine distance on the unit sphere.
#[must_use]
pub fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt())
}

/// Projects a position in radians onto the unit sphere.
///
/// Straight-line (chord) distance between projected points is monotone in
/// the central angle, so nearest neighbours on the sphere can be found with
/// a Euclidean R-tree.
#[must_use]
pub fn unit_sphere(lat: f64, lon: f64) -> [f64; 3] {
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Converts a unit-sphere chord length back to a central angle.
#[must_use]
pub fn chord_to_angle(chord: f64) -> f64 {
    2.0 * (chord / 2.0).clamp(0.0, 1.0).asin()
}

/// R-tree over points in `D` dimensions supporting k-th nearest neighbour
/// distance queries under Euclidean distance.
pub struct PointIndex<const D: usize> {
    tree: RTree<[f64; D]>,
}

impl<const D: usize> PointIndex<D> {
    /// Bulk-loads the index.
    #[must_use]
    pub fn new(points: &[[f64; D]]) -> Self {
        Self {
            tree: RTree::bulk_load(points.to_vec()),
        }
    }

    /// Distance from `query` to its `k`-th nearest indexed point, counting a
    /// point at the query position itself as the 0-th neighbour.
    ///
    /// Returns `None` when fewer than `k + 1` points are indexed.
    #[must_use]
    pub fn kth_neighbor_distance(&self, query: [f64; D], k: usize) -> Option<f64> {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&query)
            .nth(k)
            .map(|(_, distance_2)| distance_2.sqrt())
    }
}

fn distance_2<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Euclidean distance between two points of equal dimension.
#[must_use]
pub fn euclidean<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    distance_2(a, b).sqrt()
}

/// Convex hull of `(x, y)` pairs as a closed ring (first vertex repeated at
/// the end).
///
/// Returns an empty ring when the hull has fewer than three distinct
/// vertices (all points identical or collinear), since no area can be
/// drawn.
#[must_use]
pub fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let multi: MultiPoint<f64> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
    let hull = multi.convex_hull();

    let mut ring: Vec<(f64, f64)> = hull.exterior().coords().map(|c| (c.x, c.y)).collect();

    let mut distinct = ring.clone();
    distinct.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    distinct.dedup();
    if distinct.len() < 3 {
        return Vec::new();
    }

    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whether `point` lies inside or on the boundary of the convex `ring`.
    ///
    /// `ring` must be closed and convex, as returned by [`convex_hull`].
    fn convex_ring_contains(ring: &[(f64, f64)], point: (f64, f64)) -> bool {
        const TOLERANCE: f64 = 1e-12;

        let mut sign = 0.0_f64;
        for edge in ring.windows(2) {
            let (ax, ay) = edge[0];
            let (bx, by) = edge[1];
            let cross = (bx - ax) * (point.1 - ay) - (by - ay) * (point.0 - ax);
            if cross.abs() <= TOLERANCE {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    #[test]
    fn haversine_matches_known_distance() {
        // One degree of latitude on the mean sphere.
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn haversine_is_zero_for_same_point() {
        assert!(haversine_km(14.6, 121.0, 14.6, 121.0).abs() < f64::EPSILON);
    }

    #[test]
    fn chord_round_trips_central_angle() {
        let a = unit_sphere(0.2, 1.1);
        let b = unit_sphere(0.25, 1.05);
        let chord = euclidean(&a, &b);
        let angle = central_angle(0.2, 1.1, 0.25, 1.05);
        assert!((chord_to_angle(chord) - angle).abs() < 1e-12);
    }

    #[test]
    fn kth_neighbor_counts_self_as_zeroth() {
        let points = [[0.0, 0.0], [1.0, 0.0], [3.0, 0.0], [10.0, 0.0]];
        let index = PointIndex::new(&points);
        assert_eq!(index.kth_neighbor_distance([0.0, 0.0], 0), Some(0.0));
        assert_eq!(index.kth_neighbor_distance([0.0, 0.0], 1), Some(1.0));
        assert_eq!(index.kth_neighbor_distance([0.0, 0.0], 3), Some(10.0));
        assert_eq!(index.kth_neighbor_distance([0.0, 0.0], 4), None);
    }

    #[test]
    fn kth_neighbor_handles_duplicates() {
        let points = [[5.0, 5.0, 5.0, 5.0]; 6];
        let index = PointIndex::new(&points);
        assert_eq!(index.kth_neighbor_distance([5.0, 5.0, 5.0, 5.0], 5), Some(0.0));
    }

    #[test]
    fn hull_is_closed_and_drops_interior_points() {
        let points = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (1.0, 1.0)];
        let ring = convex_hull(&points);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert!(!ring.contains(&(1.0, 1.0)));
        for point in points {
            assert!(convex_ring_contains(&ring, point));
        }
        assert!(!convex_ring_contains(&ring, (3.0, 1.0)));
    }

    #[test]
    fn collinear_points_have_no_hull() {
        let points = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)];
        assert!(convex_hull(&points).is_empty());
        assert!(convex_hull(&[(1.0, 1.0); 4]).is_empty());
    }
}
