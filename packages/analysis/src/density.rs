//! Hierarchical density-based clustering (HDBSCAN).
//!
//! Works over any [`MetricSpace`]. Two spaces are provided:
//! [`GreatCircleSpace`] for geographic positions (distances in radians of
//! arc) and [`FeatureSpace`] for Euclidean feature vectors.
//!
//! The algorithm:
//!
//! 1. Core distance of each point: distance to its `min_samples`-th nearest
//!    other point.
//! 2. Minimum spanning tree over mutual reachability
//!    `max(core(a), core(b), d(a, b))` (Prim, dense).
//! 3. Single-linkage hierarchy from the sorted tree edges.
//! 4. Condensed tree: splits where both sides have at least
//!    `min_cluster_size` points create child clusters; smaller sides fall
//!    out as points.
//! 5. Excess-of-mass selection (the root is never selected), then
//!    clusters born below `cluster_selection_epsilon` are merged upward.
//!
//! Points outside every selected cluster are noise (`None`). When the root
//! never splits into two large enough children but holds at least
//! `min_cluster_size` points, the whole set is one cluster: points that
//! fell out of it at a distance within `cluster_selection_epsilon` (or, with
//! no epsilon, at the densest level) belong to it, the rest are noise.

use std::collections::BTreeSet;

use accident_map_accident_models::{AccidentRecord, ClusterAssignment, ClusterId};
use accident_map_spatial::{PointIndex, chord_to_angle, euclidean, unit_sphere};

use crate::AnalysisError;
use crate::config::ClusteringParams;

/// A finite set of points with a distance function.
pub trait MetricSpace: Sync {
    /// Number of points.
    fn len(&self) -> usize;

    /// Whether the space has no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distance between points `a` and `b`.
    fn distance(&self, a: usize, b: usize) -> f64;

    /// Distance from every point to its `k`-th nearest other point.
    /// `k` is at least 1 and below [`Self::len`].
    fn core_distances(&self, k: usize) -> Vec<Option<f64>>;
}

/// Geographic positions under great-circle distance, in radians of arc.
pub struct GreatCircleSpace {
    /// `(lat, lon, cos(lat))` in radians.
    coords: Vec<(f64, f64, f64)>,
    sphere: Vec<[f64; 3]>,
    index: PointIndex<3>,
}

impl GreatCircleSpace {
    /// Builds the space from `(latitude, longitude)` pairs in degrees.
    #[must_use]
    pub fn from_degrees(positions: &[(f64, f64)]) -> Self {
        let coords: Vec<(f64, f64, f64)> = positions
            .iter()
            .map(|&(lat, lon)| {
                let (lat, lon) = (lat.to_radians(), lon.to_radians());
                (lat, lon, lat.cos())
            })
            .collect();
        let sphere: Vec<[f64; 3]> = coords
            .iter()
            .map(|&(lat, lon, _)| unit_sphere(lat, lon))
            .collect();
        let index = PointIndex::new(&sphere);
        Self {
            coords,
            sphere,
            index,
        }
    }

    /// Builds the space from record positions.
    #[must_use]
    pub fn from_records(records: &[AccidentRecord]) -> Self {
        let positions: Vec<(f64, f64)> =
            records.iter().map(|r| (r.latitude, r.longitude)).collect();
        Self::from_degrees(&positions)
    }
}

impl MetricSpace for GreatCircleSpace {
    fn len(&self) -> usize {
        self.coords.len()
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        let (lat1, lon1, cos1) = self.coords[a];
        let (lat2, lon2, cos2) = self.coords[b];
        let h = ((lat2 - lat1) / 2.0).sin().powi(2)
            + cos1 * cos2 * ((lon2 - lon1) / 2.0).sin().powi(2);
        2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt())
    }

    fn core_distances(&self, k: usize) -> Vec<Option<f64>> {
        self.sphere
            .iter()
            .map(|point| {
                self.index
                    .kth_neighbor_distance(*point, k)
                    .map(chord_to_angle)
            })
            .collect()
    }
}

/// Feature vectors under Euclidean distance.
pub struct FeatureSpace<const D: usize> {
    points: Vec<[f64; D]>,
    index: PointIndex<D>,
}

impl<const D: usize> FeatureSpace<D> {
    /// Builds the space.
    #[must_use]
    pub fn new(points: Vec<[f64; D]>) -> Self {
        let index = PointIndex::new(&points);
        Self { points, index }
    }
}

impl<const D: usize> MetricSpace for FeatureSpace<D> {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        euclidean(&self.points[a], &self.points[b])
    }

    fn core_distances(&self, k: usize) -> Vec<Option<f64>> {
        self.points
            .iter()
            .map(|point| self.index.kth_neighbor_distance(*point, k))
            .collect()
    }
}

/// One merge in the single-linkage hierarchy. Node ids below `n` are
/// points; merge `i` creates node `n + i`.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Edge of the condensed tree. Cluster labels start at `n` (the root);
/// children below `n` are points falling out of `parent` at `lambda`.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

/// HDBSCAN with fixed parameters.
#[derive(Debug, Clone, Copy)]
pub struct DensityClusterer {
    params: ClusteringParams,
}

impl DensityClusterer {
    /// Creates a clusterer.
    #[must_use]
    pub const fn new(params: ClusteringParams) -> Self {
        Self { params }
    }

    /// Clusters `space`, returning a dense label (`0..k`) or `None` (noise)
    /// per point.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] for unusable parameters and
    /// [`AnalysisError::Clustering`] if distances are not finite.
    pub fn fit<M: MetricSpace + ?Sized>(
        &self,
        space: &M,
    ) -> Result<Vec<Option<usize>>, AnalysisError> {
        self.params.validate()?;

        let n = space.len();
        if n < 2 {
            return Ok(vec![None; n]);
        }

        let k = self.params.min_samples.clamp(1, n - 1);
        let core = space
            .core_distances(k)
            .into_iter()
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| AnalysisError::clustering("core distance lookup failed"))?;

        let mst = minimum_spanning_tree(space, &core)?;
        let merges = single_linkage(n, mst);
        let condensed = condense(&merges, n, self.params.min_cluster_size);
        let tree = ClusterTree::new(&condensed, n);
        let epsilon = self.params.cluster_selection_epsilon;
        let selected = tree.select(epsilon);

        if selected.is_empty() && n >= self.params.min_cluster_size {
            return Ok(tree.label_single_cluster(epsilon));
        }
        Ok(tree.label_points(&selected))
    }

    /// Clusters `space` into a [`ClusterAssignment`].
    ///
    /// # Errors
    ///
    /// See [`Self::fit`].
    pub fn assign<M: MetricSpace + ?Sized>(
        &self,
        space: &M,
    ) -> Result<ClusterAssignment, AnalysisError> {
        let labels = self
            .fit(space)?
            .into_iter()
            .map(|label| {
                label
                    .map(|l| {
                        u32::try_from(l)
                            .map(ClusterId::new)
                            .map_err(|_| AnalysisError::clustering("cluster label overflow"))
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClusterAssignment::from_labels(labels))
    }
}

/// Number of distinct non-noise labels.
#[must_use]
pub fn cluster_count(labels: &[Option<usize>]) -> usize {
    labels.iter().flatten().collect::<BTreeSet<_>>().len()
}

/// Dense Prim's algorithm over mutual reachability distances.
fn minimum_spanning_tree<M: MetricSpace + ?Sized>(
    space: &M,
    core: &[f64],
) -> Result<Vec<(usize, usize, f64)>, AnalysisError> {
    let n = space.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut nearest = vec![0_usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[0] = true;

    for _ in 1..n {
        let mut next = None;
        let mut next_distance = f64::INFINITY;

        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let reach = space.distance(current, j).max(core[current]).max(core[j]);
            if reach < best[j] {
                best[j] = reach;
                nearest[j] = current;
            }
            if best[j] < next_distance {
                next_distance = best[j];
                next = Some(j);
            }
        }

        let Some(next) = next else {
            return Err(AnalysisError::clustering(
                "non-finite mutual reachability distance",
            ));
        };
        in_tree[next] = true;
        edges.push((nearest[next], next, best[next]));
        current = next;
    }

    Ok(edges)
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    let mut root = node;
    while parent[root] != root {
        root = parent[root];
    }
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

fn single_linkage(n: usize, mut edges: Vec<(usize, usize, f64)>) -> Vec<Merge> {
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));

    let total = 2 * n - 1;
    let mut parent: Vec<usize> = (0..total).collect();
    let mut size = vec![1_usize; total];
    let mut merges = Vec::with_capacity(n - 1);

    for (i, (a, b, distance)) in edges.into_iter().enumerate() {
        let left = find(&mut parent, a);
        let right = find(&mut parent, b);
        let node = n + i;
        size[node] = size[left] + size[right];
        parent[left] = node;
        parent[right] = node;
        merges.push(Merge {
            left,
            right,
            distance,
            size: size[node],
        });
    }

    merges
}

/// Breadth-first node ids under `start` (inclusive) in the hierarchy.
fn hierarchy_bfs(merges: &[Merge], n: usize, start: usize) -> Vec<usize> {
    let mut order = vec![start];
    let mut cursor = 0;
    while cursor < order.len() {
        let node = order[cursor];
        cursor += 1;
        if node >= n {
            let merge = merges[node - n];
            order.push(merge.left);
            order.push(merge.right);
        }
    }
    order
}

fn condense(merges: &[Merge], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let root = 2 * n - 2;
    let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut relabel = vec![0_usize; 2 * n - 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut ignore = vec![false; 2 * n - 1];
    let mut edges = Vec::new();

    for node in hierarchy_bfs(merges, n, root) {
        if ignore[node] || node < n {
            continue;
        }

        let merge = merges[node - n];
        let lambda = if merge.distance > 0.0 {
            1.0 / merge.distance
        } else {
            f64::INFINITY
        };
        let parent = relabel[node];
        let left_size = node_size(merge.left);
        let right_size = node_size(merge.right);

        let mut fall_out = |side: usize, edges: &mut Vec<CondensedEdge>| {
            for sub in hierarchy_bfs(merges, n, side) {
                if sub < n {
                    edges.push(CondensedEdge {
                        parent,
                        child: sub,
                        lambda,
                        size: 1,
                    });
                }
                ignore[sub] = true;
            }
        };

        match (
            left_size >= min_cluster_size,
            right_size >= min_cluster_size,
        ) {
            (true, true) => {
                for (side, size) in [(merge.left, left_size), (merge.right, right_size)] {
                    relabel[side] = next_label;
                    edges.push(CondensedEdge {
                        parent,
                        child: next_label,
                        lambda,
                        size,
                    });
                    next_label += 1;
                }
            }
            (false, false) => {
                fall_out(merge.left, &mut edges);
                fall_out(merge.right, &mut edges);
            }
            (false, true) => {
                relabel[merge.right] = parent;
                fall_out(merge.left, &mut edges);
            }
            (true, false) => {
                relabel[merge.left] = parent;
                fall_out(merge.right, &mut edges);
            }
        }
    }

    edges
}

/// Stability and parentage of the condensed tree's clusters, indexed by
/// `label - n` (so the root is index 0).
struct ClusterTree {
    n: usize,
    /// Lambda at which each cluster split off its parent; 0 for the root.
    birth: Vec<f64>,
    stability: Vec<f64>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    /// Cluster each point fell out of.
    point_parent: Vec<usize>,
    /// Lambda at which each point fell out.
    point_lambda: Vec<f64>,
}

/// `lambda - birth`, treating two infinities as no excess.
fn excess(lambda: f64, birth: f64) -> f64 {
    if lambda == birth { 0.0 } else { lambda - birth }
}

impl ClusterTree {
    fn new(edges: &[CondensedEdge], n: usize) -> Self {
        let clusters = edges
            .iter()
            .filter(|e| e.child >= n)
            .map(|e| e.child - n + 1)
            .max()
            .unwrap_or(1);

        let mut birth = vec![0.0; clusters];
        let mut parent = vec![None; clusters];
        let mut children = vec![Vec::new(); clusters];
        let mut point_parent = vec![0; n];
        let mut point_lambda = vec![0.0; n];

        for edge in edges {
            let p = edge.parent - n;
            if edge.child >= n {
                let c = edge.child - n;
                birth[c] = edge.lambda;
                parent[c] = Some(p);
                children[p].push(c);
            } else {
                point_parent[edge.child] = p;
                point_lambda[edge.child] = edge.lambda;
            }
        }

        let mut stability = vec![0.0; clusters];
        for edge in edges {
            let p = edge.parent - n;
            #[allow(clippy::cast_precision_loss)]
            let size = edge.size as f64;
            stability[p] += excess(edge.lambda, birth[p]) * size;
        }

        Self {
            n,
            birth,
            stability,
            parent,
            children,
            point_parent,
            point_lambda,
        }
    }

    fn descendants(&self, cluster: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = self.children[cluster].clone();
        while let Some(c) = stack.pop() {
            stack.extend(self.children[c].iter().copied());
            out.push(c);
        }
        out
    }

    /// Excess-of-mass selection followed by the epsilon merge.
    fn select(&self, epsilon: f64) -> BTreeSet<usize> {
        let clusters = self.birth.len();
        let mut stability = self.stability.clone();
        let mut is_cluster = vec![true; clusters];
        is_cluster[0] = false;

        // Children always carry larger indices than their parents.
        for c in (1..clusters).rev() {
            let subtree: f64 = self.children[c].iter().map(|&ch| stability[ch]).sum();
            if subtree > stability[c] {
                is_cluster[c] = false;
                stability[c] = subtree;
            } else {
                for d in self.descendants(c) {
                    is_cluster[d] = false;
                }
            }
        }

        let eom: BTreeSet<usize> = (0..clusters).filter(|&c| is_cluster[c]).collect();
        if epsilon > 0.0 && !eom.is_empty() {
            self.epsilon_merge(&eom, epsilon)
        } else {
            eom
        }
    }

    fn birth_distance(&self, cluster: usize) -> f64 {
        1.0 / self.birth[cluster]
    }

    fn epsilon_merge(&self, eom: &BTreeSet<usize>, epsilon: f64) -> BTreeSet<usize> {
        let mut processed = BTreeSet::new();
        let mut selected = BTreeSet::new();

        for &leaf in eom {
            if self.birth_distance(leaf) < epsilon {
                if processed.contains(&leaf) {
                    continue;
                }
                let ancestor = self.climb_above(leaf, epsilon);
                selected.insert(ancestor);
                processed.extend(self.descendants(ancestor));
            } else {
                selected.insert(leaf);
            }
        }

        let nested: Vec<usize> = selected
            .iter()
            .copied()
            .filter(|&c| {
                let mut up = self.parent[c];
                while let Some(p) = up {
                    if selected.contains(&p) {
                        return true;
                    }
                    up = self.parent[p];
                }
                false
            })
            .collect();
        for c in nested {
            selected.remove(&c);
        }
        selected
    }

    /// Nearest ancestor born further apart than `epsilon`, stopping below
    /// the root.
    fn climb_above(&self, mut cluster: usize, epsilon: f64) -> usize {
        while let Some(parent) = self.parent[cluster] {
            if parent == 0 {
                return cluster;
            }
            if self.birth_distance(parent) > epsilon {
                return parent;
            }
            cluster = parent;
        }
        cluster
    }

    /// Labels for a tree whose root has no child clusters.
    fn label_single_cluster(&self, epsilon: f64) -> Vec<Option<usize>> {
        let threshold = if epsilon > 0.0 {
            1.0 / epsilon
        } else {
            self.point_lambda
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
        };
        self.point_lambda
            .iter()
            .map(|&lambda| (lambda >= threshold).then_some(0))
            .collect()
    }

    fn label_points(&self, selected: &BTreeSet<usize>) -> Vec<Option<usize>> {
        let rank: Vec<Option<usize>> = {
            let mut rank = vec![None; self.birth.len()];
            for (label, &cluster) in selected.iter().enumerate() {
                rank[cluster] = Some(label);
            }
            rank
        };

        (0..self.n)
            .map(|point| {
                let mut cluster = Some(self.point_parent[point]);
                while let Some(c) = cluster {
                    if rank[c].is_some() {
                        return rank[c];
                    }
                    cluster = self.parent[c];
                }
                None
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_cluster_size: usize, min_samples: usize, eps: f64) -> ClusteringParams {
        ClusteringParams {
            min_cluster_size,
            min_samples,
            cluster_selection_epsilon: eps,
        }
    }

    fn blob(center: (f64, f64), count: usize, spread: f64) -> Vec<[f64; 2]> {
        (0..count)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let angle = i as f64 * 2.399_963;
                #[allow(clippy::cast_precision_loss)]
                let radius = spread * ((i % 5) as f64 + 1.0) / 5.0;
                [
                    radius.mul_add(angle.cos(), center.0),
                    radius.mul_add(angle.sin(), center.1),
                ]
            })
            .collect()
    }

    #[test]
    fn separates_two_dense_blobs_and_isolates_outlier() {
        let mut points = blob((0.0, 0.0), 20, 1.0);
        points.extend(blob((50.0, 50.0), 20, 1.0));
        points.push([200.0, -200.0]);
        let space = FeatureSpace::new(points);

        let labels = DensityClusterer::new(params(5, 3, 0.0)).fit(&space).unwrap();

        assert_eq!(cluster_count(&labels), 2);
        assert!(labels[..20].iter().all(|l| *l == labels[0] && l.is_some()));
        assert!(labels[20..40].iter().all(|l| *l == labels[20] && l.is_some()));
        assert_ne!(labels[0], labels[20]);
        assert_eq!(labels[40], None);
    }

    #[test]
    fn identical_points_form_a_single_cluster() {
        let space = FeatureSpace::new(vec![[1.0, 2.0, 3.0, 4.0]; 60]);
        let labels = DensityClusterer::new(params(10, 5, 0.1)).fit(&space).unwrap();
        assert_eq!(cluster_count(&labels), 1);
        assert!(labels.iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn lone_group_keeps_dense_core_and_drops_outlier() {
        let space = FeatureSpace::new(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [500.0, 500.0]]);
        let labels = DensityClusterer::new(params(3, 2, 0.0)).fit(&space).unwrap();
        assert_eq!(labels, vec![Some(0), Some(0), Some(0), None]);

        let within_epsilon = DensityClusterer::new(params(3, 2, 5.0)).fit(&space).unwrap();
        assert_eq!(within_epsilon, vec![Some(0), Some(0), Some(0), None]);
    }

    #[test]
    fn set_smaller_than_min_cluster_size_is_noise() {
        let space = FeatureSpace::new(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0]]);
        let labels = DensityClusterer::new(params(5, 2, 0.0)).fit(&space).unwrap();
        assert_eq!(cluster_count(&labels), 0);
    }

    #[test]
    fn tiny_inputs_are_noise() {
        let space = FeatureSpace::new(vec![[0.0, 0.0]]);
        let labels = DensityClusterer::new(params(2, 1, 0.0)).fit(&space).unwrap();
        assert_eq!(labels, vec![None]);

        let empty = FeatureSpace::<2>::new(Vec::new());
        assert!(DensityClusterer::new(params(2, 1, 0.0)).fit(&empty).unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_params() {
        let space = FeatureSpace::new(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(DensityClusterer::new(params(1, 1, 0.0)).fit(&space).is_err());
    }

    #[test]
    fn large_epsilon_merges_nearby_clusters() {
        let mut points = blob((0.0, 0.0), 15, 0.5);
        points.extend(blob((6.0, 0.0), 15, 0.5));
        points.extend(blob((500.0, 0.0), 15, 0.5));
        let space = FeatureSpace::new(points);

        let split = DensityClusterer::new(params(5, 3, 0.0)).fit(&space).unwrap();
        assert_eq!(cluster_count(&split), 3);

        let merged = DensityClusterer::new(params(5, 3, 20.0)).fit(&space).unwrap();
        assert_eq!(cluster_count(&merged), 2);
        assert_eq!(merged[0], merged[15]);
        assert_ne!(merged[0], merged[30]);
    }

    #[test]
    fn is_deterministic() {
        let mut points = blob((0.0, 0.0), 25, 1.0);
        points.extend(blob((30.0, 5.0), 25, 2.0));
        let space = FeatureSpace::new(points);
        let clusterer = DensityClusterer::new(params(5, 3, 0.0));
        assert_eq!(clusterer.fit(&space).unwrap(), clusterer.fit(&space).unwrap());
    }

    #[test]
    fn great_circle_space_measures_radians() {
        let space = GreatCircleSpace::from_degrees(&[(0.0, 0.0), (1.0, 0.0)]);
        assert!((space.distance(0, 1) - 1.0_f64.to_radians()).abs() < 1e-12);
        let core = space.core_distances(1);
        assert!((core[0].unwrap() - 1.0_f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn clusters_geographic_hotspots() {
        let mut positions = Vec::new();
        for i in 0..12 {
            let offset = f64::from(i) * 0.000_05;
            positions.push((14.6 + offset, 121.0 + offset));
            positions.push((14.9 + offset, 121.3 - offset));
        }
        positions.push((10.0, 124.0));
        let space = GreatCircleSpace::from_degrees(&positions);

        let assignment = DensityClusterer::new(params(5, 3, 0.0))
            .assign(&space)
            .unwrap();
        assert_eq!(assignment.cluster_count(), 2);
        assert_eq!(assignment.get(24), None);
        assert_ne!(assignment.get(0), assignment.get(1));
    }
}
