//! In-memory R-tree over the stop catalog for nearest-stop queries.

use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::model::Stop;
use crate::store::haversine_distance;

#[derive(Debug, Clone)]
struct SpatialStop(Stop);

impl RTreeObject for SpatialStop {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.longitude, self.0.latitude])
    }
}

impl PointDistance for SpatialStop {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.0.longitude - point[0];
        let dy = self.0.latitude - point[1];
        dx * dx + dy * dy
    }
}

/// Stop catalog index. Candidate selection runs in degree space; the
/// final threshold check uses the true great-circle distance.
#[derive(Debug, Default)]
pub(crate) struct StopIndex {
    tree: RTree<SpatialStop>,
}

impl StopIndex {
    pub fn build(stops: &[Stop]) -> Self {
        let spatial = stops.iter().cloned().map(SpatialStop).collect();
        StopIndex {
            tree: RTree::bulk_load(spatial),
        }
    }

    /// The closest stop within `max_distance_m` meters of the point, with
    /// its distance.
    pub fn nearest(&self, latitude: f64, longitude: f64, max_distance_m: f64) -> Option<(Stop, f64)> {
        let candidate = self.tree.nearest_neighbor(&[longitude, latitude])?;
        let distance =
            haversine_distance(latitude, longitude, candidate.0.latitude, candidate.0.longitude);
        (distance <= max_distance_m).then(|| (candidate.0.clone(), distance))
    }
}
