//! Choosing which intersections still need imagery from a source.

use crate::store::AvailabilityStore;
use crate::{AvailabilityStatus, BoundingBox, Intersection};

/// Intersections inside `bbox` (edges inclusive) whose status for `year` is
/// still [`AvailabilityStatus::Unfetched`], in table order.
///
/// A store without a column for `year` treats every point as unfetched.
pub fn select_candidates(
    store: &AvailabilityStore,
    bbox: &BoundingBox,
    year: i32,
) -> Vec<Intersection> {
    store
        .intersections()
        .filter(|point| bbox.contains(point.latitude, point.longitude))
        .filter(|point| {
            store.status(point.id, year).unwrap_or_default() == AvailabilityStatus::Unfetched
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Intersection_ID,Inter_Latitude,Inter_Longitude,2019,2020
0,10.0,20.0,0,0
1,11.0,21.0,0,0
2,10.0,21.0,0,1
3,11.0,20.0,2,0
4,10.5,20.5,0,0
5,11.0001,20.5,0,0
6,10.5,19.9999,0,0
";

    fn store() -> AvailabilityStore {
        AvailabilityStore::from_reader(TABLE.as_bytes(), "intersections.csv").unwrap()
    }

    #[test]
    fn test_edges_and_corners_included() {
        let store = store();
        let bbox = BoundingBox::new(10.0, 20.0, 11.0, 21.0);
        let ids: Vec<i64> = select_candidates(&store, &bbox, 2019)
            .iter()
            .map(|p| p.id)
            .collect();
        // 3 is Saved for 2019; 5 and 6 sit just outside.
        assert_eq!(ids, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_status_filters_per_year() {
        let store = store();
        let bbox = BoundingBox::new(10.0, 20.0, 11.0, 21.0);
        let ids: Vec<i64> = select_candidates(&store, &bbox, 2020)
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_unknown_year_treated_as_unfetched() {
        let store = store();
        let bbox = BoundingBox::new(10.0, 20.0, 11.0, 21.0);
        assert_eq!(select_candidates(&store, &bbox, 2024).len(), 5);
    }

    #[test]
    fn test_disjoint_bbox_selects_nothing() {
        let store = store();
        let bbox = BoundingBox::new(-1.0, -1.0, 1.0, 1.0);
        assert!(select_candidates(&store, &bbox, 2019).is_empty());
    }
}
