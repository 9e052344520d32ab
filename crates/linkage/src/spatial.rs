//! Grid-cell bucketing of target coordinates.
//!
//! The index is an approximate prefilter: `query` returns everything in the
//! surrounding cells and the matcher applies the exact haversine radius.

use std::collections::HashMap;

use crate::model::{Coordinates, TargetRecord};

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Cell key = (round(lat / cell), round(lon / cell)), with the column
/// wrapped onto `0..columns(cell)` so both sides of the antimeridian share
/// neighbourhoods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    pub row: i64,
    pub col: i64,
}

impl GridKey {
    pub fn of(point: Coordinates, cell_size_deg: f64) -> Self {
        Self {
            row: (point.lat / cell_size_deg).round() as i64,
            col: ((point.lon / cell_size_deg).round() as i64).rem_euclid(columns(cell_size_deg)),
        }
    }
}

/// Longitude columns around the globe. When `cell_size_deg` does not divide
/// 360 the seam column is narrower than the rest.
pub fn columns(cell_size_deg: f64) -> i64 {
    ((360.0 / cell_size_deg).round() as i64).max(1)
}

/// Immutable cell → target-index buckets over one target snapshot.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size_deg: f64,
    columns: i64,
    cells: HashMap<GridKey, Vec<usize>>,
    indexed: usize,
}

impl SpatialIndex {
    /// Bucket every target with valid coordinates. Indices refer to
    /// positions in `targets`; targets without coordinates are skipped and
    /// can only be reached by exact key.
    pub fn build(targets: &[TargetRecord], cell_size_deg: f64) -> Self {
        let mut cells: HashMap<GridKey, Vec<usize>> = HashMap::new();
        let mut indexed = 0;
        for (i, target) in targets.iter().enumerate() {
            if let Some(point) = target.located() {
                cells.entry(GridKey::of(point, cell_size_deg)).or_default().push(i);
                indexed += 1;
            }
        }
        tracing::debug!(cells = cells.len(), indexed, cell_size_deg, "spatial index built");
        Self {
            cell_size_deg,
            columns: columns(cell_size_deg),
            cells,
            indexed,
        }
    }

    pub fn cell_size_deg(&self) -> f64 {
        self.cell_size_deg
    }

    /// Number of targets that landed in a cell.
    pub fn indexed(&self) -> usize {
        self.indexed
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Column steps between two wrapped columns, the short way round.
    fn col_distance(&self, a: i64, b: i64) -> i64 {
        let d = (a - b).rem_euclid(self.columns);
        d.min(self.columns - d)
    }

    /// Target indices in the query cell and its `ring` neighbourhood,
    /// sorted ascending, no duplicates.
    ///
    /// Rings wider than the occupied grid scan the occupied cells instead
    /// of walking the window, so a large ring costs at most one pass.
    pub fn query(&self, point: Coordinates, ring: u32) -> Vec<usize> {
        let center = GridKey::of(point, self.cell_size_deg);
        let row_ring = i64::from(ring).min(self.columns);
        let col_ring = row_ring.min(self.columns / 2);

        let mut out = Vec::new();
        let window = (2 * row_ring + 1).saturating_mul(2 * col_ring + 1);
        if window > self.cells.len() as i64 {
            for (key, members) in &self.cells {
                if (key.row - center.row).abs() <= row_ring
                    && self.col_distance(key.col, center.col) <= col_ring
                {
                    out.extend_from_slice(members);
                }
            }
        } else {
            for dr in -row_ring..=row_ring {
                for dc in -col_ring..=col_ring {
                    let key = GridKey {
                        row: center.row + dr,
                        col: (center.col + dc).rem_euclid(self.columns),
                    };
                    if let Some(members) = self.cells.get(&key) {
                        out.extend_from_slice(members);
                    }
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Smallest ring whose cells are guaranteed to cover `radius_km` around
    /// a point at latitude `lat`. Uncapped; near the poles it saturates and
    /// `query` falls back to scanning every occupied cell.
    pub fn ring_for_radius(&self, lat: f64, radius_km: f64) -> u32 {
        let km_per_deg_lat = 111.32;
        let km_per_deg_lon = (km_per_deg_lat * lat.to_radians().cos()).max(1e-6);
        let deg = (radius_km / km_per_deg_lat).max(radius_km / km_per_deg_lon);
        // A point sits up to half a cell away from its cell centre.
        ((deg / self.cell_size_deg + 0.5).ceil() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, coords: Option<(f64, f64)>) -> TargetRecord {
        TargetRecord {
            id: id.into(),
            coordinates: coords.map(|(lat, lon)| Coordinates::new(lat, lon)),
            capacity: None,
            name: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn haversine_known_distances() {
        // SF to Oakland is ~13 km
        let sf = Coordinates::new(37.7749, -122.4194);
        let oak = Coordinates::new(37.8044, -122.2712);
        let d = haversine_km(sf, oak);
        assert!((d - 13.4).abs() < 1.0, "got {d}");
        assert_eq!(haversine_km(sf, sf), 0.0);
    }

    #[test]
    fn excludes_targets_without_coordinates() {
        let targets = vec![
            target("a", Some((35.0, -120.0))),
            target("b", None),
            target("c", Some((f64::NAN, -120.0))),
        ];
        let index = SpatialIndex::build(&targets, 0.1);
        assert_eq!(index.indexed(), 1);
        assert_eq!(index.query(Coordinates::new(35.0, -120.0), 1), vec![0]);
    }

    #[test]
    fn query_covers_neighbour_ring_only() {
        let targets = vec![
            target("same", Some((35.00, -120.00))),
            target("next", Some((35.10, -120.00))),
            target("far", Some((35.30, -120.00))),
        ];
        let index = SpatialIndex::build(&targets, 0.1);
        let near = index.query(Coordinates::new(35.0, -120.0), 1);
        assert_eq!(near, vec![0, 1]);
        let wide = index.query(Coordinates::new(35.0, -120.0), 3);
        assert_eq!(wide, vec![0, 1, 2]);
        let only_cell = index.query(Coordinates::new(35.0, -120.0), 0);
        assert_eq!(only_cell, vec![0]);
    }

    #[test]
    fn ring_grows_with_radius() {
        let index = SpatialIndex::build(&[], 0.05);
        let small = index.ring_for_radius(35.0, 2.0);
        let large = index.ring_for_radius(35.0, 20.0);
        assert!(small >= 1);
        assert!(large > small);
    }

    #[test]
    fn wide_radius_on_fine_grid_is_not_capped() {
        // 10 km at 35°N over 0.001° cells needs a ring far above 64.
        let index = SpatialIndex::build(&[target("east", Some((35.0, -119.92)))], 0.001);
        let ring = index.ring_for_radius(35.0, 10.0);
        assert!(ring > 100, "ring {ring}");
        assert_eq!(index.query(Coordinates::new(35.0, -120.0), ring), vec![0]);
    }

    #[test]
    fn scan_and_window_paths_agree() {
        let targets: Vec<_> = (0..40)
            .map(|i| target("t", Some((35.0 + i as f64 * 0.013, -120.0 + i as f64 * 0.007))))
            .collect();
        let index = SpatialIndex::build(&targets, 0.01);
        let origin = Coordinates::new(35.2, -119.9);
        let center = GridKey::of(origin, 0.01);
        let brute = |ring: i64| -> Vec<usize> {
            (0..targets.len())
                .filter(|&i| {
                    let key = GridKey::of(targets[i].located().unwrap(), 0.01);
                    (key.row - center.row).abs() <= ring
                        && index.col_distance(key.col, center.col) <= ring
                })
                .collect()
        };
        // Ring 2 walks a 5x5 window over 40 occupied cells; ring 40 scans.
        assert_eq!(index.query(origin, 2), brute(2));
        assert_eq!(index.query(origin, 40), brute(40));
        assert!(!brute(2).is_empty());
    }

    #[test]
    fn neighbourhoods_wrap_at_the_antimeridian() {
        let targets = vec![target("west", Some((10.0, -179.999)))];
        let index = SpatialIndex::build(&targets, 0.1);
        let east = Coordinates::new(10.0, 179.999);
        assert!(haversine_km(east, Coordinates::new(10.0, -179.999)) < 1.0);
        assert_eq!(index.query(east, 1), vec![0]);
        assert_eq!(GridKey::of(east, 0.1), GridKey::of(Coordinates::new(10.0, -179.999), 0.1));
    }
}
