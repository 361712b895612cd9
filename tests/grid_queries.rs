use osm_history_grid::grid::coords::SCALE;
use osm_history_grid::grid::{BoundingBox, CellAssigner, Coordinate, Grid};

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn range(&mut self, min: i64, max: i64) -> i64 {
        min + (self.next() % (max - min + 1) as u64) as i64
    }
}

fn random_box(rng: &mut Lcg, max_size: i64) -> BoundingBox {
    let min_lon = rng.range(-170 * SCALE, 160 * SCALE);
    let min_lat = rng.range(-80 * SCALE, 70 * SCALE);
    let max_lon = min_lon + rng.range(0, max_size);
    let max_lat = min_lat + rng.range(0, max_size);
    BoundingBox::new(min_lon, min_lat, max_lon, max_lat).unwrap()
}

#[test]
fn test_enlarged_query_always_reaches_the_storage_cell() {
    let mut rng = Lcg(7);
    let assigner = CellAssigner::new(14, 2).unwrap();

    for _ in 0..2_000 {
        let entity = random_box(&mut rng, SCALE / 10);
        let cell = assigner.assign(&entity);
        let grid = Grid::new(cell.zoom()).unwrap();

        // any query box touching the entity
        let lon = rng.range(entity.min_lon(), entity.max_lon());
        let lat = rng.range(entity.min_lat(), entity.max_lat());
        let query = BoundingBox::new(lon, lat, lon + rng.range(0, SCALE / 100), lat + rng.range(0, SCALE / 100)).unwrap();

        assert!(
            grid.cells_covering(&query, true).contains(&cell),
            "entity {:?} stored in {} not reached by {:?}",
            entity,
            cell,
            query
        );
    }
}

#[test]
fn test_every_point_has_one_cell_at_every_zoom() {
    let mut rng = Lcg(11);
    for _ in 0..500 {
        let point = Coordinate::new(rng.range(-180 * SCALE, 180 * SCALE), rng.range(-90 * SCALE, 90 * SCALE));
        for zoom in [0, 1, 5, 13, 22, 30] {
            let grid = Grid::new(zoom).unwrap();
            let cell = grid.cell_for(point);
            assert!(cell.is_valid());
            let bounds = grid.bounds_of(cell).unwrap();
            let wrapped = if point.lon == 180 * SCALE { Coordinate::new(-180 * SCALE, point.lat) } else { point };
            assert!(bounds.contains(wrapped), "{:?} outside {:?} at zoom {}", point, bounds, zoom);
        }
    }
}

#[test]
fn test_corner_of_the_map_stays_on_the_map() {
    for zoom in [0, 3, 17, 30] {
        let grid = Grid::new(zoom).unwrap();
        let cell = grid.cell_for(Coordinate::from_degrees(180.0, 90.0));
        let (column, row) = cell.column_row().unwrap();
        assert_eq!(column, 0);
        assert_eq!(i64::from(row), grid.cells_per_axis() - 1);
    }
}
