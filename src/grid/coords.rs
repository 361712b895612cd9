//! Fixed-point coordinates and bounding boxes.
//!
//! Everything the grid touches is an integer in units of 1e-7 degrees, the
//! precision OSM itself stores. Cell borders are therefore exact and no point
//! can fall between two cells because of float rounding.

use crate::errors::{Error, Result};

/// Fixed-point units per degree.
pub const SCALE: i64 = 10_000_000;
pub const MAX_LON: i64 = 180 * SCALE;
pub const MAX_LAT: i64 = 90 * SCALE;

/// Full longitude range of the earth in fixed-point units.
pub(crate) const LON_SPAN: i64 = 2 * MAX_LON;
pub(crate) const LAT_SPAN: i64 = 2 * MAX_LAT;

pub fn to_fixed(degrees: f64) -> i64 {
    (degrees * SCALE as f64).round() as i64
}

pub fn to_degrees(fixed: i64) -> f64 {
    fixed as f64 / SCALE as f64
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[archive(check_bytes)]
pub struct Coordinate {
    pub lon: i64,
    pub lat: i64,
}

impl Coordinate {
    pub const fn new(lon: i64, lat: i64) -> Self {
        Coordinate { lon, lat }
    }

    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Coordinate {
            lon: to_fixed(lon),
            lat: to_fixed(lat),
        }
    }

    pub fn is_valid(&self) -> bool {
        (-MAX_LON..=MAX_LON).contains(&self.lon) && (-MAX_LAT..=MAX_LAT).contains(&self.lat)
    }
}

/// Inclusive box in fixed-point units.
///
/// A box crossing the antimeridian is written with `max_lon` beyond +180 or
/// `min_lon` beyond -180, e.g. 170..190 for a box spanning from 170E to 170W.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    min_lon: i64,
    min_lat: i64,
    max_lon: i64,
    max_lat: i64,
}

impl BoundingBox {
    pub fn new(min_lon: i64, min_lat: i64, max_lon: i64, max_lat: i64) -> Result<Self> {
        if min_lon > max_lon {
            return Err(Error::InvertedBoundingBox { axis: "longitude", min: min_lon, max: max_lon });
        }
        if min_lat > max_lat {
            return Err(Error::InvertedBoundingBox { axis: "latitude", min: min_lat, max: max_lat });
        }
        for lat in [min_lat, max_lat] {
            if !(-MAX_LAT..=MAX_LAT).contains(&lat) {
                return Err(Error::CoordinateOutOfRange { axis: "latitude", value: lat });
            }
        }
        for lon in [min_lon, max_lon] {
            if !(-LON_SPAN..=LON_SPAN).contains(&lon) {
                return Err(Error::CoordinateOutOfRange { axis: "longitude", value: lon });
            }
        }
        if max_lon - min_lon > LON_SPAN {
            return Err(Error::CoordinateOutOfRange { axis: "longitude span", value: max_lon - min_lon });
        }
        Ok(BoundingBox { min_lon, min_lat, max_lon, max_lat })
    }

    pub fn from_degrees(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        BoundingBox::new(to_fixed(min_lon), to_fixed(min_lat), to_fixed(max_lon), to_fixed(max_lat))
    }

    pub fn point(coordinate: Coordinate) -> Result<Self> {
        BoundingBox::new(coordinate.lon, coordinate.lat, coordinate.lon, coordinate.lat)
    }

    pub fn world() -> Self {
        BoundingBox { min_lon: -MAX_LON, min_lat: -MAX_LAT, max_lon: MAX_LON, max_lat: MAX_LAT }
    }

    pub fn min_lon(&self) -> i64 {
        self.min_lon
    }

    pub fn min_lat(&self) -> i64 {
        self.min_lat
    }

    pub fn max_lon(&self) -> i64 {
        self.max_lon
    }

    pub fn max_lat(&self) -> i64 {
        self.max_lat
    }

    pub fn width(&self) -> i64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> i64 {
        self.max_lat - self.min_lat
    }

    /// South-west corner with its longitude brought back into [-180, 180].
    pub fn south_west(&self) -> Coordinate {
        let lon = if self.min_lon < -MAX_LON {
            self.min_lon + LON_SPAN
        } else if self.min_lon > MAX_LON {
            self.min_lon - LON_SPAN
        } else {
            self.min_lon
        };
        Coordinate::new(lon, self.min_lat)
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        self.split_antimeridian().iter().any(|part| {
            (part.min_lon..=part.max_lon).contains(&coordinate.lon)
                && (part.min_lat..=part.max_lat).contains(&coordinate.lat)
        })
    }

    /// Smallest box covering both. Falls back to the full longitude range if
    /// the two boxes cannot be joined within 360 degrees.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut min_lon = self.min_lon.min(other.min_lon);
        let mut max_lon = self.max_lon.max(other.max_lon);
        if max_lon - min_lon > LON_SPAN {
            min_lon = -MAX_LON;
            max_lon = MAX_LON;
        }
        BoundingBox {
            min_lon,
            min_lat: self.min_lat.min(other.min_lat),
            max_lon,
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Like [`union`](Self::union), but `other` may also be read one turn
    /// east or west, whichever gives the narrower box. Boxes on both sides of
    /// the antimeridian are joined across it instead of around the earth.
    pub fn union_shortest(&self, other: &BoundingBox) -> BoundingBox {
        [0, LON_SPAN, -LON_SPAN]
            .into_iter()
            .filter_map(|shift| BoundingBox::new(other.min_lon + shift, other.min_lat, other.max_lon + shift, other.max_lat).ok())
            .map(|shifted| self.union(&shifted))
            .min_by_key(BoundingBox::width)
            .unwrap_or_else(|| self.union(other))
    }

    /// Parts of this box inside [-180, 180]; two parts if it crosses the
    /// antimeridian.
    pub fn split_antimeridian(&self) -> Vec<BoundingBox> {
        let (mut min_lon, mut max_lon) = (self.min_lon, self.max_lon);
        if min_lon > MAX_LON {
            min_lon -= LON_SPAN;
            max_lon -= LON_SPAN;
        } else if max_lon < -MAX_LON {
            min_lon += LON_SPAN;
            max_lon += LON_SPAN;
        }

        let part = |min_lon, max_lon| BoundingBox { min_lon, max_lon, ..*self };
        if min_lon >= -MAX_LON && max_lon <= MAX_LON {
            vec![part(min_lon, max_lon)]
        } else if max_lon > MAX_LON {
            vec![part(min_lon, MAX_LON), part(-MAX_LON, max_lon - LON_SPAN)]
        } else {
            vec![part(min_lon + LON_SPAN, MAX_LON), part(-MAX_LON, max_lon)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_keeps_osm_precision() {
        let coordinate = Coordinate::from_degrees(-0.1275862, 51.5072178);
        assert_eq!(coordinate, Coordinate::new(-1_275_862, 515_072_178));
        assert!(coordinate.is_valid());
        assert!(!Coordinate::from_degrees(180.5, 0.0).is_valid());
    }

    #[test]
    fn test_inverted_box_is_rejected() {
        let err = BoundingBox::from_degrees(10.0, 5.0, 9.0, 6.0).unwrap_err();
        assert!(matches!(err, Error::InvertedBoundingBox { axis: "longitude", .. }));

        let err = BoundingBox::from_degrees(10.0, 6.0, 11.0, 5.0).unwrap_err();
        assert!(matches!(err, Error::InvertedBoundingBox { axis: "latitude", .. }));
    }

    #[test]
    fn test_out_of_range_box_is_rejected() {
        assert!(BoundingBox::from_degrees(0.0, -91.0, 1.0, 0.0).is_err());
        assert!(BoundingBox::from_degrees(-10.0, 0.0, 355.0, 1.0).is_err());
    }

    #[test]
    fn test_split_antimeridian() {
        let bbox = BoundingBox::from_degrees(170.0, -5.0, 190.0, 5.0).unwrap();
        let parts = bbox.split_antimeridian();
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].min_lon(), parts[0].max_lon()), (170 * SCALE, MAX_LON));
        assert_eq!((parts[1].min_lon(), parts[1].max_lon()), (-MAX_LON, -170 * SCALE));

        let west = BoundingBox::from_degrees(-190.0, 0.0, -175.0, 1.0).unwrap();
        let parts = west.split_antimeridian();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].min_lon(), 170 * SCALE);
        assert_eq!(parts[1].max_lon(), -175 * SCALE);

        assert!(bbox.contains(Coordinate::from_degrees(-175.0, 0.0)));
        assert!(!bbox.contains(Coordinate::from_degrees(0.0, 0.0)));
        assert_eq!(bbox.south_west(), Coordinate::from_degrees(170.0, -5.0));
        assert_eq!(west.south_west(), Coordinate::from_degrees(170.0, 0.0));
    }

    #[test]
    fn test_union_shortest_joins_across_antimeridian() {
        let east = BoundingBox::point(Coordinate::from_degrees(179.9, 10.0)).unwrap();
        let west = BoundingBox::point(Coordinate::from_degrees(-179.9, 11.0)).unwrap();
        assert_eq!(east.union(&west).width(), to_fixed(359.8));

        let joined = east.union_shortest(&west);
        assert_eq!(joined, BoundingBox::new(to_fixed(179.9), to_fixed(10.0), to_fixed(180.1), to_fixed(11.0)).unwrap());
        assert!(joined.contains(Coordinate::from_degrees(-179.95, 10.5)));
        assert_eq!(west.union_shortest(&east).width(), to_fixed(0.2));

        // the plain union wins when it is already the narrower one
        let near = BoundingBox::point(Coordinate::from_degrees(10.0, 0.0)).unwrap();
        assert_eq!(near.union_shortest(&east), near.union(&east));
    }

    #[test]
    fn test_union() {
        let a = BoundingBox::from_degrees(0.0, 0.0, 1.0, 1.0).unwrap();
        let b = BoundingBox::from_degrees(-2.0, 0.5, 0.5, 3.0).unwrap();
        let joined = a.union(&b);
        assert_eq!(joined, BoundingBox::from_degrees(-2.0, 0.0, 1.0, 3.0).unwrap());
    }
}
