use std::cmp::Ordering;
use std::f64::consts::PI;

/// Equatorial radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6378.137;

fn rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

/// Great-circle distance in metres between two `(lat, lng)` points.
pub fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let rad_lat1 = rad(lat1);
    let rad_lat2 = rad(lat2);
    let d_lat = rad_lat1 - rad_lat2;
    let d_lng = rad(lng1) - rad(lng2);

    let h = (d_lat / 2.0).sin().powi(2) + rad_lat1.cos() * rad_lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * h.sqrt().asin() * EARTH_RADIUS_KM * 1000.0
}

/// A distance with a total order, usable as a set key.
#[derive(Debug, Clone, Copy)]
pub struct Metres(pub f64);

impl PartialEq for Metres {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Metres {}

impl PartialOrd for Metres {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Metres {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_for_the_same_point() {
        assert_eq!(haversine(30.0, 120.0, 30.0, 120.0), 0.0);
    }

    #[test]
    fn one_degree_of_longitude_on_the_equator() {
        let d = haversine(0.0, 0.0, 0.0, 1.0);
        let expected = EARTH_RADIUS_KM * 1000.0 * PI / 180.0;
        assert!((d - expected).abs() < 1e-6, "{}", d);
    }

    #[test]
    fn symmetric() {
        let a = haversine(30.844, 120.935, 30.195, 120.166);
        let b = haversine(30.195, 120.166, 30.844, 120.935);
        assert!((a - b).abs() < 1e-9);
        assert!(a > 100_000.0 && a < 110_000.0, "{}", a);
    }

    #[test]
    fn metres_sort_totally() {
        let mut v = vec![Metres(3.0), Metres(-0.0), Metres(1.5), Metres(0.0)];
        v.sort();
        assert_eq!(v.iter().map(|m| m.0).collect::<Vec<_>>(), vec![-0.0, 0.0, 1.5, 3.0]);
    }
}
