pub mod distance;
pub mod geohash;
pub mod query;
