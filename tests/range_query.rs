use std::collections::BTreeMap;
use std::path::Path;

use geodb::error::DbError;
use geodb::geo::geohash::{self, lat_bits, lng_bits};
use geodb::geo::query;
use geodb::storage::btree::{BTreeIndex, IndexOptions};
use geodb::storage::cache::{PageCache, CACHE_CAPACITY};
use geodb::storage::table::RecordId;
use proptest::prelude::*;
use tempfile::tempdir;

/// Grid cell `(i, j)` of a 0.01 degree grid anchored at 120E 30N.
fn grid(i: u32, j: u32) -> u64 {
    geohash::encode(30.0 + j as f64 * 0.01, 120.0 + i as f64 * 0.01).unwrap()
}

fn build(path: &Path, cells: &[(u32, u32)]) -> (BTreeIndex, BTreeMap<u64, RecordId>) {
    let options = IndexOptions::default().capacities(4, 4);
    let mut index = BTreeIndex::open(path, 'w', PageCache::shared(CACHE_CAPACITY), options).unwrap();
    let mut stored = BTreeMap::new();
    for (n, &(i, j)) in cells.iter().enumerate() {
        let rid = RecordId::new(n as u32 / 151, n as u32 % 151);
        let key = grid(i, j);
        index.insert(key, rid).unwrap();
        stored.insert(key, rid);
    }
    (index, stored)
}

fn inside(stored: &BTreeMap<u64, RecordId>, lo: u64, hi: u64) -> Vec<RecordId> {
    let mut rids: Vec<RecordId> = stored
        .iter()
        .filter(|(k, _)| {
            let (x, y) = (lng_bits(**k), lat_bits(**k));
            x >= lng_bits(lo) && x <= lng_bits(hi) && y >= lat_bits(lo) && y <= lat_bits(hi)
        })
        .map(|(_, rid)| *rid)
        .collect();
    rids.sort();
    rids
}

fn run(index: &BTreeIndex, lo: u64, hi: u64) -> Vec<RecordId> {
    let mut rids = query::range(index, lo, hi).unwrap();
    rids.sort();
    rids
}

#[test]
fn points_on_the_edges_are_included() {
    let dir = tempdir().unwrap();
    let cells = [(2, 2), (2, 5), (6, 2), (6, 5), (4, 3), (1, 3), (7, 3), (4, 6), (4, 1)];
    let (index, stored) = build(&dir.path().join("r.idx"), &cells);

    let got = run(&index, grid(2, 2), grid(6, 5));
    assert_eq!(got.len(), 5);
    assert_eq!(got, inside(&stored, grid(2, 2), grid(6, 5)));
}

#[test]
fn degenerate_rectangles_are_rejected() {
    let dir = tempdir().unwrap();
    let (index, _) = build(&dir.path().join("r.idx"), &[(1, 1), (2, 2)]);

    assert!(matches!(query::range(&index, grid(3, 1), grid(3, 4)), Err(DbError::InvalidRange)));
    assert!(matches!(query::range(&index, grid(1, 4), grid(3, 4)), Err(DbError::InvalidRange)));
    assert!(matches!(query::range(&index, grid(5, 5), grid(1, 1)), Err(DbError::InvalidRange)));
}

#[test]
fn empty_index_gives_nothing() {
    let dir = tempdir().unwrap();
    let (index, _) = build(&dir.path().join("r.idx"), &[]);
    assert!(run(&index, grid(0, 0), grid(9, 9)).is_empty());
}

#[test]
fn rectangle_past_every_key_gives_nothing() {
    let dir = tempdir().unwrap();
    let (index, _) = build(&dir.path().join("r.idx"), &[(1, 1), (2, 2), (3, 3)]);
    assert!(run(&index, grid(50, 50), grid(60, 60)).is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_range_matches_brute_force(
        cells in prop::collection::vec((0u32..64, 0u32..64), 0..250),
        (i0, di) in (0u32..63, 1u32..40),
        (j0, dj) in (0u32..63, 1u32..40),
    ) {
        let dir = tempdir().unwrap();
        let (index, stored) = build(&dir.path().join("r.idx"), &cells);

        let lo = grid(i0, j0);
        let hi = grid(i0 + di, j0 + dj);
        let got = run(&index, lo, hi);

        let mut unique = got.clone();
        unique.dedup();
        prop_assert_eq!(unique.len(), got.len());
        prop_assert_eq!(got, inside(&stored, lo, hi));
    }
}
