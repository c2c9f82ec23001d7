//! Point, range and nearest-neighbour queries over a geohash-keyed
//! `BTreeIndex`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::{DbError, DbResult};
use crate::geo::distance::{haversine, Metres};
use crate::geo::geohash::{self, compose, lat_bits, lng_bits, MAX_PRECISION};
use crate::storage::btree::BTreeIndex;
use crate::storage::page::PageId;
use crate::storage::table::RecordId;

/// Low bits a point lookup tolerates between the query code and a stored key.
pub const RANGE_PRECISION: u32 = 3;

/// Side of a full-precision cell in metres.
pub const BASE_CELL_METRES: f64 = 0.00521025;

/// Upper distance bound used when the caller gives none.
pub const DEFAULT_MAX_DISTANCE: f64 = 6_371_004_000.0;

pub const DISTANCE_EPSILON: f64 = 1e-8;

/// Look up the record stored at `code`. The first key `>= code` is accepted
/// when it lies less than `2^precision` above `code`.
pub fn point(index: &BTreeIndex, code: u64, precision: u32) -> DbResult<RecordId> {
    point_entry(index, code, precision).map(|(_, rid)| rid)
}

/// Like [`point`], but also returns the stored key that matched.
pub fn point_entry(index: &BTreeIndex, code: u64, precision: u32) -> DbResult<(u64, RecordId)> {
    let mut cursor = match index.locate(code) {
        Ok(cursor) => cursor,
        Err(DbError::NoSuchRecord) => return Err(DbError::NotFound),
        Err(e) => return Err(e),
    };
    let (key, rid) = match index.read_forward(&mut cursor) {
        Ok(entry) => entry,
        Err(DbError::EndOfTree) => return Err(DbError::NotFound),
        Err(e) => return Err(e),
    };

    let tolerance = 1u64.checked_shl(precision).unwrap_or(u64::MAX);
    match key.checked_sub(code) {
        Some(gap) if gap < tolerance => Ok((key, rid)),
        _ => Err(DbError::NotFound),
    }
}

/// Closed axis-aligned rectangle in 32-bit axis coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl Rect {
    fn contains(&self, code: u64) -> bool {
        let (x, y) = (lng_bits(code), lat_bits(code));
        (self.x0..=self.x1).contains(&x) && (self.y0..=self.y1).contains(&y)
    }
}

/// Every record whose key lies in the rectangle spanned by `left_down` and
/// `right_up`, edges included. `left_down` must be strictly below and left of
/// `right_up`.
///
/// The walk starts at the lowest code of the rectangle and jumps between
/// leaves by seeds; each leaf is scanned at most once. After a leaf, the
/// smallest in-rectangle code past its last key is always seeded, together
/// with the Z-turn and next-row points of the part of the rectangle the leaf
/// covered.
pub fn range(index: &BTreeIndex, left_down: u64, right_up: u64) -> DbResult<Vec<RecordId>> {
    let order = geohash::compare(left_down, right_up);
    if order.lng != Ordering::Less || order.lat != Ordering::Less {
        return Err(DbError::InvalidRange);
    }
    let rect = Rect {
        x0: lng_bits(left_down),
        x1: lng_bits(right_up),
        y0: lat_bits(left_down),
        y1: lat_bits(right_up),
    };

    let mut out = Vec::new();
    let mut seeds = vec![compose(rect.x0, rect.y0)];
    let mut visited: HashSet<PageId> = HashSet::new();

    while let Some(seed) = seeds.pop() {
        let cursor = match index.locate(seed) {
            Ok(cursor) => cursor,
            Err(DbError::NoSuchRecord) => continue,
            Err(e) => return Err(e),
        };
        if !visited.insert(cursor.pid) {
            continue;
        }

        let leaf = index.load_leaf(cursor.pid)?;
        let Some(last_key) = leaf.last_key() else { continue };

        let seed_row = lat_bits(seed);
        let mut max_x = None;
        let mut max_y = None;
        let mut min_y = None;
        let mut z_shape = false;
        for entry in leaf.entries() {
            if !rect.contains(entry.key) {
                continue;
            }
            out.push(entry.rid);
            let (x, y) = (lng_bits(entry.key), lat_bits(entry.key));
            max_x = max_x.max(Some(x));
            max_y = max_y.max(Some(y));
            min_y = Some(min_y.map_or(y, |m: u32| m.min(y)));
            if y < seed_row {
                z_shape = true;
            }
        }
        debug!(
            "range: leaf {} from seed {:#018x}, {} hits so far",
            cursor.pid,
            seed,
            out.len()
        );

        let mut push = |code: u64| {
            if code > last_key {
                seeds.push(code);
            }
        };
        if let Some(y) = max_y.filter(|&y| y < rect.y1) {
            push(compose(rect.x0, y + 1));
        }
        if let (true, Some(x), Some(y)) = (z_shape, max_x, min_y) {
            if x < rect.x1 {
                push(compose(x + 1, y));
            }
        }
        if let Some(next) = bigmin(last_key, &rect) {
            push(next);
        }
    }

    Ok(out)
}

/// Smallest code greater than `after` whose point lies in `rect`.
fn bigmin(after: u64, rect: &Rect) -> Option<u64> {
    let lo = after.checked_add(1)?;
    descend(0, 0, 0, 0, lo, rect)
}

/// Quadtree walk in Z order. The cell at `depth` starts at `code` and has its
/// lower-left corner at `(x, y)`.
fn descend(code: u64, x: u32, y: u32, depth: u32, lo: u64, rect: &Rect) -> Option<u64> {
    let code_max = code | low_mask(MAX_PRECISION - 2 * depth);
    if code_max < lo {
        return None;
    }
    let side = 32 - depth;
    let x_max = x | low_mask(side) as u32;
    let y_max = y | low_mask(side) as u32;
    if x_max < rect.x0 || x > rect.x1 || y_max < rect.y0 || y > rect.y1 {
        return None;
    }
    if x >= rect.x0 && x_max <= rect.x1 && y >= rect.y0 && y_max <= rect.y1 {
        return Some(code.max(lo));
    }

    // a partly covered cell is never a single point, so depth < 32 here
    let axis_bit = side - 1;
    let code_shift = MAX_PRECISION - 2 * (depth + 1);
    (0..4u64).find_map(|digit| {
        descend(
            code | (digit << code_shift),
            x | (((digit >> 1) as u32) << axis_bit),
            y | (((digit & 1) as u32) << axis_bit),
            depth + 1,
            lo,
            rect,
        )
    })
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Up to `count` records nearest to `(lat, lng)`, closest first, with their
/// distance in metres.
///
/// The search starts at the cell size matching `min_distance` and grows the
/// cell by one level (two bits) at a time, scanning the 3x3 block of cells
/// around the query point, until `count` records are found or the cell
/// matching `max_distance` has been scanned. A `max_distance` of zero means
/// the whole globe.
pub fn nearest(
    index: &BTreeIndex,
    lat: f64,
    lng: f64,
    count: usize,
    min_distance: f64,
    max_distance: f64,
) -> DbResult<Vec<(RecordId, f64)>> {
    let (mut level, end_level) = search_levels(min_distance, max_distance)?;
    let centre = geohash::encode(lat, lng)?;

    let mut answers: HashMap<RecordId, f64> = HashMap::new();
    let mut first = true;

    while level < end_level && answers.len() < count {
        let precision = MAX_PRECISION - level;
        let mut cells = geohash::neighbors(centre, precision)?;
        if first || precision == MAX_PRECISION {
            cells.push(geohash::cell_of(centre, precision));
        }
        first = false;

        for cell in cells {
            if precision == MAX_PRECISION {
                match point_entry(index, cell, RANGE_PRECISION) {
                    Ok((key, rid)) => record_hit(&mut answers, key, rid, lat, lng),
                    Err(DbError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            } else {
                scan_cell(index, cell, level, lat, lng, &mut answers)?;
            }
        }
        debug!("nearest: level {} done, {} candidates", level, answers.len());
        level += 2;
    }

    let mut ranked: Vec<(Metres, RecordId)> =
        answers.into_iter().map(|(rid, d)| (Metres(d), rid)).collect();
    ranked.sort();
    Ok(ranked.into_iter().take(count).map(|(Metres(d), rid)| (rid, d)).collect())
}

/// Keep the smallest distance seen for `rid`. Neighbouring cells can reach
/// the same record more than once.
fn record_hit(answers: &mut HashMap<RecordId, f64>, key: u64, rid: RecordId, lat: f64, lng: f64) {
    let (klat, klng) = geohash::decode(key);
    let d = haversine(lat, lng, klat, klng);
    answers
        .entry(rid)
        .and_modify(|best| *best = best.min(d))
        .or_insert(d);
}

/// Start and end levels of the search, counted in low bits left out of the
/// cell code.
fn search_levels(min_distance: f64, max_distance: f64) -> DbResult<(u32, u32)> {
    let min_distance = min_distance.max(BASE_CELL_METRES);
    let max_distance = if max_distance < DISTANCE_EPSILON {
        DEFAULT_MAX_DISTANCE
    } else {
        max_distance
    };
    if !(max_distance - min_distance >= DISTANCE_EPSILON) {
        return Err(DbError::InvalidDistance);
    }

    let mut cell = BASE_CELL_METRES;
    let mut start = 0;
    while start < MAX_PRECISION && min_distance - cell > DISTANCE_EPSILON {
        cell *= 2.0;
        start += 2;
    }

    let end = if (max_distance - DEFAULT_MAX_DISTANCE).abs() < DISTANCE_EPSILON {
        MAX_PRECISION
    } else {
        let mut end = start;
        while end < MAX_PRECISION && max_distance - cell > DISTANCE_EPSILON {
            cell *= 2.0;
            end += 2;
        }
        end
    };

    if min_distance - BASE_CELL_METRES > BASE_CELL_METRES {
        start = start.saturating_sub(2);
    }
    Ok((start, end.max(start + 2).min(MAX_PRECISION)))
}

/// Add every record in the cell `[start, start + 2^level)` to `answers`.
fn scan_cell(
    index: &BTreeIndex,
    start: u64,
    level: u32,
    lat: f64,
    lng: f64,
    answers: &mut HashMap<RecordId, f64>,
) -> DbResult<()> {
    let end = start.checked_add(1u64 << level);
    let mut cursor = match index.locate(start) {
        Ok(cursor) => cursor,
        Err(DbError::NoSuchRecord) => return Ok(()),
        Err(e) => return Err(e),
    };

    loop {
        let (key, rid) = match index.read_forward(&mut cursor) {
            Ok(entry) => entry,
            Err(DbError::EndOfTree) => return Ok(()),
            Err(e) => return Err(e),
        };
        if end.is_some_and(|end| key >= end) {
            return Ok(());
        }
        record_hit(answers, key, rid, lat, lng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: u32, x1: u32, y0: u32, y1: u32) -> Rect {
        Rect { x0, x1, y0, y1 }
    }

    fn brute_bigmin(after: u64, r: &Rect, limit: u64) -> Option<u64> {
        (after + 1..limit).find(|&c| r.contains(c))
    }

    #[test]
    fn bigmin_matches_brute_force_on_small_grid() {
        // axis values below 8 keep every code below 64
        let r = rect(2, 5, 1, 6);
        for after in 0..63u64 {
            assert_eq!(bigmin(after, &r), brute_bigmin(after, &r, 64), "after {}", after);
        }
    }

    #[test]
    fn bigmin_past_the_rectangle_is_none() {
        let r = rect(0, 3, 0, 3);
        assert_eq!(bigmin(compose(3, 3), &r), None);
        assert_eq!(bigmin(u64::MAX, &r), None);
        assert_eq!(bigmin(0, &rect(0, u32::MAX, 0, u32::MAX)), Some(1));
    }

    #[test]
    fn search_levels_follow_distances() {
        assert_eq!(search_levels(0.0, 0.0).unwrap(), (0, 64));
        // 1 km needs 18 doublings of the base cell, then one step back
        let (start, end) = search_levels(1000.0, 0.0).unwrap();
        assert_eq!(start, 34);
        assert_eq!(end, 64);
        let (start, end) = search_levels(0.0, 1000.0).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 36);
        assert!(matches!(search_levels(10.0, 10.0), Err(DbError::InvalidDistance)));
        assert!(matches!(search_levels(10.0, 5.0), Err(DbError::InvalidDistance)));
    }
}
