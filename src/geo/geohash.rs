//! 64-bit geohash codec.
//!
//! A coordinate is normalised to `[-1, 1)` per axis (`lat / 90`, `lng / 180`),
//! mapped onto `u64` so that integer order follows numeric order, and cut to
//! its top 32 bits. The two 32-bit axis values are then interleaved into one
//! Z-order code: bit `2k + 1` is longitude bit `k`, bit `2k` is latitude bit `k`.

use std::cmp::Ordering;

use lazy_static::lazy_static;
use thiserror::Error;

pub const LNG_MASK: u64 = 0xAAAA_AAAA_AAAA_AAAA;
pub const LAT_MASK: u64 = 0x5555_5555_5555_5555;

/// Bits in a full-precision code.
pub const MAX_PRECISION: u32 = 64;

const HALF: u64 = 0x8000_0000_0000_0000;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const MANTISSA: u64 = 0x000F_FFFF_FFFF_FFFF;
const HIDDEN_BIT: u64 = 0x0010_0000_0000_0000;
const EXP_BIAS: u64 = 0x3FF;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeohashError {
    #[error("invalid geohash argument: {0}")]
    InvalidArgument(String),
}

lazy_static! {
    /// `SPREAD[b]` holds the bits of `b` moved to the even positions of a u16.
    static ref SPREAD: [u16; 256] = {
        let mut table = [0u16; 256];
        for (byte, slot) in table.iter_mut().enumerate() {
            let mut spread = 0u16;
            for bit in 0..8 {
                spread |= (((byte >> bit) & 1) as u16) << (2 * bit);
            }
            *slot = spread;
        }
        table
    };
}

fn interleave(upper: u8, lower: u8) -> u16 {
    (SPREAD[upper as usize] << 1) + SPREAD[lower as usize]
}

/// Map `x` in `[-1, 1)` onto `u64`, preserving order. Zero and denormals
/// land on the midpoint.
fn unit_to_u64(x: f64) -> Option<u64> {
    if !(-1.0..1.0).contains(&x) {
        return None;
    }
    let bits = x.to_bits();
    let exp = (bits >> 52) & 0x7FF;
    if exp == 0 {
        return Some(HALF);
    }
    if exp == 0x7FF {
        return None;
    }

    let mantissa = (bits & MANTISSA) | HIDDEN_BIT;
    let shift = exp as i64 - EXP_BIAS as i64 + 11;
    let magnitude = if shift > 0 {
        mantissa << shift
    } else {
        mantissa.checked_shr((-shift) as u32).unwrap_or(0)
    };

    if bits & SIGN_BIT != 0 {
        Some(HALF - magnitude)
    } else {
        Some(HALF + magnitude)
    }
}

fn u64_to_unit(v: u64) -> f64 {
    if v == HALF {
        return 0.0;
    }
    let (negative, magnitude) = if v < HALF { (true, HALF - v) } else { (false, v - HALF) };

    let zeros = magnitude.leading_zeros() as u64;
    let mantissa = if zeros > 11 {
        magnitude << (zeros - 11)
    } else {
        magnitude >> (11 - zeros)
    };
    let mut bits = ((EXP_BIAS - zeros) << 52) + (mantissa & MANTISSA);
    if negative {
        bits |= SIGN_BIT;
    }
    f64::from_bits(bits)
}

/// Encode a coordinate. Latitude must be in `[-90, 90)`, longitude in
/// `[-180, 180)`.
pub fn encode(lat: f64, lng: f64) -> Result<u64, GeohashError> {
    let lat64 = unit_to_u64(lat / 90.0)
        .ok_or_else(|| GeohashError::InvalidArgument(format!("latitude {} out of range", lat)))?;
    let lng64 = unit_to_u64(lng / 180.0)
        .ok_or_else(|| GeohashError::InvalidArgument(format!("longitude {} out of range", lng)))?;
    Ok(compose((lng64 >> 32) as u32, (lat64 >> 32) as u32))
}

/// Decode to `(lat, lng)`, the lower-left corner of the code's cell.
pub fn decode(code: u64) -> (f64, f64) {
    let lat = u64_to_unit((lat_bits(code) as u64) << 32);
    let lng = u64_to_unit((lng_bits(code) as u64) << 32);
    (lat * 90.0, lng * 180.0)
}

/// Interleave two 32-bit axis values into a code.
pub fn compose(lng: u32, lat: u32) -> u64 {
    let lng = lng.to_le_bytes();
    let lat = lat.to_le_bytes();
    let mut code = 0u64;
    for k in 0..4 {
        code |= (interleave(lng[k], lat[k]) as u64) << (16 * k);
    }
    code
}

pub fn lng_bits(code: u64) -> u32 {
    compact(code >> 1)
}

pub fn lat_bits(code: u64) -> u32 {
    compact(code)
}

fn compact(code: u64) -> u32 {
    let mut out = 0u32;
    for i in 0..32 {
        out |= (((code >> (2 * i)) & 1) as u32) << i;
    }
    out
}

/// Per-axis comparison of two codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZOrdering {
    pub lng: Ordering,
    pub lat: Ordering,
}

pub fn compare(a: u64, b: u64) -> ZOrdering {
    ZOrdering {
        lng: (a & LNG_MASK).cmp(&(b & LNG_MASK)),
        lat: (a & LAT_MASK).cmp(&(b & LAT_MASK)),
    }
}

/// `code` with every bit below the leading `precision` bits cleared.
pub fn cell_of(code: u64, precision: u32) -> u64 {
    match precision {
        0 => 0,
        p if p >= MAX_PRECISION => code,
        p => code & !(u64::MAX >> p),
    }
}

/// The cells around `code` at `precision` leading bits, as the start code of
/// each cell. Longitude gets `ceil(precision / 2)` bits and latitude the rest.
///
/// Neighbours that would cross the edge of the coordinate space on either
/// axis are left out, so the result holds between 1 and 8 codes.
pub fn neighbors(code: u64, precision: u32) -> Result<Vec<u64>, GeohashError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeohashError::InvalidArgument(format!(
            "precision {} not in 1..=64",
            precision
        )));
    }
    let lat_len = precision / 2;
    let lng_len = precision - lat_len;

    let lats = axis_variants(lat_bits(code), lat_len);
    let lngs = axis_variants(lng_bits(code), lng_len);

    let mut out = Vec::with_capacity(8);
    for (i, lat) in lats.iter().enumerate() {
        let Some(lat) = lat else { continue };
        for (j, lng) in lngs.iter().enumerate() {
            let Some(lng) = lng else { continue };
            if i == 0 && j == 0 {
                continue;
            }
            out.push(compose(*lng, *lat));
        }
    }
    if out.len() == 8 {
        out.swap(3, 5);
    }
    Ok(out)
}

/// `[same, minus one cell, plus one cell]` for the leading `len` bits of
/// `value`, aligned back to the top of a u32. Steps past either edge are
/// `None`.
fn axis_variants(value: u32, len: u32) -> [Option<u32>; 3] {
    if len == 0 {
        return [Some(0), None, None];
    }
    let shift = 32 - len;
    let cell = value >> shift;
    let last = u32::MAX >> shift;
    let align = |c: u32| c << shift;

    [
        Some(align(cell)),
        cell.checked_sub(1).map(align),
        (cell < last).then(|| align(cell + 1)),
    ]
}
