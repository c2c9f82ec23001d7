use nom::bytes::complete::take_till;
use nom::character::complete::{char, space0};
use nom::number::complete::double;
use nom::sequence::{delimited, terminated};
use nom::{IResult, Parser};

/// One parsed line of a load file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRecord {
    pub lng: f64,
    pub lat: f64,
    pub value: String,
}

fn coordinate(input: &str) -> IResult<&str, f64> {
    delimited(space0, double, space0).parse(input)
}

fn load_line(input: &str) -> IResult<&str, (f64, f64, &str)> {
    (
        terminated(coordinate, char(',')),
        terminated(coordinate, char(',')),
        take_till(|c: char| c == ',' || c == '\r' || c == '\n'),
    )
        .parse(input)
}

/// Parse `longitude,latitude,value`. The value ends at the next comma or at
/// the end of the line; anything after it is ignored. `None` when a field is
/// missing or a coordinate is not a number.
pub fn parse_load_line(line: &str) -> Option<LoadRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (_, (lng, lat, value)) = load_line(line).ok()?;
    if value.is_empty() {
        return None;
    }
    Some(LoadRecord { lng, lat, value: value.to_string() })
}
