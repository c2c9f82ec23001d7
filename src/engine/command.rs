use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{multispace0, multispace1, u64 as unsigned};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::number::complete::double;
use nom::sequence::preceded;
use nom::{IResult, Parser};

/// Results returned by `nearest` when the command gives no count.
pub const DEFAULT_NEAREST_COUNT: usize = 10;

/// A shell command. Coordinates are given longitude first.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load { table: String, file: String, duplicates: bool },
    Point { table: String, lng: f64, lat: f64 },
    Range { table: String, lng0: f64, lat0: f64, lng1: f64, lat1: f64 },
    Nearest { table: String, lng: f64, lat: f64, count: usize, min: f64, max: f64 },
    Stats,
    Exit,
}

fn word(input: &str) -> IResult<&str, &str> {
    preceded(multispace1, take_while1(|c: char| !c.is_whitespace())).parse(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    preceded(multispace1, double).parse(input)
}

fn count(input: &str) -> IResult<&str, usize> {
    map_res(preceded(multispace1, unsigned), usize::try_from).parse(input)
}

fn load(input: &str) -> IResult<&str, Command> {
    map(
        preceded(tag("load"), (word, word, opt(preceded(multispace1, tag("dup"))))),
        |(table, file, dup)| Command::Load {
            table: table.to_string(),
            file: file.to_string(),
            duplicates: dup.is_some(),
        },
    )
    .parse(input)
}

fn point(input: &str) -> IResult<&str, Command> {
    map(preceded(tag("point"), (word, number, number)), |(table, lng, lat)| Command::Point {
        table: table.to_string(),
        lng,
        lat,
    })
    .parse(input)
}

fn range(input: &str) -> IResult<&str, Command> {
    map(
        preceded(tag("range"), (word, number, number, number, number)),
        |(table, lng0, lat0, lng1, lat1)| Command::Range {
            table: table.to_string(),
            lng0,
            lat0,
            lng1,
            lat1,
        },
    )
    .parse(input)
}

fn nearest(input: &str) -> IResult<&str, Command> {
    map(
        preceded(
            tag("nearest"),
            (word, number, number, opt((count, opt((number, opt(number)))))),
        ),
        |(table, lng, lat, rest)| {
            let (count, bounds) = match rest {
                Some((count, bounds)) => (count, bounds),
                None => (DEFAULT_NEAREST_COUNT, None),
            };
            let (min, max) = match bounds {
                Some((min, max)) => (min, max.unwrap_or(0.0)),
                None => (0.0, 0.0),
            };
            Command::Nearest { table: table.to_string(), lng, lat, count, min, max }
        },
    )
    .parse(input)
}

fn command(input: &str) -> IResult<&str, Command> {
    alt((
        load,
        point,
        range,
        nearest,
        value(Command::Stats, tag("stats")),
        value(Command::Exit, alt((tag(".exit"), tag("exit")))),
    ))
    .parse(input)
}

/// Parse one line of shell input.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    all_consuming((command, multispace0))
        .parse(line)
        .map(|(_, (cmd, _))| cmd)
        .map_err(|_| format!("Unrecognized command '{}'", line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_with_and_without_dup() {
        assert_eq!(
            parse_command("load geo data/points.csv").unwrap(),
            Command::Load { table: "geo".into(), file: "data/points.csv".into(), duplicates: false }
        );
        assert_eq!(
            parse_command("load geo points.csv dup").unwrap(),
            Command::Load { table: "geo".into(), file: "points.csv".into(), duplicates: true }
        );
    }

    #[test]
    fn point_and_range() {
        assert_eq!(
            parse_command("point geo 120.935 30.844").unwrap(),
            Command::Point { table: "geo".into(), lng: 120.935, lat: 30.844 }
        );
        assert_eq!(
            parse_command("  range geo 120 30 121 31  ").unwrap(),
            Command::Range { table: "geo".into(), lng0: 120.0, lat0: 30.0, lng1: 121.0, lat1: 31.0 }
        );
    }

    #[test]
    fn nearest_optional_arguments() {
        assert_eq!(
            parse_command("nearest geo 120 30").unwrap(),
            Command::Nearest {
                table: "geo".into(),
                lng: 120.0,
                lat: 30.0,
                count: DEFAULT_NEAREST_COUNT,
                min: 0.0,
                max: 0.0
            }
        );
        assert_eq!(
            parse_command("nearest geo 120 30 3 100").unwrap(),
            Command::Nearest { table: "geo".into(), lng: 120.0, lat: 30.0, count: 3, min: 100.0, max: 0.0 }
        );
        assert_eq!(
            parse_command("nearest geo 120 30 3 100 5000").unwrap(),
            Command::Nearest { table: "geo".into(), lng: 120.0, lat: 30.0, count: 3, min: 100.0, max: 5000.0 }
        );
    }

    #[test]
    fn keywords_and_errors() {
        assert_eq!(parse_command("stats").unwrap(), Command::Stats);
        assert_eq!(parse_command(".exit").unwrap(), Command::Exit);
        assert!(parse_command("point geo 120").is_err());
        assert!(parse_command("range geo 1 2 3").is_err());
        assert!(parse_command("select * from geo").is_err());
        assert!(parse_command("point geo 1 2 3").is_err());
    }

    #[test]
    fn nearest_count_must_be_a_whole_number() {
        assert!(parse_command("nearest geo 120 30 -3").is_err());
        assert!(parse_command("nearest geo 120 30 2.9").is_err());
        assert!(parse_command("nearest geo 120 30 1e3").is_err());
        assert!(matches!(
            parse_command("nearest geo 120 30 0"),
            Ok(Command::Nearest { count: 0, .. })
        ));
    }
}
