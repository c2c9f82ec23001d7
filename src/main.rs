// src/main.rs

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use geodb::engine::command::{parse_command, Command};
use geodb::engine::{Engine, EngineConfig, TablePaths};

const DEFAULT_DATA_DIR: &str = "data";

fn data_dir() -> PathBuf {
    env::var_os("GEODB_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn run(engine: &Engine, dir: &Path, cmd: Command) {
    match cmd {
        Command::Load { table, file, duplicates } => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Cannot create data directory {}: {}", dir.display(), e);
                return;
            }
            let paths = TablePaths::in_dir(dir, &table);
            match engine.load(&paths, &file, duplicates) {
                Ok(report) => println!(
                    "Loaded {} records into '{}' ({} lines skipped)",
                    report.loaded, table, report.skipped
                ),
                Err(e) => warn!("Error loading {} into {}: {}", file, table, e),
            }
        }
        Command::Point { table, lng, lat } => {
            let paths = TablePaths::in_dir(dir, &table);
            match engine.point(&paths, lng, lat) {
                Ok(Some(value)) => println!("{:.6}, {:.6}, {}", lng, lat, value),
                Ok(None) => println!("(no record at {:.6}, {:.6})", lng, lat),
                Err(e) => warn!("Error querying {}: {}", table, e),
            }
        }
        Command::Range { table, lng0, lat0, lng1, lat1 } => {
            let paths = TablePaths::in_dir(dir, &table);
            match engine.range(&paths, (lng0, lat0), (lng1, lat1)) {
                Ok(values) => {
                    for value in &values {
                        println!("{}", value);
                    }
                    println!("({} rows)", values.len());
                }
                Err(e) => warn!("Error querying {}: {}", table, e),
            }
        }
        Command::Nearest { table, lng, lat, count, min, max } => {
            let paths = TablePaths::in_dir(dir, &table);
            match engine.nearest(&paths, lng, lat, count, min, max) {
                Ok(found) => {
                    for rec in &found {
                        println!("{:.6}, {:.6}, {}, dis: {:.5}", rec.lng, rec.lat, rec.value, rec.distance);
                    }
                    println!("({} rows)", found.len());
                }
                Err(e) => warn!("Error querying {}: {}", table, e),
            }
        }
        Command::Stats => {
            println!(
                "page reads: {}, page writes: {}",
                engine.page_reads(),
                engine.page_writes()
            );
        }
        Command::Exit => {}
    }
}

fn main() -> io::Result<()> {
    env_logger::init();
    let dir = data_dir();
    info!("geodb, data directory {}. Type .exit to quit.", dir.display());

    let engine = Engine::new(EngineConfig::default());

    loop {
        print!("geodb> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_command(trimmed) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                debug!("{:?}", cmd);
                run(&engine, &dir, cmd);
            }
            Err(msg) => warn!("{}", msg),
        }
    }

    Ok(())
}
