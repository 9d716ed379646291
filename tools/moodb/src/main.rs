// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! `moodb`: inspect, verify, compare and convert LambdaMOO / ToastStunt textdumps.

mod config;

use crate::config::{CodecArgs, Config};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use eyre::{WrapErr, bail};
use moodb_compare::{TOP_LEVEL_FIELDS, compare_databases};
use moodb_textdump::{
    CURRENT_VERSION, DanglingReference, FLAG_FERTILE, FLAG_PROGRAMMER, FLAG_USER, FLAG_WIZARD,
    MooDatabase, decode_with, decode_with_report, encode_with,
};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "moodb")]
#[command(about = "Inspect, verify, compare and convert LambdaMOO / ToastStunt textdumps")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    codec: CodecArgs,

    /// YAML config file; command line flags override its settings
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Enable debug logging (logs go to stderr)
    #[arg(long, global = true, default_value = "false")]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of a textdump.
    Info { path: PathBuf },

    /// Decode and re-encode a textdump, then check the result against the input.
    Roundtrip {
        path: PathBuf,

        /// Also write the re-encoded textdump to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Compare two textdumps structurally.
    Diff {
        expected: PathBuf,
        actual: PathBuf,

        /// Top-level fields to leave out of the comparison (comma separated)
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,

        /// Stop after this many differences
        #[arg(long)]
        max_diffs: Option<usize>,

        /// How many differences to list in the report
        #[arg(long, default_value_t = 50)]
        show: usize,

        /// Print the differences as JSON instead of a report
        #[arg(long)]
        json: bool,
    },

    /// Read a textdump of any supported version and write it as the current version.
    Convert { input: PathBuf, output: PathBuf },
}

fn main() -> Result<ExitCode, eyre::Report> {
    color_eyre::install()?;
    let args = Args::parse();
    setup_logging(args.debug);

    let mut config = Config::load(args.config_file.as_deref())?;
    config.merge_args(&args.codec);

    match args.command {
        Command::Info { path } => info_command(&path, &config)?,
        Command::Roundtrip { path, output } => {
            roundtrip_command(&path, output.as_deref(), &config)?
        }
        Command::Diff {
            expected,
            actual,
            ignore,
            max_diffs,
            show,
            json,
        } => {
            config.ignore_fields.extend(ignore);
            if max_diffs.is_some() {
                config.max_diffs = max_diffs;
            }
            return diff_command(&expected, &actual, show, json, &config);
        }
        Command::Convert { input, output } => convert_command(&input, &output, &config)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn setup_logging(debug: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load(
    path: &Path,
    config: &Config,
) -> Result<(MooDatabase, Vec<DanglingReference>), eyre::Report> {
    let file = File::open(path).wrap_err_with(|| format!("Unable to open {path:?}"))?;
    let (db, dangling) = decode_with_report(BufReader::new(file), &config.reader_options())
        .wrap_err_with(|| format!("Unable to decode {path:?}"))?;
    info!(
        ?path,
        version = db.version.number(),
        objects = db.objects.len(),
        "Loaded textdump"
    );
    Ok((db, dangling))
}

fn info_command(path: &Path, config: &Config) -> Result<(), eyre::Report> {
    let (db, dangling) = load(path, config)?;
    let anonymous = db.anonymous_objects().count();
    let properties: usize = db.objects.values().map(|o| o.properties.len()).sum();
    let verbs: usize = db.objects.values().map(|o| o.verbs.len()).sum();

    println!("version:     {} ({})", db.version.number(), db.version_string);
    println!(
        "objects:     {} declared, {} present, {} recycled, {anonymous} anonymous",
        db.total_objects,
        db.objects.len() - anonymous,
        db.recycled_objects.len()
    );
    println!("players:     {}", db.players.len());
    println!(
        "flags:       {} users, {} programmers, {} wizards, {} fertile",
        count_flagged(&db, FLAG_USER),
        count_flagged(&db, FLAG_PROGRAMMER),
        count_flagged(&db, FLAG_WIZARD),
        count_flagged(&db, FLAG_FERTILE)
    );
    println!("verbs:       {verbs}, {} with programs", db.program_count());
    println!("properties:  {properties}");
    println!("waifs:       {}", db.waifs.len());
    println!(
        "tasks:       {} queued, {} suspended, {} interrupted",
        db.queued_tasks.len(),
        db.suspended_tasks.len(),
        db.interrupted_tasks.len()
    );
    println!(
        "connections: {}{}",
        db.connections.len(),
        if db.connections_with_listeners {
            " (with listeners)"
        } else {
            ""
        }
    );
    println!("line ending: {}", db.line_ending);
    println!("dangling:    {}", dangling.len());
    for reference in &dangling {
        println!("  {reference}");
    }
    Ok(())
}

fn count_flagged(db: &MooDatabase, flag: u8) -> usize {
    db.objects.values().filter(|o| o.has_flag(flag)).count()
}

fn roundtrip_command(
    path: &Path,
    output: Option<&Path>,
    config: &Config,
) -> Result<(), eyre::Report> {
    let input = fs::read(path).wrap_err_with(|| format!("Unable to read {path:?}"))?;
    let (db, dangling) = decode_with_report(&input[..], &config.reader_options())
        .wrap_err_with(|| format!("Unable to decode {path:?}"))?;
    if !dangling.is_empty() {
        warn!(count = dangling.len(), "Input holds dangling references");
    }

    let mut encoded = vec![];
    encode_with(&db, &mut encoded, &config.writer_options())?;
    if let Some(output) = output {
        fs::write(output, &encoded).wrap_err_with(|| format!("Unable to write {output:?}"))?;
        info!(?output, "Wrote re-encoded textdump");
    }

    let mut lossless = true;
    if db.version != CURRENT_VERSION {
        println!(
            "Input is format version {}, skipping the line comparison",
            db.version.number()
        );
    } else if config.line_ending.is_some() {
        println!("Line ending was overridden, skipping the line comparison");
    } else {
        match first_line_difference(&input, &encoded) {
            None => println!("Output is line-for-line identical to the input"),
            Some((line, expected, actual)) => {
                lossless = false;
                println!("Line {line} differs:\n  input:  {expected}\n  output: {actual}");
            }
        }
    }

    let reread = decode_with(&encoded[..], &config.reader_options())
        .wrap_err("Unable to decode the re-encoded textdump")?;
    let result = compare_databases(&db, &reread, &config.compare_options());
    println!("{}", result.report(50));
    if !lossless || !result.identical() {
        bail!("Round trip of {path:?} was not lossless");
    }
    Ok(())
}

fn diff_command(
    expected: &Path,
    actual: &Path,
    show: usize,
    json: bool,
    config: &Config,
) -> Result<ExitCode, eyre::Report> {
    for field in &config.ignore_fields {
        if !TOP_LEVEL_FIELDS.contains(&field.as_str()) {
            warn!(field = %field, "Ignoring a field that is never compared");
        }
    }
    let (expected_db, _) = load(expected, config)?;
    let (actual_db, _) = load(actual, config)?;
    let result = compare_databases(&expected_db, &actual_db, &config.compare_options());

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.report(show));
    }
    // Like diff(1): a non-zero status means the databases differ.
    if result.identical() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn convert_command(input: &Path, output: &Path, config: &Config) -> Result<(), eyre::Report> {
    let (db, dangling) = load(input, config)?;
    if !dangling.is_empty() {
        warn!(count = dangling.len(), "Input holds dangling references");
    }
    let file = File::create(output).wrap_err_with(|| format!("Unable to create {output:?}"))?;
    let mut writer = BufWriter::new(file);
    encode_with(&db, &mut writer, &config.writer_options())
        .wrap_err_with(|| format!("Unable to encode {output:?}"))?;
    writer.flush()?;
    info!(
        ?output,
        from = db.version.number(),
        to = CURRENT_VERSION.number(),
        "Converted textdump"
    );
    Ok(())
}

/// The first line, counting from 1, at which two textdumps differ, with both renditions.
fn first_line_difference(expected: &[u8], actual: &[u8]) -> Option<(usize, String, String)> {
    let expected: Vec<&[u8]> = expected.split(|b| *b == b'\n').collect();
    let actual: Vec<&[u8]> = actual.split(|b| *b == b'\n').collect();
    let render = |line: Option<&&[u8]>| match line {
        Some(line) => format!("{:?}", String::from_utf8_lossy(line)),
        None => "<end of file>".to_string(),
    };
    (0..expected.len().max(actual.len()))
        .find(|i| expected.get(*i) != actual.get(*i))
        .map(|i| (i + 1, render(expected.get(i)), render(actual.get(i))))
}
