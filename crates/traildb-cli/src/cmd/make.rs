// crates/traildb-cli/src/cmd/make.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use clap::{Args, ValueEnum};
use traildb_core::{ConsOptions, Constructor, OutputFormat};

use super::parse_uuid;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum TdbFormat {
    /// Plain directory of files.
    Dir,
    /// Single-file package.
    Pkg,
}

#[derive(Args)]
pub struct MakeArgs {
    /// Input file; '-' reads stdin. Each line: uuid, timestamp, then one
    /// column per field.
    #[arg(long, short = 'i', default_value = "-")]
    pub input: String,

    /// Output tdb root (a directory, or <root>.tdb with --tdb-format pkg)
    #[arg(long, short = 'o', default_value = "a")]
    pub output: String,

    /// Comma-separated field names, in input column order
    #[arg(long, short = 'f', value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Column delimiter (one character)
    #[arg(long, short = 'd', default_value = " ")]
    pub delimiter: String,

    /// Input is CSV-style delimited text (the default)
    #[arg(long, short = 'c')]
    pub csv: bool,

    /// Input is JSON lines: {"uuid": ..., "time": ..., "<field>": ...}
    #[arg(long, short = 'j', conflicts_with = "csv")]
    pub json: bool,

    /// Skip the first input line
    #[arg(long)]
    pub csv_header: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = TdbFormat::Dir)]
    pub tdb_format: TdbFormat,
}

pub fn run(args: MakeArgs) -> anyhow::Result<()> {
    if args.output == "-" {
        bail!("cannot output a tdb to stdout");
    }
    if args.delimiter.len() != 1 {
        bail!("delimiter must be one character, not '{}'", args.delimiter);
    }
    if Path::new(&args.output).exists() {
        bail!("output {} already exists", args.output);
    }
    let package_path = format!("{}.tdb", args.output);
    if Path::new(&package_path).exists() {
        bail!("output {package_path} already exists");
    }

    let opts = ConsOptions {
        output_format: match args.tdb_format {
            TdbFormat::Dir => OutputFormat::Dir,
            TdbFormat::Pkg => OutputFormat::Package,
        },
        ..ConsOptions::default()
    };
    let field_refs: Vec<&str> = args.fields.iter().map(|s| s.as_str()).collect();
    let mut cons = Constructor::with_options(&args.output, &field_refs, opts)?;

    let input: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(
            File::open(&args.input).with_context(|| format!("open {}", args.input))?,
        ))
    };

    let delimiter = args.delimiter.chars().next().unwrap_or(' ');
    let mut num_events = 0u64;
    for (lineno, line) in input.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line?;
        if lineno == 1 && args.csv_header {
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let (uuid, timestamp, values) = if args.json {
            parse_json_line(&line, &args.fields)
        } else {
            parse_delimited_line(&line, delimiter, args.fields.len())
        }
        .with_context(|| format!("line {lineno}"))?;

        let value_refs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
        cons.add(&uuid, timestamp, &value_refs)
            .with_context(|| format!("line {lineno}: adding event failed"))?;
        num_events += 1;
    }

    cons.finalize()?;
    eprintln!("make ok: out={} events={num_events}", args.output);
    Ok(())
}

fn parse_delimited_line(
    line: &str,
    delimiter: char,
    num_fields: usize,
) -> anyhow::Result<(traildb_core::Uuid, u64, Vec<Vec<u8>>)> {
    let mut cols = line.split(delimiter);
    let uuid_col = cols.next().context("UUID missing")?;
    let tstamp_col = cols.next().context("timestamp missing")?;

    let uuid = parse_uuid(uuid_col)?;
    let timestamp: u64 = tstamp_col
        .parse()
        .with_context(|| format!("invalid timestamp '{tstamp_col}'"))?;

    let mut values = vec![Vec::new(); num_fields];
    for (slot, col) in values.iter_mut().zip(cols) {
        *slot = col.as_bytes().to_vec();
    }
    Ok((uuid, timestamp, values))
}

fn parse_json_line(
    line: &str,
    fields: &[String],
) -> anyhow::Result<(traildb_core::Uuid, u64, Vec<Vec<u8>>)> {
    let doc: serde_json::Value = serde_json::from_str(line)?;
    let obj = doc.as_object().context("expected a JSON object")?;

    let uuid_str = obj
        .get("uuid")
        .and_then(|v| v.as_str())
        .context("UUID missing")?;
    let uuid = parse_uuid(uuid_str)?;
    let timestamp = obj
        .get("time")
        .and_then(|v| v.as_u64())
        .context("timestamp missing")?;

    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let value = match obj.get(field) {
            Some(serde_json::Value::String(s)) => s.clone().into_bytes(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(other) => other.to_string().into_bytes(),
        };
        values.push(value);
    }
    Ok((uuid, timestamp, values))
}
