// crates/traildb-cli/src/cmd/dump.rs

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{bail, Context};
use clap::Args;
use traildb_core::TrailDb;

use super::format_uuid;

#[derive(Args)]
pub struct DumpArgs {
    /// tdb root to read (directory or package file)
    #[arg(long, short = 'i', default_value = "a")]
    pub input: String,

    /// Output file; '-' writes stdout
    #[arg(long, short = 'o', default_value = "-")]
    pub output: String,

    /// Column delimiter (one character)
    #[arg(long, short = 'd', default_value = " ")]
    pub delimiter: String,

    /// Emit delimited text (the default)
    #[arg(long, short = 'c')]
    pub csv: bool,

    /// Emit JSON lines
    #[arg(long, short = 'j', conflicts_with = "csv")]
    pub json: bool,

    /// Emit a header line naming the columns
    #[arg(long)]
    pub csv_header: bool,
}

pub fn run(args: DumpArgs) -> anyhow::Result<()> {
    if args.delimiter.len() != 1 {
        bail!("delimiter must be one character, not '{}'", args.delimiter);
    }
    let delimiter = args.delimiter.chars().next().unwrap_or(' ');

    let db = TrailDb::open(&args.input).with_context(|| format!("open {}", args.input))?;

    let mut out: Box<dyn Write> = if args.output == "-" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        Box::new(BufWriter::new(
            File::create(&args.output).with_context(|| format!("create {}", args.output))?,
        ))
    };

    let field_names: Vec<&str> = (1..db.num_fields())
        .map(|f| db.get_field_name(f as u32).unwrap_or(""))
        .collect();

    if args.csv_header && !args.json {
        write!(out, "uuid{delimiter}time")?;
        for name in &field_names {
            write!(out, "{delimiter}{name}")?;
        }
        writeln!(out)?;
    }

    let mut cursor = db.cursor();
    for trail_id in 0..db.num_trails() {
        cursor.get_trail(trail_id)?;
        let uuid = db
            .get_uuid(trail_id)
            .map(|u| format_uuid(&u))
            .unwrap_or_default();

        while let Some(event) = cursor.next() {
            if args.json {
                let mut obj = serde_json::Map::new();
                obj.insert("uuid".into(), uuid.clone().into());
                obj.insert("time".into(), event.timestamp.into());
                for item in event.items {
                    let name = db.get_field_name(item.field()).unwrap_or("");
                    let value = db.get_item_value(*item).unwrap_or(b"");
                    obj.insert(
                        name.to_string(),
                        String::from_utf8_lossy(value).into_owned().into(),
                    );
                }
                writeln!(out, "{}", serde_json::Value::Object(obj))?;
            } else {
                write!(out, "{uuid}{delimiter}{}", event.timestamp)?;
                for item in event.items {
                    let value = db.get_item_value(*item).unwrap_or(b"");
                    write!(out, "{delimiter}")?;
                    out.write_all(value)?;
                }
                writeln!(out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
