// crates/traildb-cli/src/cmd/inspect.rs

use anyhow::Context;
use clap::Args;
use traildb_core::TrailDb;

#[derive(Args)]
pub struct InspectArgs {
    /// tdb root to read (directory or package file)
    #[arg(long, short = 'i', default_value = "a")]
    pub input: String,
}

pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let db = TrailDb::open(&args.input).with_context(|| format!("open {}", args.input))?;

    println!("root:          {}", db.root().display());
    println!(
        "form:          {}",
        if db.is_packaged() { "package" } else { "directory" }
    );
    println!("version:       {}", db.version());
    println!("trails:        {}", db.num_trails());
    println!("events:        {}", db.num_events());
    println!("min timestamp: {}", db.min_timestamp());
    println!("max timestamp: {}", db.max_timestamp());
    println!("max timedelta: {}", db.max_timedelta());
    println!("fields:        {}", db.num_fields() - 1);
    for field in 1..db.num_fields() {
        let name = db.get_field_name(field as u32).unwrap_or("");
        // lexicon_size counts the implicit NULL
        println!(
            "  {name}: {} values",
            db.lexicon_size(field as u32).saturating_sub(1)
        );
    }
    Ok(())
}
