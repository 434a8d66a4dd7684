//! StrataDB CLI
//!
//! Command-line interface for inspecting and editing a database directory.

use std::process;

use clap::{Parser, Subcommand};
use stratadb::{destroy_db, repair_db, Db, KeyRange, Options, ReadOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataDB CLI
#[derive(Parser, Debug)]
#[command(name = "stratadb")]
#[command(about = "Operate on a StrataDB database directory")]
#[command(version)]
struct Args {
    /// Database directory
    #[arg(short, long, default_value = "./strata_data")]
    db: String,

    /// Create the database if it does not exist
    #[arg(long)]
    create: bool,

    /// Treat any detected corruption as fatal
    #[arg(long)]
    paranoid: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// fsync the WAL before returning
        #[arg(long)]
        sync: bool,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print key-value pairs in order
    Scan {
        /// First key to print
        #[arg(long)]
        start: Option<String>,

        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,

        /// Iterate from the largest key down
        #[arg(long)]
        reverse: bool,
    },

    /// Compact a key range (the whole database by default)
    Compact {
        #[arg(long)]
        begin: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Print a property such as strata.stats
    Property {
        name: String,
    },

    /// Approximate on-disk size of [start, limit)
    Sizes {
        start: String,
        limit: String,
    },

    /// Rebuild the manifest from surviving files
    Repair,

    /// Delete the database
    Destroy,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratadb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> stratadb::Result<()> {
    let options = Options::builder()
        .create_if_missing(args.create)
        .paranoid_checks(args.paranoid)
        .build();

    // Standalone entry points run without opening the database
    match &args.command {
        Commands::Repair => {
            repair_db(&args.db, &options)?;
            println!("Repaired {}", args.db);
            return Ok(());
        }
        Commands::Destroy => {
            destroy_db(&args.db, &options)?;
            println!("Destroyed {}", args.db);
            return Ok(());
        }
        _ => {}
    }

    let db = Db::open(&args.db, options)?;
    match args.command {
        Commands::Get { key } => match db.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Put { key, value, sync } => {
            let opts = stratadb::WriteOptions { sync };
            db.put_opt(&opts, key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Delete { key } => {
            db.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { start, limit, reverse } => {
            scan(&db, start.as_deref(), limit.unwrap_or(usize::MAX), reverse)?;
        }
        Commands::Compact { begin, end } => {
            db.compact_range(begin.as_deref().map(str::as_bytes), end.as_deref().map(str::as_bytes))?;
            if let Some(stats) = db.get_property("strata.stats") {
                print!("{}", stats);
            }
        }
        Commands::Property { name } => match db.get_property(&name) {
            Some(value) => println!("{}", value.trim_end()),
            None => println!("(unknown property)"),
        },
        Commands::Sizes { start, limit } => {
            let sizes = db.get_approximate_sizes(&[KeyRange::new(start.as_bytes(), limit.as_bytes())]);
            println!("{}", sizes.first().copied().unwrap_or(0));
        }
        Commands::Repair | Commands::Destroy => {}
    }
    db.close()
}

fn scan(db: &Db, start: Option<&str>, limit: usize, reverse: bool) -> stratadb::Result<()> {
    let mut iter = db.iter(&ReadOptions::default())?;
    match (start, reverse) {
        (Some(start), false) => iter.seek(start.as_bytes())?,
        (Some(start), true) => {
            // Step back from the first key past `start`
            iter.seek(start.as_bytes())?;
            if !iter.valid() {
                iter.seek_to_last()?;
            } else if iter.key() != start.as_bytes() {
                iter.prev()?;
            }
        }
        (None, false) => iter.seek_to_first()?,
        (None, true) => iter.seek_to_last()?,
    }

    let mut printed = 0;
    while iter.valid() && printed < limit {
        println!(
            "{} => {}",
            String::from_utf8_lossy(iter.key()),
            String::from_utf8_lossy(iter.value())
        );
        printed += 1;
        if reverse {
            iter.prev()?;
        } else {
            iter.next()?;
        }
    }
    iter.status()
}
