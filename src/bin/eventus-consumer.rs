//! Demo consumer: follows committed envelopes from a cursor and prints them.
//!
//! Recovery can commit a lower sequence after a higher one, so the cursor
//! only advances past a sequence once everything below it was printed.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;
use eventus::{DurableStore, SequencedStore};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eventus-consumer", about = "Print committed outbox envelopes")]
struct Args {
    /// Directory holding the outbox database
    #[arg(long, env = "EVENTUS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Start after this sequence
    #[arg(long, default_value_t = 0)]
    since: u64,

    /// Number of polls before exiting
    #[arg(long, default_value_t = 10)]
    polls: u32,

    /// Pause between polls, in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,

    /// Max envelopes per read
    #[arg(long, default_value_t = 100)]
    batch: usize,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let store = DurableStore::open(args.data_dir.join("outbox.redb")).context("open store")?;

    // Every sequence <= `floor` has been printed; `seen` holds printed ones above it.
    let mut floor = args.since;
    let mut seen = BTreeSet::new();
    for _ in 0..args.polls {
        let mut cursor = floor;
        loop {
            let page = match store.read_committed(cursor, args.batch) {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "read committed failed");
                    break;
                }
            };
            let Some(last) = page.last().map(|e| e.seq) else {
                break;
            };
            for envelope in page {
                if seen.contains(&envelope.seq) {
                    continue;
                }
                let data = match envelope.event.payload_str() {
                    Some(text) => text.to_string(),
                    None => format!("base64:{}", STANDARD.encode(&envelope.event.payload)),
                };
                println!(
                    "consumed seq={} type={} data={}",
                    envelope.seq, envelope.event.event_type, data
                );
                seen.insert(envelope.seq);
            }
            cursor = last;
        }

        while floor < u64::MAX && seen.remove(&(floor + 1)) {
            floor += 1;
        }
        thread::sleep(Duration::from_millis(args.poll_ms));
    }
    Ok(())
}
