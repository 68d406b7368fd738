//! Demo producer: appends a handful of events through the outbox and lets the
//! recovery worker pick up whatever the (simulated) broker refused.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use eventus::{
    from_fn, DurableStore, Event, LogPublisher, OutboxManager, PublishError, Publisher,
    RecoveryConfig, SequencedStore, UNBOUNDED,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eventus-producer", about = "Append demo events through the outbox")]
struct Args {
    /// Directory holding the outbox database
    #[arg(long, env = "EVENTUS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Broker addresses, comma separated (labels the log publisher)
    #[arg(long, env = "EVENTUS_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// Topic label attached to published events
    #[arg(long, env = "EVENTUS_TOPIC", default_value = "eventus.example")]
    topic: String,

    /// Number of events to produce
    #[arg(long, default_value_t = 5)]
    count: u32,

    /// Pause between events, in milliseconds
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Reject every Nth publish call to exercise recovery (0 = never)
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Recovery sweep interval, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("create data dir {}", args.data_dir.display()))?;
    let store = DurableStore::open(args.data_dir.join("outbox.redb")).context("open store")?;

    info!(brokers = %args.brokers, topic = %args.topic, "producer starting");
    let broker = LogPublisher::new(format!("{}/{}", args.brokers, args.topic));
    let calls = AtomicU64::new(0);
    let fail_every = args.fail_every;
    let publisher = from_fn(move |seq, event: &Event| {
        let call = calls.fetch_add(1, Ordering::Relaxed) + 1;
        if fail_every > 0 && call % fail_every == 0 {
            return Err(PublishError::ConnectionFailed(format!(
                "simulated broker outage on call {}",
                call
            )));
        }
        broker.publish(seq, event)
    });

    let mut outbox = OutboxManager::new(store, publisher);
    outbox.start_retry(
        RecoveryConfig::default().with_interval(Duration::from_millis(args.retry_interval_ms)),
    );

    for n in 0..args.count {
        let event = Event::with_string_payload("demo", format!(r#"{{"n":{}}}"#, n));
        match outbox.publish_and_commit(event) {
            Ok(seq) => info!(seq, "published"),
            Err(e) => warn!(seq = ?e.seq(), error = %e, "publish failed"),
        }
        thread::sleep(Duration::from_millis(args.interval_ms));
    }

    // Give the recovery worker a sweep to catch up before shutting down.
    thread::sleep(Duration::from_millis(args.retry_interval_ms));
    let stats = outbox.stop_retry().unwrap_or_default();
    let pending = outbox.store().read_pending(UNBOUNDED).context("read pending")?;

    info!(
        last_seq = outbox.store().last_seq(),
        recovered = stats.published,
        still_pending = pending.len(),
        "producer finished"
    );
    Ok(())
}
