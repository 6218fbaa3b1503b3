// =============================================================================
// Execution journal — append-only diagnostic log of order-flow events
// =============================================================================
//
// One daily file, fixed comma-separated schema, millisecond timestamps:
//
//   ts,event,pair_id,client_order_id,symbol,venue,side,qty,price,detail
//
// Consumers may parse it offline; the engine never replays from it. Tests
// run with the disabled variant.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};

const HEADER: &str = "ts,event,pair_id,client_order_id,symbol,venue,side,qty,price,detail";

/// One journal row. Empty/zero fields are written as blanks.
#[derive(Debug, Default)]
pub struct JournalRow<'a> {
    pub event: &'a str,
    pub pair_id: Option<u64>,
    pub client_order_id: Option<u64>,
    pub symbol: &'a str,
    pub venue: &'a str,
    pub side: &'a str,
    pub qty: Option<u32>,
    pub price: Option<i64>,
    pub detail: String,
}

pub struct Journal {
    writer: Option<BufWriter<File>>,
}

impl Journal {
    /// Open (or append to) today's journal file under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create journal dir {}", dir.display()))?;

        let path = dir.join(format!("execution_{}.csv", Local::now().format("%Y%m%d")));
        let fresh = !path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        if fresh {
            writeln!(writer, "{HEADER}").context("failed to write journal header")?;
        }

        info!(path = %path.display(), "execution journal opened");
        Ok(Self {
            writer: Some(writer),
        })
    }

    /// A journal that drops everything (tests, journal disabled by config).
    pub fn disabled() -> Self {
        Self { writer: None }
    }

    /// Append one row and flush. Journal failures are logged, never fatal.
    pub fn record(&mut self, row: JournalRow<'_>) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let opt_u64 = |v: Option<u64>| v.map(|x| x.to_string()).unwrap_or_default();
        let opt_u32 = |v: Option<u32>| v.map(|x| x.to_string()).unwrap_or_default();
        let opt_i64 = |v: Option<i64>| v.map(|x| x.to_string()).unwrap_or_default();
        // Keep the schema intact: commas in free text become semicolons.
        let detail = row.detail.replace(',', ";");

        let line = format!(
            "{ts},{},{},{},{},{},{},{},{},{}",
            row.event,
            opt_u64(row.pair_id),
            opt_u64(row.client_order_id),
            row.symbol,
            row.venue,
            row.side,
            opt_u32(row.qty),
            opt_i64(row.price),
            detail,
        );

        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %e, "journal write failed");
        }
    }
}
