// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Per-run CSV files, one for the per-device signal stream and one for
//! the matched stream, named `<station>_<YYYY-MM-DDTHHMMSS>[-matched].csv`
//! and `;`-delimited.

use super::Consumer;
use crate::model::{MatchedSignal, QueueItem, Signal};
use chrono::Utc;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes [`Signal`]s (or, with [`CsvConsumer::matched`], [`MatchedSignal`]s)
/// to a single file for the lifetime of the run. Each run starts a fresh
/// file, so duplicate delivery after a restart never appends to stale data.
pub struct CsvConsumer {
    name: String,
    writer: BufWriter<File>,
    matched: bool,
}

impl CsvConsumer {
    pub fn open_signals(dir: &Path, station: &str) -> anyhow::Result<Self> {
        Self::open(dir, station, false)
    }

    pub fn open_matched(dir: &Path, station: &str) -> anyhow::Result<Self> {
        Self::open(dir, station, true)
    }

    fn open(dir: &Path, station: &str, matched: bool) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = file_path(dir, station, matched);
        let mut file = File::create(&path)?;
        let header = if matched {
            MatchedSignal::CSV_HEADER
        } else {
            Signal::CSV_HEADER
        };
        writeln!(file, "{}", header.join(";"))?;
        Ok(Self {
            name: if matched { "csv-matched" } else { "csv-signal" }.to_string(),
            writer: BufWriter::new(file),
            matched,
        })
    }
}

fn file_path(dir: &Path, station: &str, matched: bool) -> PathBuf {
    let ts = Utc::now().format("%Y-%m-%dT%H%M%S");
    let suffix = if matched { "-matched" } else { "" };
    dir.join(format!("{station}_{ts}{suffix}.csv"))
}

impl Consumer for CsvConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, item: &QueueItem) -> anyhow::Result<()> {
        match (item, self.matched) {
            (QueueItem::Signal(s), false) => {
                writeln!(self.writer, "{}", s.as_csv_fields().join(";"))?;
                self.writer.flush()?;
            }
            (QueueItem::Matched(m), true) => {
                writeln!(self.writer, "{}", m.as_csv_fields().join(";"))?;
                self.writer.flush()?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;

    #[test]
    fn signal_csv_writes_header_and_rows() {
        let dir = std::env::temp_dir().join(format!("pulsewatch-csv-test-{}", std::process::id()));
        let mut consumer = CsvConsumer::open_signals(&dir, "teststation").unwrap();
        let signal = Signal {
            device: DeviceId::Index(0),
            ts: Utc::now(),
            frequency: 150_000_000.0,
            duration: 0.01,
            max_dbw: -30.0,
            avg_dbw: -35.0,
            std_db: 1.0,
            noise_dbw: -80.0,
            snr_db: 45.0,
        };
        consumer.handle(&QueueItem::Signal(signal)).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
