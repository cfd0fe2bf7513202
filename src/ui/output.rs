use ansi_term::Colour;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use crate::capture::containers::Protocol;
use crate::capture::core::CaptureStats;
use crate::error::OutputError;
use crate::features::FeatureRow;

pub type Rows = BTreeMap<Protocol, Vec<FeatureRow>>;

pub fn print_results(stats: &CaptureStats, rows: &Rows) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    println!("\u{2503}");
    println!("\u{2503} Items read       : {}", Colour::Fixed(226).paint(stats.items_read.to_string()));
    println!("\u{2503} Records dropped  : {}", Colour::Fixed(226).paint(stats.records_dropped.to_string()));
    println!("\u{2503} Sessions created : {}", Colour::Fixed(226).paint(stats.sessions_created.to_string()));
    println!("\u{2503}");
    for protocol in Protocol::ALL {
        let count = rows.get(&protocol).map(Vec::len).unwrap_or(0);
        println!("\u{2503} {:<16} : {}", Colour::Red.paint(protocol.to_string()), count);
    }
    println!("\u{2503} ");
}

pub fn data_as_json(rows: &Rows) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(rows)?)
}

pub fn data_to_file(data: String, path: &Path) -> Result<(), OutputError> {
    fs::write(path, data)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// `output-of-<protocol>-sessions.csv`, with `-part<N>` appended from the second file on.
pub fn csv_path(dir: &Path, protocol: Protocol, part: usize) -> PathBuf {
    if part <= 1 {
        dir.join(format!("output-of-{protocol}-sessions.csv"))
    } else {
        dir.join(format!("output-of-{protocol}-sessions-part{part}.csv"))
    }
}

/// Writes one CSV per protocol into `dir`, at most `max_rows` rows per file. Protocols
/// without rows get no file. Returns the written paths.
pub fn write_csv(rows: &Rows, dir: &Path, max_rows: usize) -> Result<Vec<PathBuf>, OutputError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for (protocol, protocol_rows) in rows {
        if protocol_rows.is_empty() {
            log::info!("No {protocol} sessions, skipping output file.");
            continue;
        }

        for (part, chunk) in protocol_rows.chunks(max_rows.max(1)).enumerate() {
            let path = csv_path(dir, *protocol, part + 1);
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(chunk[0].header())?;
            for row in chunk {
                writer.write_record(row.values())?;
            }
            writer.flush()?;

            log::info!("Wrote {} {protocol} rows to {}", chunk.len(), path.display());
            written.push(path);
        }
    }

    Ok(written)
}
