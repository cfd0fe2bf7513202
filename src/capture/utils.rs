//! Record sources: turning capture files and sniffer logs into [Record]s.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use csv::StringRecord;
use rtshark::{Packet, RTShark};
use std::fs::File;
use std::path::{Path, PathBuf};
use crate::config::Config;
use crate::error::CaptureError;
use super::containers::{EtherCatDatagram, Record, ZwaveFrame};

/// Datagram header (command, index, address, length, IRQ) plus the trailing working counter.
pub const ETHERCAT_DATAGRAM_OVERHEAD: u32 = 12;

/// Home ID (4), source (1), frame control (2), length (1), destination (1).
pub const ZWAVE_MAC_HEADER_LEN: u32 = 9;

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M:%S"];

/// A lazily read, single-pass record source.
pub type RecordSource = Box<dyn Iterator<Item = Vec<Record>>>;

/// Opens `path` as a Z-Wave sniffer log (`.csv`/`.txt`) or, otherwise, as a pcap/pcapng
/// capture decoded through tshark.
pub fn load_file(path: &Path, config: &Config) -> Result<RecordSource, CaptureError> {
    log::info!("Loading input file {}.", path.display());

    let is_log = path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);

    if is_log {
        Ok(Box::new(ZwaveLogSource::open(path, config.csv_delimiter)?))
    } else {
        Ok(Box::new(PcapSource::open(path)?))
    }
}

/// Frames read from a capture file through tshark, one item per frame.
pub struct PcapSource {
    rtshark: RTShark,
    path: PathBuf,
}

impl PcapSource {
    /// Display filter: only frames carrying EtherCAT datagrams.
    const FILTER: &'static str = "ecat";

    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let input = path.to_string_lossy();
        let builder = rtshark::RTSharkBuilder::builder()
            .input_path(&input)
            .display_filter(Self::FILTER);

        match builder.spawn() {
            Err(source) => {
                log::error!("Error spawning tshark: {source}");
                Err(CaptureError::Tshark { path: path.to_path_buf(), source })
            }
            Ok(rtshark) => {
                log::info!("Reading from {}", path.display());
                Ok(Self { rtshark, path: path.to_path_buf() })
            }
        }
    }
}

impl Iterator for PcapSource {
    type Item = Vec<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rtshark.read() {
            Ok(Some(packet)) => Some(decode_frame(&packet)),
            Ok(None) => {
                log::info!("End of reading from {}", self.path.display());
                None
            }
            Err(e) => {
                log::error!("Error parsing TShark output for {}: {e}", self.path.display());
                None
            }
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        self.rtshark.kill();
    }
}

/// Splits one tshark-dissected frame into its EtherCAT datagrams.
pub fn decode_frame(packet: &Packet) -> Vec<Record> {
    let Some(timestamp) = packet.timestamp_micros().and_then(DateTime::from_timestamp_micros) else {
        log::debug!("Frame without a usable timestamp, skipping.");
        return Vec::new();
    };
    let Some(ecat) = packet.layer_name("ecat") else {
        return Vec::new();
    };

    let (src_mac, dst_mac) = match packet.layer_name("eth") {
        Some(eth) => (
            eth.metadata("eth.src").map(|m| m.value().to_string()).unwrap_or_default(),
            eth.metadata("eth.dst").map(|m| m.value().to_string()).unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    let fields: Vec<(&str, &str)> = ecat.iter().map(|m| (m.name(), m.value())).collect();
    decode_datagrams(timestamp, &src_mac, &dst_mac, &fields)
        .into_iter()
        .map(Record::EtherCat)
        .collect()
}

#[derive(Default)]
struct PartialDatagram {
    command: Option<u8>,
    index: Option<u8>,
    adp: Option<u16>,
    ado: Option<u16>,
    logical: Option<u32>,
    data_len: Option<u16>,
    circulating: bool,
    more_follows: bool,
    interrupt_request: u16,
    working_counter: Option<u16>,
    data: Vec<u8>,
}

/// Groups the flat `ecat` field list of one frame into datagrams.
///
/// A datagram starts at each `cmd` field. When a frame holds several datagrams tshark may
/// label their fields `ecat.subN.*`; those aliases are only used when the plain fields
/// are absent. Datagrams missing their command or address are dropped.
pub fn decode_datagrams(
    timestamp: DateTime<Utc>,
    src_mac: &str,
    dst_mac: &str,
    fields: &[(&str, &str)],
) -> Vec<EtherCatDatagram> {
    let has_plain = fields.iter().any(|(name, _)| *name == "ecat.cmd");
    let mut partials: Vec<PartialDatagram> = Vec::new();

    for (name, value) in fields {
        let Some(field) = name.strip_prefix("ecat.") else { continue };
        let (is_sub, field) = strip_sub_prefix(field);
        if is_sub == has_plain {
            continue;
        }

        if field == "cmd" {
            partials.push(PartialDatagram::default());
        }
        let Some(current) = partials.last_mut() else { continue };

        match field {
            "cmd" => current.command = parse_number(value).and_then(|v| u8::try_from(v).ok()),
            "idx" => current.index = parse_number(value).and_then(|v| u8::try_from(v).ok()),
            "adp" => current.adp = parse_number(value).and_then(|v| u16::try_from(v).ok()),
            "ado" => current.ado = parse_number(value).and_then(|v| u16::try_from(v).ok()),
            "lad" => current.logical = parse_number(value).and_then(|v| u32::try_from(v).ok()),
            "len" | "length.len" => current.data_len = parse_number(value).and_then(|v| u16::try_from(v).ok()),
            "subframe.circulating" | "length.c" => current.circulating = parse_flag(value),
            "subframe.more" | "length.m" => current.more_follows = parse_flag(value),
            "int" => current.interrupt_request = parse_number(value).and_then(|v| u16::try_from(v).ok()).unwrap_or(0),
            "cnt" | "wkc" => current.working_counter = parse_number(value).and_then(|v| u16::try_from(v).ok()),
            "data" => current.data = parse_hex(value).unwrap_or_default(),
            _ => {}
        }
    }

    partials
        .into_iter()
        .filter_map(|partial| {
            let command = partial.command?;
            // Logical commands carry one 32-bit address spanning the ADP/ADO fields.
            let (adp, ado) = match (partial.adp, partial.ado, partial.logical) {
                (Some(adp), Some(ado), _) => (adp, ado),
                (_, _, Some(logical)) => ((logical & 0xffff) as u16, (logical >> 16) as u16),
                _ => {
                    log::debug!("EtherCAT datagram without address, skipping.");
                    return None;
                }
            };
            let data_len = partial.data_len.unwrap_or(partial.data.len() as u16);

            Some(EtherCatDatagram {
                timestamp,
                src_mac: src_mac.to_string(),
                dst_mac: dst_mac.to_string(),
                logical_address: adp,
                address_offset: ado,
                index: partial.index.unwrap_or(0),
                command,
                circulating: partial.circulating,
                more_follows: partial.more_follows,
                interrupt_request: partial.interrupt_request,
                data_len,
                working_counter: partial.working_counter.unwrap_or(0),
                data: partial.data,
                header_bytes: ETHERCAT_DATAGRAM_OVERHEAD,
                payload_bytes: u32::from(data_len),
            })
        })
        .collect()
}

/// `sub3.cmd` -> `(true, "cmd")`, `subframe.more` -> `(false, "subframe.more")`.
fn strip_sub_prefix(field: &str) -> (bool, &str) {
    if let Some(rest) = field.strip_prefix("sub") {
        if let Some((digits, tail)) = rest.split_once('.') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return (true, tail);
            }
        }
    }
    (false, field)
}

/// Lines of a Z-Wave sniffer log, one item per line.
pub struct ZwaveLogSource {
    headers: StringRecord,
    rows: csv::StringRecordsIntoIter<File>,
    path: PathBuf,
}

impl ZwaveLogSource {
    pub fn open(path: &Path, delimiter: char) -> Result<Self, CaptureError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| CaptureError::Log { path: path.to_path_buf(), source })?;
        let headers = reader.headers()
            .map_err(|source| CaptureError::Log { path: path.to_path_buf(), source })?
            .clone();

        if !headers.iter().any(|h| h == "ApiType") {
            log::warn!("{} has no ApiType column, no Z-Wave frames will be read.", path.display());
        }
        log::info!("Reading from {}", path.display());

        Ok(Self { headers, rows: reader.into_records(), path: path.to_path_buf() })
    }
}

impl Iterator for ZwaveLogSource {
    type Item = Vec<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next()? {
            Ok(row) => Some(decode_zwave_row(&self.headers, &row).into_iter().collect()),
            Err(e) => {
                log::warn!("Unreadable line in {}: {e}", self.path.display());
                Some(Vec::new())
            }
        }
    }
}

/// Decodes one sniffer log line. Lines without an `ApiType` column are not Z-Wave frames.
pub fn decode_zwave_row(headers: &StringRecord, row: &StringRecord) -> Option<Record> {
    let column = |name: &str| -> Option<&str> {
        headers.iter().position(|h| h == name).and_then(|i| row.get(i))
    };
    column("ApiType")?;

    let timestamp = match (column("Date"), column("Time")) {
        (Some(date), Some(time)) => parse_timestamp(date, time),
        _ => None,
    };
    let Some(timestamp) = timestamp else {
        log::debug!("Z-Wave line without a parseable Date/Time, skipping.");
        return None;
    };

    let home_id = column("HomeId").unwrap_or_default();
    let src_id = column("Source").unwrap_or_default();
    let dst_id = column("Destination").unwrap_or_default();
    if home_id.is_empty() || src_id.is_empty() || dst_id.is_empty() {
        log::debug!("Z-Wave line without HomeId/Source/Destination, skipping.");
        return None;
    }

    let hex_data = column("Hex Data").and_then(parse_hex).unwrap_or_default();
    let frame_len = hex_data.len() as u32;
    let header_bytes = frame_len.min(ZWAVE_MAC_HEADER_LEN);
    // Whatever follows the MAC header, minus the trailing checksum byte.
    let payload_bytes = frame_len.saturating_sub(header_bytes).saturating_sub(1);

    let text = |name: &str| column(name).unwrap_or_default().to_string();
    let flag = |name: &str| column(name).map(parse_flag).unwrap_or(false);

    Some(Record::Zwave(ZwaveFrame {
        timestamp,
        home_id: home_id.to_string(),
        src_id: src_id.to_string(),
        dst_id: dst_id.to_string(),
        speed: column("Speed").and_then(leading_number).unwrap_or(0.0),
        channel: column("Channel").and_then(parse_channel).unwrap_or(0),
        rssi: column("Rssi").and_then(leading_number).unwrap_or(0.0),
        data: text("Data"),
        class: text("Class"),
        application: text("Application"),
        payload: text("Payload"),
        is_ack: flag("IsAck"),
        is_crc_ok: flag("IsCrcOk"),
        is_low: flag("IsLow"),
        is_substituted: flag("IsSubstituted"),
        is_unknown_header: flag("IsUnknownHeader"),
        is_wakeup_beam: flag("IsWakeupBeam"),
        hex_data,
        header_bytes,
        payload_bytes,
    }))
}

pub fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = DATE_FORMATS.iter().find_map(|f| NaiveDate::parse_from_str(date.trim(), f).ok())?;
    let time = TIME_FORMATS.iter().find_map(|f| NaiveTime::parse_from_str(time.trim(), f).ok())?;
    Some(NaiveDateTime::new(date, time).and_utc())
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_number(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "0x01")
}

/// Hex bytes with optional `:`, `-` or whitespace separators.
fn parse_hex(value: &str) -> Option<Vec<u8>> {
    let digits: String = value.chars().filter(|c| !matches!(c, ':' | '-' | ' ' | '\t')).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    hex::decode(digits).ok()
}

/// `"100k"` -> 100.0, `"-62 dBm"` -> -62.0.
fn leading_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Radio channel index; `None` unless it is a whole number in `0..=255`.
fn parse_channel(value: &str) -> Option<u8> {
    let number = leading_number(value)?;
    let channel = if number.fract() == 0.0 { u8::try_from(number as i64).ok() } else { None };
    if channel.is_none() {
        log::debug!("Channel {value:?} is out of range, using 0.");
    }
    channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::capture::containers::fixtures::at;

    const LOG_HEADER: &str = "Date;Time;Speed;Channel;Rssi;HomeId;Source;Destination;Data;Class;Application;Payload;IsAck;IsCrcOk;IsLow;IsSubstituted;IsUnknownHeader;IsWakeupBeam;Hex Data;ApiType";

    #[test]
    fn splits_multiplexed_frame_into_datagrams() {
        let fields = [
            ("ecat.cmd", "0x0c"), ("ecat.idx", "1"), ("ecat.adp", "0x0000"), ("ecat.ado", "0x1000"),
            ("ecat.len", "4"), ("ecat.int", "0"), ("ecat.data", "01:02:03:04"), ("ecat.cnt", "3"),
            ("ecat.cmd", "4"), ("ecat.idx", "2"), ("ecat.adp", "0x1001"), ("ecat.ado", "0x0130"),
            ("ecat.len", "2"), ("ecat.data", "0800"), ("ecat.cnt", "1"),
            // Aliases for the same datagrams, ignored because plain fields exist.
            ("ecat.sub1.cmd", "0x0c"), ("ecat.sub1.adp", "0x0000"), ("ecat.sub1.ado", "0x1000"),
        ];
        let datagrams = decode_datagrams(at(0), "02:00:00:00:00:01", "ff:ff:ff:ff:ff:ff", &fields);

        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].command, 0x0c);
        assert_eq!(datagrams[0].address_offset, 0x1000);
        assert_eq!(datagrams[0].working_counter, 3);
        assert_eq!(datagrams[0].data, vec![1, 2, 3, 4]);
        assert_eq!(datagrams[0].payload_bytes, 4);
        assert_eq!(datagrams[1].logical_address, 0x1001);
        assert_eq!(datagrams[1].header_bytes, ETHERCAT_DATAGRAM_OVERHEAD);
    }

    #[test]
    fn sub_aliases_are_used_without_plain_fields() {
        let fields = [
            ("ecat.sub1.cmd", "1"), ("ecat.sub1.adp", "5"), ("ecat.sub1.ado", "6"),
            ("ecat.sub2.cmd", "2"), ("ecat.sub2.lad", "0x00020001"),
        ];
        let datagrams = decode_datagrams(at(0), "a", "b", &fields);
        assert_eq!(datagrams.len(), 2);
        assert_eq!((datagrams[0].logical_address, datagrams[0].address_offset), (5, 6));
        assert_eq!((datagrams[1].logical_address, datagrams[1].address_offset), (1, 2));
    }

    #[test]
    fn datagram_without_address_is_dropped() {
        let fields = [("ecat.cmd", "7"), ("ecat.len", "0")];
        assert!(decode_datagrams(at(0), "a", "b", &fields).is_empty());
        assert!(decode_datagrams(at(0), "a", "b", &[]).is_empty());
    }

    fn row(line: &str) -> StringRecord {
        StringRecord::from(line.split(';').collect::<Vec<_>>())
    }

    #[test]
    fn decodes_sniffer_line() {
        let headers = row(LOG_HEADER);
        let line = row("2024-03-01;12:00:05.250;100k;1;-62 dBm;E1A2B3C4;1;5;x;COMMAND_CLASS_BASIC;Set;FF;False;True;False;False;False;False;E1 A2 B3 C4 01 41 01 0D 05 20 01 FF 7A;Singlecast");
        let record = decode_zwave_row(&headers, &line).unwrap();
        let frame = record.as_zwave().unwrap();

        assert_eq!(frame.home_id, "E1A2B3C4");
        assert_eq!((frame.src_id.as_str(), frame.dst_id.as_str()), ("1", "5"));
        assert_eq!(frame.speed, 100.0);
        assert_eq!(frame.rssi, -62.0);
        assert!(frame.is_crc_ok && !frame.is_ack);
        assert_eq!(frame.header_bytes, 9);
        assert_eq!(frame.payload_bytes, 3);
        assert_eq!(record.timestamp().format("%H:%M:%S%.3f").to_string(), "12:00:05.250");
    }

    #[test]
    fn non_zwave_or_broken_lines_yield_nothing() {
        let without_api = row("Date;Time;HomeId;Source;Destination");
        assert!(decode_zwave_row(&without_api, &row("2024-03-01;12:00:00;H;1;2")).is_none());

        let headers = row(LOG_HEADER);
        let bad_date = row("yesterday;12:00:00;100k;1;-62;H;1;5;;;;;;;;;;;;Singlecast");
        assert!(decode_zwave_row(&headers, &bad_date).is_none());
        let no_source = row("2024-03-01;12:00:00;100k;1;-62;H;;5;;;;;;;;;;;;Singlecast");
        assert!(decode_zwave_row(&headers, &no_source).is_none());
    }

    #[test]
    fn log_source_reads_lazily_and_skips_bad_lines() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "{LOG_HEADER}").unwrap();
        writeln!(file, "2024-03-01;12:00:00;40k;0;-70;H;1;2;;;;;;True;;;;;E1A2B3C40101;Singlecast").unwrap();
        writeln!(file, "garbage;line").unwrap();
        writeln!(file, "01/03/2024;12:00:01;40k;0;-71;H;2;1;;;;;True;True;;;;;;Singlecast").unwrap();
        file.flush().unwrap();

        let items: Vec<Vec<Record>> = load_file(file.path(), &Config::default()).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].len(), 1);
        assert!(items[1].is_empty());
        assert_eq!(items[2][0].as_zwave().unwrap().src_id, "2");
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ZwaveLogSource::open(&dir.path().join("absent.csv"), ';');
        assert!(matches!(result, Err(CaptureError::Log { .. })));
    }

    #[test]
    fn value_helpers() {
        assert_eq!(parse_number("0x1A"), Some(26));
        assert_eq!(parse_number("26"), Some(26));
        assert_eq!(parse_hex("de:ad-be ef"), Some(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(leading_number("9.6k"), Some(9.6));
        assert_eq!(leading_number("n/a"), None);
        assert_eq!(parse_channel("2"), Some(2));
        assert_eq!(parse_channel("255"), Some(255));
        assert_eq!(parse_channel("256"), None);
        assert_eq!(parse_channel("-1"), None);
        assert_eq!(parse_channel("1.5"), None);
        assert!(parse_timestamp("13.05.2024", "08:30:00").is_some());
        assert_eq!(strip_sub_prefix("subframe.more"), (false, "subframe.more"));
    }
}
