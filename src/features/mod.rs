//! Reduces finished sessions to flat, labeled feature rows.
//!
//! Each protocol contributes its own feature table; both share the size, rate and timing
//! features computed here.
pub mod ethercat;
pub mod stats;
pub mod zwave;

use md5::{Digest, Md5};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashSet};
use crate::capture::containers::{Protocol, Record};
use crate::capture::session::Session;
use crate::config::Config;

/// One feature value before formatting.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn render(&self, precision: usize) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_finite() => format!("{v:.precision$}"),
            Value::Float(_) => String::from("0"),
            Value::Text(v) => v.clone(),
        }
    }
}

/// Ordered `(name, value)` columns under construction.
#[derive(Default)]
pub struct Columns(Vec<(String, Value)>);

impl Columns {
    pub fn int(&mut self, name: impl Into<String>, value: i64) {
        self.0.push((name.into(), Value::Int(value)));
    }

    pub fn float(&mut self, name: impl Into<String>, value: f64) {
        self.0.push((name.into(), Value::Float(value)));
    }

    pub fn text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), Value::Text(value.into())));
    }

    /// The standard statistics of `values`, named `<stat>_<name>`.
    pub fn summary(&mut self, name: &str, values: &[f64]) {
        self.float(format!("total_{name}"), stats::total(values));
        self.distribution(name, values);
    }

    /// Like [Columns::summary] without the total, for values where a sum is meaningless.
    pub fn distribution(&mut self, name: &str, values: &[f64]) {
        self.float(format!("max_{name}"), stats::max(values));
        self.float(format!("min_{name}"), stats::min(values));
        self.float(format!("mean_{name}"), stats::mean(values));
        self.float(format!("mode_{name}"), stats::mode(values));
        self.float(format!("variance_{name}"), stats::variance(values));
        self.float(format!("standard_deviation_{name}"), stats::std_dev(values));
        self.float(format!("median_{name}"), stats::median(values));
        self.float(format!("skewness_{name}"), stats::skewness(values));
        self.float(format!("coefficient_of_variation_{name}"), stats::coefficient_of_variation(values));
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

/// A formatted dataset row for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRow {
    pub protocol: Protocol,
    pub columns: Vec<(String, String)>,
}

impl FeatureRow {
    pub fn header(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(_, value)| value.as_str())
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

impl Serialize for FeatureRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

pub struct FeatureExtractor {
    precision: usize,
    ignore: HashSet<String>,
    label: String,
}

impl FeatureExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            precision: config.float_precision,
            ignore: config.features_ignore_list.iter().cloned().collect(),
            label: config.label.clone(),
        }
    }

    /// Feature rows grouped by protocol, in session order.
    pub fn execute(&self, sessions: &[Session]) -> BTreeMap<Protocol, Vec<FeatureRow>> {
        log::info!("Extracting features from {} sessions.", sessions.len());
        let mut rows: BTreeMap<Protocol, Vec<FeatureRow>> = BTreeMap::new();
        for session in sessions {
            rows.entry(session.protocol()).or_default().push(self.extract(session));
        }
        rows
    }

    pub fn extract(&self, session: &Session) -> FeatureRow {
        let mut columns = Columns::default();
        match session.protocol() {
            Protocol::EtherCat => ethercat::extract(session, &mut columns),
            Protocol::Zwave => zwave::extract(session, &mut columns),
        }

        for name in &self.ignore {
            if !columns.names().any(|n| n == name.as_str()) {
                log::debug!("Ignored feature {name} is not produced for {}", session.protocol());
            }
        }

        let mut formatted: Vec<(String, String)> = columns.0
            .into_iter()
            .filter(|(name, _)| !self.ignore.contains(name))
            .map(|(name, value)| {
                let rendered = value.render(self.precision);
                (name, rendered)
            })
            .collect();
        formatted.push((String::from("label"), self.label.clone()));

        FeatureRow { protocol: session.protocol(), columns: formatted }
    }
}

/// Hex MD5 of the session's identity, stable across sessions of the same relationship.
pub fn fingerprint(identity: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(identity);
    hex::encode(hasher.finalize())
}

/// Features every protocol shares: lifetime, volume, rates, sizes and timing.
pub fn common(session: &Session, columns: &mut Columns) {
    let records = session.records();
    let duration = session.duration();

    columns.text("session_id", session.to_string());
    columns.text("start_time", session.start_time().to_rfc3339());
    columns.text("end_time", session.end_time().to_rfc3339());
    columns.float("duration", duration);
    columns.int("packets_count", records.len() as i64);

    let header = sizes(records.iter(), Record::header_bytes);
    let payload = sizes(records.iter(), Record::payload_bytes);
    let len = sizes(records.iter(), Record::total_bytes);

    columns.float("header_bytes_rate", stats::rate(stats::total(&header), duration));
    columns.float("payload_bytes_rate", stats::rate(stats::total(&payload), duration));
    columns.float("packet_len_rate", stats::rate(stats::total(&len), duration));
    columns.float("packets_rate", stats::rate(records.len() as f64, duration));

    columns.summary("header_bytes", &header);
    columns.summary("payload_bytes", &payload);
    columns.summary("packet_len", &len);
    columns.distribution("packets_time_delta", &time_deltas(records.iter()));
}

pub fn sizes<'r>(records: impl Iterator<Item = &'r Record>, size: fn(&Record) -> u32) -> Vec<f64> {
    records.map(|r| f64::from(size(r))).collect()
}

pub fn time_deltas<'r>(records: impl Iterator<Item = &'r Record>) -> Vec<f64> {
    stats::time_deltas(records.map(Record::timestamp).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::containers::fixtures::*;

    fn config() -> Config {
        Config {
            float_precision: 2,
            features_ignore_list: vec![String::from("start_time"), String::from("no_such_feature")],
            label: String::from("benign"),
            ..Config::default()
        }
    }

    #[test]
    fn rows_are_grouped_by_protocol_and_labeled() {
        let sessions = vec![
            Session::new(zwave(0, "H", "A", "B"), 600, 1200),
            Session::new(ethercat(0, "m", 1, 2), 600, 1200),
            Session::new(zwave(5, "H", "C", "D"), 600, 1200),
        ];
        let rows = FeatureExtractor::new(&config()).execute(&sessions);

        assert_eq!(rows[&Protocol::Zwave].len(), 2);
        assert_eq!(rows[&Protocol::EtherCat].len(), 1);
        let row = &rows[&Protocol::Zwave][0];
        assert_eq!(row.columns.last().map(|(n, v)| (n.as_str(), v.as_str())), Some(("label", "benign")));
        assert_eq!(row.get("start_time"), None);
        assert_eq!(row.get("duration"), Some("0.00"));
    }

    #[test]
    fn single_record_session_uses_sentinels() {
        let session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        let row = FeatureExtractor::new(&config()).extract(&session);
        assert_eq!(row.get("packets_rate"), Some("0.00"));
        assert_eq!(row.get("max_packets_time_delta"), Some("-1.00"));
        assert_eq!(row.get("packets_count"), Some("1"));
    }

    #[test]
    fn header_is_identical_across_rows_of_a_protocol() {
        let mut long = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        long.add_record(zwave(2, "H", "B", "A"));
        let short = Session::new(zwave(0, "H", "C", "D"), 600, 1200);
        let extractor = FeatureExtractor::new(&Config::default());
        let a = extractor.extract(&long);
        let b = extractor.extract(&short);
        assert!(a.header().eq(b.header()));
        assert_eq!(a.get("packets_rate"), Some("1.0000"));
    }

    #[test]
    fn row_serializes_as_ordered_object() {
        let row = FeatureRow {
            protocol: Protocol::Zwave,
            columns: vec![(String::from("b"), String::from("1")), (String::from("a"), String::from("2"))],
        };
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":"1","a":"2"}"#);
    }

    #[test]
    fn fingerprint_is_md5_hex() {
        assert_eq!(fingerprint(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
