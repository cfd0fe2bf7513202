use std::collections::HashSet;
use crate::capture::containers::{Record, ZwaveFrame};
use crate::capture::session::Session;
use super::{common, fingerprint, sizes, stats, time_deltas, Columns};

pub fn extract(session: &Session, columns: &mut Columns) {
    let home_id = session.home_id().unwrap_or_default();
    let src_id = session.src_id().unwrap_or_default();
    let dst_id = session.dst_id().unwrap_or_default();

    columns.text("home_id", home_id);
    columns.text("src_id", src_id);
    columns.text("dst_id", dst_id);
    columns.text("fingerprint", fingerprint(&format!("{home_id}_{src_id}_{dst_id}")));
    common(session, columns);

    let forward: Vec<&Record> = session.forward_records().collect();
    let backward: Vec<&Record> = session.backward_records().collect();
    columns.int("fwd_packets_count", forward.len() as i64);
    columns.int("bwd_packets_count", backward.len() as i64);
    columns.float("fwd_packets_rate", stats::rate(forward.len() as f64, session.duration()));
    columns.float("bwd_packets_rate", stats::rate(backward.len() as f64, session.duration()));

    for (prefix, records) in [("fwd", &forward), ("bwd", &backward)] {
        columns.summary(&format!("{prefix}_packet_len"), &sizes(records.iter().copied(), Record::total_bytes));
        columns.summary(&format!("{prefix}_payload_bytes"), &sizes(records.iter().copied(), Record::payload_bytes));
        columns.distribution(&format!("{prefix}_packets_time_delta"), &time_deltas(records.iter().copied()));
    }

    let all: Vec<&ZwaveFrame> = session.records().iter().filter_map(Record::as_zwave).collect();
    let fwd: Vec<&ZwaveFrame> = forward.iter().filter_map(|r| r.as_zwave()).collect();
    let bwd: Vec<&ZwaveFrame> = backward.iter().filter_map(|r| r.as_zwave()).collect();

    for (prefix, frames) in [("", &all), ("fwd_", &fwd), ("bwd_", &bwd)] {
        let speeds: Vec<f64> = frames.iter().map(|f| f.speed).collect();
        let rssis: Vec<f64> = frames.iter().map(|f| f.rssi).collect();
        columns.distribution(&format!("{prefix}speed"), &speeds);
        columns.float(format!("{prefix}speed_range"), stats::max(&speeds) - stats::min(&speeds));
        columns.distribution(&format!("{prefix}rssi"), &rssis);
        columns.float(format!("kurtosis_{prefix}rssi"), stats::kurtosis(&rssis));
        columns.float(format!("{prefix}rssi_range"), stats::max(&rssis) - stats::min(&rssis));

        frame_types(prefix, frames, columns);
        flags(prefix, frames, columns);
        contents(prefix, frames, columns);
    }

    let channels: Vec<f64> = all.iter().map(|f| f64::from(f.channel)).collect();
    columns.float("mode_channel", stats::mode(&channels));
    columns.int("distinct_channels", all.iter().map(|f| f.channel).collect::<HashSet<_>>().len() as i64);
    columns.int("distinct_classes", distinct(all.iter().map(|f| f.class.as_str())));
    columns.int("distinct_applications", distinct(all.iter().map(|f| f.application.as_str())));
    columns.int("distinct_payloads", distinct(all.iter().map(|f| f.payload.as_str())));
    columns.int("distinct_data", distinct(all.iter().map(|f| f.data.as_str())));
    columns.int("empty_frame_count", all.iter().filter(|f| f.hex_data.is_empty()).count() as i64);
}

/// Frame kinds as reported in the sniffer's `Data` column.
const FRAME_TYPES: [(&str, &str); 5] = [
    ("single_cast", "SINGLECAST"),
    ("ack", "TRANSFER_ACKNOWLEDGE"),
    ("multicast", "MULTICAST"),
    ("broadcast", "BROADCAST"),
    ("explorer_autoinclusion", "EXPLORER_AUTOINCLUSION"),
];

fn frame_types(prefix: &str, frames: &[&ZwaveFrame], columns: &mut Columns) {
    for (name, data) in FRAME_TYPES {
        let count = frames.iter().filter(|f| f.data == data).count();
        columns.int(format!("{prefix}count_of_{name}_packets"), count as i64);
        columns.float(format!("{prefix}proportion_of_{name}_packets"), stats::percentage(count, frames.len()));
    }
}

fn flags(prefix: &str, frames: &[&ZwaveFrame], columns: &mut Columns) {
    let mut flag = |count: &str, share: &str, set: fn(&ZwaveFrame) -> bool| {
        let n = frames.iter().filter(|f| set(f)).count();
        columns.int(format!("{prefix}{count}"), n as i64);
        columns.float(format!("{prefix}{share}"), stats::percentage(n, frames.len()));
    };
    flag("total_acknowledgments", "proportion_acknowledged_packets", |f| f.is_ack);
    flag("total_crc_errors", "proportion_crc_errors", |f| !f.is_crc_ok);
    flag("total_substituted_packets", "proportion_substituted_packets", |f| f.is_substituted);
    flag("count_packets_with_unknown_headers", "proportion_unknown_header_packets", |f| f.is_unknown_header);
    flag("count_wakeup_beams", "proportion_wakeup_beam_packets", |f| f.is_wakeup_beam);
    flag("total_low_signal_packets", "percentage_low_signal_packets", |f| f.is_low);
}

/// Entropies, channel behaviour and dominant values of the decoded frame contents.
fn contents(prefix: &str, frames: &[&ZwaveFrame], columns: &mut Columns) {
    columns.float(format!("{prefix}entropy_of_hex_data"), stats::entropy(frames.iter().map(|f| f.hex_data.as_slice())));
    columns.float(format!("{prefix}header_entropy"), stats::entropy(frames.iter().map(|f| header(f))));
    columns.float(
        format!("{prefix}payload_entropy"),
        stats::entropy(frames.iter().map(|f| f.payload.as_str()).filter(|p| !p.is_empty())),
    );
    columns.float(
        format!("{prefix}data_field_entropy"),
        stats::entropy(frames.iter().map(|f| f.data.as_str()).filter(|d| !d.is_empty())),
    );

    let channels: Vec<u8> = frames.iter().map(|f| f.channel).collect();
    columns.float(format!("{prefix}entropy_of_channel_usage"), stats::entropy(channels.iter().copied()));
    columns.int(format!("{prefix}channel_transition_count"), channels.windows(2).filter(|w| w[0] != w[1]).count() as i64);
    columns.int(format!("{prefix}channel_stability"), longest_run(&channels) as i64);

    let by_channel = stats::ranked(channels.iter().copied());
    columns.text(format!("{prefix}most_common_channel"), edge(&by_channel, true));
    columns.text(format!("{prefix}least_common_channel"), edge(&by_channel, false));

    let by_class = stats::ranked(frames.iter().map(|f| f.class.as_str()));
    columns.text(format!("{prefix}most_common_class"), edge(&by_class, true));
    columns.text(format!("{prefix}least_common_class"), edge(&by_class, false));

    let by_application = stats::ranked(frames.iter().map(|f| f.application.as_str()));
    columns.text(format!("{prefix}most_common_application"), edge(&by_application, true));
    columns.text(format!("{prefix}least_common_application"), edge(&by_application, false));
}

/// The MAC header bytes of a frame.
fn header<'f>(frame: &'f ZwaveFrame) -> &'f [u8] {
    let len = (frame.header_bytes as usize).min(frame.hex_data.len());
    &frame.hex_data[..len]
}

/// Most (`first`) or least common value of a ranking; empty when nothing was ranked.
fn edge<T: ToString>(ranking: &[(T, usize)], first: bool) -> String {
    let entry = if first { ranking.first() } else { ranking.last() };
    entry.map(|(value, _)| value.to_string()).unwrap_or_default()
}

/// Length of the longest stretch of equal consecutive values.
fn longest_run<T: PartialEq>(values: &[T]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for (i, value) in values.iter().enumerate() {
        run = if i > 0 && values[i - 1] == *value { run + 1 } else { 1 };
        longest = longest.max(run);
    }
    longest
}

/// Distinct non-empty values of a text attribute.
fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> i64 {
    values.filter(|v| !v.is_empty()).collect::<HashSet<_>>().len() as i64
}

#[cfg(test)]
mod tests {
    use crate::capture::containers::fixtures::*;
    use crate::capture::containers::Record;
    use crate::capture::session::Session;
    use crate::config::Config;
    use crate::features::FeatureExtractor;

    fn frame(seconds: i64, src: &str, dst: &str, speed: f64, ack: bool) -> Record {
        let mut record = zwave(seconds, "E1A2B3C4", src, dst);
        if let Record::Zwave(f) = &mut record {
            f.speed = speed;
            f.is_ack = ack;
            f.class = String::from("BASIC");
        }
        record
    }

    #[test]
    fn forward_and_backward_are_reduced_separately() {
        let mut session = Session::new(frame(0, "1", "5", 100.0, false), 600, 1200);
        session.add_record(frame(1, "5", "1", 40.0, true));
        session.add_record(frame(3, "1", "5", 100.0, false));

        let row = FeatureExtractor::new(&Config::default()).extract(&session);
        assert_eq!(row.get("home_id"), Some("E1A2B3C4"));
        assert_eq!(row.get("fwd_packets_count"), Some("2"));
        assert_eq!(row.get("bwd_packets_count"), Some("1"));
        assert_eq!(row.get("max_fwd_packets_time_delta"), Some("3.0000"));
        assert_eq!(row.get("max_bwd_packets_time_delta"), Some("-1.0000"));
        assert_eq!(row.get("speed_range"), Some("60.0000"));
        assert_eq!(row.get("mean_bwd_speed"), Some("40.0000"));
        assert_eq!(row.get("mean_fwd_speed"), Some("100.0000"));
        assert_eq!(row.get("total_acknowledgments"), Some("1"));
        assert_eq!(row.get("bwd_total_acknowledgments"), Some("1"));
        assert_eq!(row.get("fwd_total_acknowledgments"), Some("0"));
        assert_eq!(row.get("distinct_classes"), Some("1"));
    }

    fn typed(seconds: i64, src: &str, dst: &str, data: &str, channel: u8, class: &str) -> Record {
        let mut record = zwave(seconds, "E1A2B3C4", src, dst);
        if let Record::Zwave(f) = &mut record {
            f.data = data.to_string();
            f.channel = channel;
            f.class = class.to_string();
        }
        record
    }

    #[test]
    fn frame_types_come_from_the_data_column() {
        let session = Session::new(typed(0, "1", "5", "TRANSFER_ACKNOWLEDGE", 0, "BASIC"), 600, 1200);
        let row = FeatureExtractor::new(&Config::default()).extract(&session);
        assert_eq!(row.get("count_of_ack_packets"), Some("1"));
        assert_eq!(row.get("proportion_of_ack_packets"), Some("100.0000"));
        assert_eq!(row.get("total_acknowledgments"), Some("0"));
        assert_eq!(row.get("count_of_multicast_packets"), Some("0"));
        assert_eq!(row.get("bwd_proportion_of_ack_packets"), Some("0.0000"));
    }

    #[test]
    fn frame_types_are_split_by_direction() {
        let mut session = Session::new(typed(0, "1", "5", "MULTICAST", 0, "BASIC"), 600, 1200);
        session.add_record(typed(1, "5", "1", "TRANSFER_ACKNOWLEDGE", 1, "BASIC"));
        session.add_record(typed(2, "1", "5", "BROADCAST", 1, "SWITCH"));
        session.add_record(typed(3, "1", "5", "MULTICAST", 0, "BASIC"));

        let row = FeatureExtractor::new(&Config::default()).extract(&session);
        assert_eq!(row.get("count_of_multicast_packets"), Some("2"));
        assert_eq!(row.get("proportion_of_multicast_packets"), Some("50.0000"));
        assert_eq!(row.get("fwd_count_of_broadcast_packets"), Some("1"));
        assert_eq!(row.get("bwd_count_of_ack_packets"), Some("1"));
        assert_eq!(row.get("count_of_single_cast_packets"), Some("0"));
        assert_eq!(row.get("count_of_explorer_autoinclusion_packets"), Some("0"));
    }

    #[test]
    fn channel_and_content_features() {
        let mut session = Session::new(typed(0, "1", "5", "SINGLECAST", 0, "BASIC"), 600, 1200);
        session.add_record(typed(1, "5", "1", "SINGLECAST", 1, "BASIC"));
        session.add_record(typed(2, "1", "5", "SINGLECAST", 1, "SWITCH"));
        session.add_record(typed(3, "1", "5", "MULTICAST", 1, "BASIC"));

        let row = FeatureExtractor::new(&Config::default()).extract(&session);
        assert_eq!(row.get("channel_transition_count"), Some("1"));
        assert_eq!(row.get("channel_stability"), Some("3"));
        assert_eq!(row.get("most_common_channel"), Some("1"));
        assert_eq!(row.get("least_common_channel"), Some("0"));
        assert_eq!(row.get("entropy_of_channel_usage").map(|v| &v[..5]), Some("0.811"));
        assert_eq!(row.get("most_common_class"), Some("BASIC"));
        assert_eq!(row.get("least_common_class"), Some("SWITCH"));
        assert_eq!(row.get("fwd_most_common_class"), Some("BASIC"));
        assert_eq!(row.get("data_field_entropy").map(|v| &v[..5]), Some("0.811"));
        assert_eq!(row.get("entropy_of_hex_data"), Some("0.0000"));
        assert_eq!(row.get("kurtosis_rssi"), Some("0.0000"));
    }
}
