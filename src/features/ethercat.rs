use std::collections::HashSet;
use crate::capture::containers::EtherCatDatagram;
use crate::capture::session::Session;
use super::{common, fingerprint, stats, Columns};

pub fn extract(session: &Session, columns: &mut Columns) {
    let src_mac = session.src_mac().unwrap_or_default();
    let logical_address = session.logical_address().unwrap_or_default();
    let address_offset = session.address_offset().unwrap_or_default();

    columns.text("src_mac", src_mac);
    columns.text("logical_address", format!("{logical_address:#06x}"));
    columns.text("address_offset", format!("{address_offset:#06x}"));
    columns.text("fingerprint", fingerprint(&format!("{src_mac}_{logical_address}_{address_offset}")));
    common(session, columns);

    let datagrams: Vec<&EtherCatDatagram> = session.records().iter().filter_map(|r| r.as_ethercat()).collect();

    let commands: Vec<f64> = datagrams.iter().map(|d| f64::from(d.command)).collect();
    let distinct: HashSet<u8> = datagrams.iter().map(|d| d.command).collect();
    columns.int("distinct_commands", distinct.len() as i64);
    columns.float("mode_command", stats::mode(&commands));

    let indexes: HashSet<u8> = datagrams.iter().map(|d| d.index).collect();
    columns.int("distinct_indexes", indexes.len() as i64);

    let working_counters: Vec<f64> = datagrams.iter().map(|d| f64::from(d.working_counter)).collect();
    columns.distribution("working_counter", &working_counters);
    columns.int("zero_working_counter_count", datagrams.iter().filter(|d| d.working_counter == 0).count() as i64);

    columns.int("circulating_count", datagrams.iter().filter(|d| d.circulating).count() as i64);
    columns.int("more_follows_count", datagrams.iter().filter(|d| d.more_follows).count() as i64);
    columns.int("interrupt_request_count", datagrams.iter().filter(|d| d.interrupt_request != 0).count() as i64);
    columns.int("distinct_data_values", datagrams.iter().map(|d| d.data.as_slice()).collect::<HashSet<_>>().len() as i64);
    columns.int("distinct_destinations", datagrams.iter().map(|d| d.dst_mac.as_str()).collect::<HashSet<_>>().len() as i64);
}
