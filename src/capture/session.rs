//! A reconstructed session: the records that belong to one communication relationship.
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use super::containers::{seconds_between, Direction, Protocol, Record};

/// Identity cached from the record that opened the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    EtherCat {
        src_mac: String,
        logical_address: u16,
        address_offset: u16,
    },
    Zwave {
        home_id: String,
        src_id: String,
        dst_id: String,
    },
}

impl Identity {
    fn of(record: &Record) -> Self {
        match record {
            Record::EtherCat(datagram) => Identity::EtherCat {
                src_mac: datagram.src_mac.clone(),
                logical_address: datagram.logical_address,
                address_offset: datagram.address_offset,
            },
            Record::Zwave(frame) => Identity::Zwave {
                home_id: frame.home_id.clone(),
                src_id: frame.src_id.clone(),
                dst_id: frame.dst_id.clone(),
            },
        }
    }

    /// Direction of `record` relative to the founding source node, or `None` for
    /// protocols whose sessions are one-way.
    pub fn direction_of(&self, record: &Record) -> Option<Direction> {
        match (self, record) {
            (Identity::Zwave { src_id, .. }, Record::Zwave(frame)) => {
                if frame.src_id == *src_id {
                    Some(Direction::Forward)
                } else {
                    Some(Direction::Backward)
                }
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    protocol: Protocol,
    identity: Identity,
    activity_timeout: TimeDelta,
    max_duration: TimeDelta,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    records: Vec<Record>,
    forward: Vec<usize>,
    backward: Vec<usize>,
}

impl Session {
    /// Opens a session with its founding record. Timeouts are in seconds.
    pub fn new(record: Record, activity_timeout: u64, max_duration: u64) -> Self {
        let timestamp = record.timestamp();
        let mut session = Self {
            protocol: record.protocol(),
            identity: Identity::of(&record),
            activity_timeout: seconds(activity_timeout),
            max_duration: seconds(max_duration),
            start_time: timestamp,
            end_time: timestamp,
            records: Vec::new(),
            forward: Vec::new(),
            backward: Vec::new(),
        };
        session.add_record(record);
        session
    }

    /// Whether a record stamped `candidate` should close this session instead of joining it.
    ///
    /// Checked against the state before the candidate is appended. The hard cap on total
    /// lifetime wins; otherwise the session must be older than the activity timeout, hold
    /// more than one record, and have been idle for longer than the timeout since its last
    /// record. A candidate that is not strictly later than the reference never ends it.
    pub fn is_ended(&self, candidate: DateTime<Utc>) -> bool {
        let since_start = candidate - self.start_time;
        if since_start <= TimeDelta::zero() {
            return false;
        }
        if since_start > self.max_duration {
            return true;
        }
        if since_start > self.activity_timeout && self.records.len() > 1 {
            if let Some(last) = self.records.last() {
                let idle = candidate - last.timestamp();
                return idle > TimeDelta::zero() && idle > self.activity_timeout;
            }
        }
        false
    }

    pub fn add_record(&mut self, record: Record) {
        let position = self.records.len();
        match self.identity.direction_of(&record) {
            Some(Direction::Forward) => self.forward.push(position),
            Some(Direction::Backward) => self.backward.push(position),
            None => {}
        }
        self.end_time = record.timestamp();
        self.records.push(record);
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Records sent by the founding source node. Empty for one-way protocols.
    pub fn forward_records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.forward.iter().map(|&index| &self.records[index])
    }

    /// Records sent towards the founding source node. Empty for one-way protocols.
    pub fn backward_records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.backward.iter().map(|&index| &self.records[index])
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Seconds between the first and the most recently appended record. Zero for a
    /// single-record session; negative if records arrived out of order.
    pub fn duration(&self) -> f64 {
        seconds_between(self.start_time, self.end_time)
    }

    pub fn src_mac(&self) -> Option<&str> {
        match &self.identity {
            Identity::EtherCat { src_mac, .. } => Some(src_mac),
            _ => None,
        }
    }

    pub fn logical_address(&self) -> Option<u16> {
        match self.identity {
            Identity::EtherCat { logical_address, .. } => Some(logical_address),
            _ => None,
        }
    }

    pub fn address_offset(&self) -> Option<u16> {
        match self.identity {
            Identity::EtherCat { address_offset, .. } => Some(address_offset),
            _ => None,
        }
    }

    pub fn home_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Zwave { home_id, .. } => Some(home_id),
            _ => None,
        }
    }

    pub fn src_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Zwave { src_id, .. } => Some(src_id),
            _ => None,
        }
    }

    pub fn dst_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Zwave { dst_id, .. } => Some(dst_id),
            _ => None,
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let start = self.start_time.format("%Y-%m-%dT%H:%M:%S%.6f");
        match &self.identity {
            Identity::EtherCat { src_mac, logical_address, address_offset } => {
                write!(f, "{src_mac}_{logical_address:#06x}_{address_offset:#06x}_{start}")
            }
            Identity::Zwave { home_id, src_id, dst_id } => write!(f, "{home_id}_{src_id}_{dst_id}_{start}"),
        }
    }
}

fn seconds(value: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
        .unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::containers::fixtures::*;

    #[test]
    fn single_record_session_has_zero_duration() {
        let session = Session::new(zwave(5, "H", "A", "B"), 600, 1200);
        assert_eq!(session.records().len(), 1);
        assert_eq!(session.duration(), 0.0);
        assert_eq!(session.start_time(), session.end_time());
    }

    #[test]
    fn replies_are_classified_backward_against_the_founder() {
        let mut session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        session.add_record(zwave(1, "H", "B", "A"));
        session.add_record(zwave(2, "H", "A", "B"));
        session.add_record(zwave(3, "H", "C", "A"));

        let forward: Vec<_> = session.forward_records().map(Record::timestamp).collect();
        let backward: Vec<_> = session.backward_records().map(Record::timestamp).collect();
        assert_eq!(forward, vec![at(0), at(2)]);
        assert_eq!(backward, vec![at(1), at(3)]);
    }

    #[test]
    fn ethercat_sessions_have_no_direction_split() {
        let mut session = Session::new(ethercat(0, "m", 1, 2), 10, 100);
        session.add_record(ethercat(1, "m", 1, 2));
        assert_eq!(session.forward_records().count(), 0);
        assert_eq!(session.backward_records().count(), 0);
        assert_eq!(session.logical_address(), Some(1));
        assert_eq!(session.home_id(), None);
    }

    #[test]
    fn end_time_follows_append_order() {
        let mut session = Session::new(zwave(10, "H", "A", "B"), 600, 1200);
        session.add_record(zwave(20, "H", "A", "B"));
        session.add_record(zwave(15, "H", "A", "B"));
        assert_eq!(session.end_time(), at(15));
        assert_eq!(session.duration(), 5.0);
    }

    #[test]
    fn idle_gap_beyond_timeout_ends_a_multi_record_session() {
        let mut session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        session.add_record(zwave(30, "H", "B", "A"));
        assert!(session.is_ended(at(900)));
        assert!(!session.is_ended(at(630)));
    }

    #[test]
    fn single_record_session_outlives_the_activity_timeout() {
        let session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        assert!(!session.is_ended(at(601)));
        assert!(session.is_ended(at(1201)));
    }

    #[test]
    fn recent_activity_keeps_an_old_session_open() {
        let mut session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        session.add_record(zwave(500, "H", "A", "B"));
        assert!(!session.is_ended(at(700)));
    }

    #[test]
    fn max_duration_dominates_recent_activity() {
        let mut session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        session.add_record(zwave(1200, "H", "A", "B"));
        assert!(session.is_ended(at(1201)));
    }

    #[test]
    fn out_of_order_candidates_never_end_a_session() {
        let mut session = Session::new(zwave(100, "H", "A", "B"), 1, 2);
        session.add_record(zwave(101, "H", "A", "B"));
        assert!(!session.is_ended(at(50)));
        assert!(!session.is_ended(at(100)));
    }

    #[test]
    fn display_carries_identity_and_start() {
        let session = Session::new(zwave(0, "H", "A", "B"), 600, 1200);
        assert!(session.to_string().starts_with("H_A_B_2023-11-14T22:13:20"));
    }
}
