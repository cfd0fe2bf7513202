use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocols the capturer knows how to group into sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "EtherCAT")]
    EtherCat,
    #[serde(rename = "Zwave")]
    Zwave,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::EtherCat, Protocol::Zwave];
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::EtherCat => write!(f, "EtherCAT"),
            Protocol::Zwave => write!(f, "Zwave"),
        }
    }
}

/// Where a record travels relative to the node that opened its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One EtherCAT datagram. A single Ethernet frame may carry several of these.
#[derive(Clone, Debug, PartialEq)]
pub struct EtherCatDatagram {
    pub timestamp: DateTime<Utc>,
    pub src_mac: String,
    pub dst_mac: String,
    /// ADP: auto-increment / configured station / logical address, depending on the command.
    pub logical_address: u16,
    /// ADO: register or memory offset inside the addressed slave.
    pub address_offset: u16,
    pub index: u8,
    pub command: u8,
    pub circulating: bool,
    pub more_follows: bool,
    pub interrupt_request: u16,
    pub data_len: u16,
    pub working_counter: u16,
    pub data: Vec<u8>,
    pub header_bytes: u32,
    pub payload_bytes: u32,
}

/// One line of a Z-Wave sniffer log.
#[derive(Clone, Debug, PartialEq)]
pub struct ZwaveFrame {
    pub timestamp: DateTime<Utc>,
    pub home_id: String,
    pub src_id: String,
    pub dst_id: String,
    /// Data rate in kbit/s (9.6, 40 or 100).
    pub speed: f64,
    pub channel: u8,
    pub rssi: f64,
    pub data: String,
    pub class: String,
    pub application: String,
    pub payload: String,
    pub is_ack: bool,
    pub is_crc_ok: bool,
    pub is_low: bool,
    pub is_substituted: bool,
    pub is_unknown_header: bool,
    pub is_wakeup_beam: bool,
    pub hex_data: Vec<u8>,
    pub header_bytes: u32,
    pub payload_bytes: u32,
}

/// A decoded protocol record, the unit the session table consumes.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    EtherCat(EtherCatDatagram),
    Zwave(ZwaveFrame),
}

impl Record {
    pub fn protocol(&self) -> Protocol {
        match self {
            Record::EtherCat(_) => Protocol::EtherCat,
            Record::Zwave(_) => Protocol::Zwave,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Record::EtherCat(datagram) => datagram.timestamp,
            Record::Zwave(frame) => frame.timestamp,
        }
    }

    pub fn header_bytes(&self) -> u32 {
        match self {
            Record::EtherCat(datagram) => datagram.header_bytes,
            Record::Zwave(frame) => frame.header_bytes,
        }
    }

    pub fn payload_bytes(&self) -> u32 {
        match self {
            Record::EtherCat(datagram) => datagram.payload_bytes,
            Record::Zwave(frame) => frame.payload_bytes,
        }
    }

    pub fn total_bytes(&self) -> u32 {
        self.header_bytes() + self.payload_bytes()
    }

    /// Every key under which an already running session could hold this record, most
    /// specific first.
    ///
    /// EtherCAT addressing is one-way (the master always talks to a logical address), so one
    /// key suffices. Z-Wave identity is symmetric: a reply swaps source and destination, so
    /// the swapped key is offered as a fallback.
    pub fn session_keys(&self) -> KeyCandidates {
        match self {
            Record::EtherCat(datagram) => KeyCandidates {
                primary: SessionKey::EtherCat {
                    src_mac: datagram.src_mac.clone(),
                    logical_address: datagram.logical_address,
                    address_offset: datagram.address_offset,
                },
                alternative: None,
            },
            Record::Zwave(frame) => KeyCandidates {
                primary: SessionKey::Zwave {
                    home_id: frame.home_id.clone(),
                    src_id: frame.src_id.clone(),
                    dst_id: frame.dst_id.clone(),
                },
                alternative: Some(SessionKey::Zwave {
                    home_id: frame.home_id.clone(),
                    src_id: frame.dst_id.clone(),
                    dst_id: frame.src_id.clone(),
                }),
            },
        }
    }

    pub fn as_ethercat(&self) -> Option<&EtherCatDatagram> {
        match self {
            Record::EtherCat(datagram) => Some(datagram),
            _ => None,
        }
    }

    pub fn as_zwave(&self) -> Option<&ZwaveFrame> {
        match self {
            Record::Zwave(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Identity used to route a record to its session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionKey {
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

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionKey::EtherCat { src_mac, logical_address, address_offset } => {
                write!(f, "{src_mac}/{logical_address:#06x}/{address_offset:#06x}")
            }
            SessionKey::Zwave { home_id, src_id, dst_id } => write!(f, "{home_id}/{src_id}->{dst_id}"),
        }
    }
}

/// Ordered lookup candidates for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCandidates {
    pub primary: SessionKey,
    pub alternative: Option<SessionKey>,
}

impl KeyCandidates {
    pub fn iter(&self) -> impl Iterator<Item = &SessionKey> {
        std::iter::once(&self.primary).chain(self.alternative.iter())
    }
}

/// Seconds between two instants, as a float. Negative when `later` precedes `earlier`.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta: TimeDelta = later - earlier;
    delta.num_microseconds()
        .map(|micros| micros as f64 / 1_000_000.0)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 / 1_000.0)
}
