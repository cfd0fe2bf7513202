use std::collections::HashMap;
use crate::config::Config;
use crate::error::CaptureError;
use super::containers::{Record, SessionKey};
use super::session::Session;

/// Builds sessions with the timeouts configured for the record's protocol.
pub struct SessionFactory<'a> {
    config: &'a Config,
}

impl<'a> SessionFactory<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn create(&self, record: Record) -> Result<Session, CaptureError> {
        let protocol = record.protocol();
        if !self.config.is_enabled(protocol) {
            return Err(CaptureError::ProtocolNotEnabled(protocol));
        }

        let (activity_timeout, max_duration) = self.config.timeouts(protocol);
        Ok(Session::new(record, activity_timeout, max_duration))
    }
}

/// Counters reported at the end of a capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub items_read: u64,
    pub records_read: u64,
    pub records_dropped: u64,
    pub sessions_created: u64,
}

/// Active sessions by key, plus every session closed so far.
///
/// Records are routed one at a time: a record joins the session found under the first of
/// its candidate keys that is active, or rotates that session out when the record arrives
/// too late for it. Records matching no active session open a new one under their primary
/// key.
pub struct SessionTable<'a> {
    factory: SessionFactory<'a>,
    log_every: u64,
    active: HashMap<SessionKey, Session>,
    finished: Vec<Session>,
    stats: CaptureStats,
}

impl<'a> SessionTable<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            factory: SessionFactory::new(config),
            log_every: config.log_every_records.max(1),
            active: HashMap::new(),
            finished: Vec::new(),
            stats: CaptureStats::default(),
        }
    }

    /// Drains `source`, then flushes, so that [SessionTable::finished] holds every session.
    ///
    /// Each item of the source is what one raw input (a frame, a log line) decoded to: zero
    /// records when it was not understood, several when a frame multiplexes datagrams.
    pub fn capture<I>(&mut self, source: I) -> CaptureStats
    where
        I: IntoIterator<Item = Vec<Record>>,
    {
        log::info!("Reconstructing sessions.");

        for records in source {
            self.stats.items_read += 1;
            for record in records {
                self.ingest(record);
            }
            if self.stats.items_read % self.log_every == 0 {
                log::info!("{} items processed so far...", self.stats.items_read);
            }
        }

        log::info!("Flushing {} sessions still active.", self.active_count());
        self.flush();
        log::info!(
            "{} items read, {} records routed, {} dropped, {} sessions created.",
            self.stats.items_read,
            self.stats.records_read - self.stats.records_dropped,
            self.stats.records_dropped,
            self.stats.sessions_created,
        );

        self.stats
    }

    pub fn ingest(&mut self, record: Record) {
        self.stats.records_read += 1;
        let keys = record.session_keys();

        let matched = keys.iter().find(|key| self.active.contains_key(*key)).cloned();
        let Some(key) = matched else {
            self.open(keys.primary, record);
            return;
        };

        let ended = match self.active.get(&key) {
            Some(session) => session.is_ended(record.timestamp()),
            None => false,
        };

        if ended {
            if let Some(session) = self.active.remove(&key) {
                log::debug!("Session {session} closed after {} records", session.records().len());
                self.finished.push(session);
            }
            self.open(key, record);
        } else if let Some(session) = self.active.get_mut(&key) {
            session.add_record(record);
        }
    }

    fn open(&mut self, key: SessionKey, record: Record) {
        match self.factory.create(record) {
            Ok(session) => {
                log::debug!("New session under {key}");
                self.stats.sessions_created += 1;
                self.active.insert(key, session);
            }
            Err(err) => {
                log::warn!("Dropping record for {key}: {err}");
                self.stats.records_dropped += 1;
            }
        }
    }

    /// Moves every active session to the finished list, oldest first. A no-op when nothing
    /// is active.
    pub fn flush(&mut self) {
        let mut remaining: Vec<Session> = self.active.drain().map(|(_, session)| session).collect();
        remaining.sort_by_key(Session::start_time);
        self.finished.extend(remaining);
    }

    pub fn finished(&self) -> &[Session] {
        &self.finished
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
