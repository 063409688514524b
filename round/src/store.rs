//! Persist [Round]s behind a versioned envelope.
//!
//! Rounds are stored as their raw [RoundInfo] wrapped in an [Envelope] that records the format
//! version and the time the record was written. Loading a round re-runs [crate::make_round], so a
//! corrupted record is rejected rather than returned.
//!
//! Durability is left entirely to the [Store] implementation.

use crate::{Round, RoundInfo};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{varint::UInt, Decode, Encode, EncodeSize, Read, ReadExt, Write};
use commonware_runtime::Clock;
use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex},
    time::UNIX_EPOCH,
};
use thiserror::Error;
use tracing::debug;

/// Version of the envelope used for rounds.
pub const ROUND_VERSION: u64 = 0;

/// Maximum size of the data held by an [Envelope].
pub const MAX_ENVELOPE_DATA: usize = 1024 * 1024;

/// Errors that can occur when interacting with a [Store].
#[derive(Error, Debug)]
pub enum Error {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
    #[error("invalid round: {0}")]
    Round(#[from] crate::Error),
}

/// A versioned record held by a [Store].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Format version of `data`.
    pub version: u64,
    /// Unix time (in nanoseconds) the envelope was created.
    pub timestamp: i64,
    /// Serialized payload.
    pub data: Bytes,
}

impl Write for Envelope {
    fn write(&self, writer: &mut impl BufMut) {
        UInt(self.version).write(writer);
        self.timestamp.write(writer);
        self.data.write(writer);
    }
}

impl Read for Envelope {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, commonware_codec::Error> {
        let version = UInt::read(reader)?.into();
        let timestamp = i64::read(reader)?;
        let data = Bytes::read_cfg(reader, &(..=MAX_ENVELOPE_DATA).into())?;
        Ok(Self {
            version,
            timestamp,
            data,
        })
    }
}

impl EncodeSize for Envelope {
    fn encode_size(&self) -> usize {
        UInt(self.version).encode_size() + self.timestamp.encode_size() + self.data.encode_size()
    }
}

/// Key/value storage of versioned records.
pub trait Store: Clone + Send + Sync + 'static {
    /// Write `envelope` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, envelope: Envelope)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// Read the envelope stored under `key`, which must be at `version`.
    fn get(&self, key: &str, version: u64) -> impl Future<Output = Result<Envelope, Error>> + Send;

    /// Remove the envelope stored under `key`, which must be at `version`.
    fn delete(&mut self, key: &str, version: u64)
        -> impl Future<Output = Result<(), Error>> + Send;
}

/// Persist `round` under `key`.
pub async fn store_round<S: Store>(
    store: &mut S,
    clock: &impl Clock,
    round: &Round,
    key: &str,
) -> Result<(), Error> {
    let timestamp = clock
        .current()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default();
    let envelope = Envelope {
        version: ROUND_VERSION,
        timestamp,
        data: round.raw().encode().freeze(),
    };
    store.set(key, envelope).await?;
    debug!(key, round = round.id(), "stored round");
    Ok(())
}

/// Load the round stored under `key`.
pub async fn load_round<S: Store>(store: &S, key: &str) -> Result<Round, Error> {
    let envelope = store.get(key, ROUND_VERSION).await?;
    let info = RoundInfo::decode_cfg(envelope.data, &())?;
    Ok(Round::try_from(info)?)
}

/// Remove the round stored under `key`.
pub async fn delete_round<S: Store>(store: &mut S, key: &str) -> Result<(), Error> {
    store.delete(key, ROUND_VERSION).await?;
    debug!(key, "deleted round");
    Ok(())
}

/// In-memory [Store].
#[derive(Clone, Default)]
pub struct Memory {
    entries: Arc<Mutex<BTreeMap<String, Envelope>>>,
}

impl Memory {
    /// Returns the number of stored envelopes.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for Memory {
    async fn set(&mut self, key: &str, envelope: Envelope) -> Result<(), Error> {
        self.entries.lock().unwrap().insert(key.into(), envelope);
        Ok(())
    }

    async fn get(&self, key: &str, version: u64) -> Result<Envelope, Error> {
        let entries = self.entries.lock().unwrap();
        let envelope = entries
            .get(key)
            .ok_or_else(|| Error::NotFound(key.into()))?;
        if envelope.version != version {
            return Err(Error::VersionMismatch {
                key: key.into(),
                expected: version,
                found: envelope.version,
            });
        }
        Ok(envelope.clone())
    }

    async fn delete(&mut self, key: &str, version: u64) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();
        let envelope = entries
            .get(key)
            .ok_or_else(|| Error::NotFound(key.into()))?;
        if envelope.version != version {
            return Err(Error::VersionMismatch {
                key: key.into(),
                expected: version,
                found: envelope.version,
            });
        }
        entries.remove(key);
        Ok(())
    }
}
