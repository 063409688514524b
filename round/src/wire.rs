//! Round records as they are served by gateways.
//!
//! A [RoundInfo] is kept close to the wire: node identifiers are raw byte strings and states are
//! plain integers. Validation happens when the record is converted into a [crate::Round].

use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error, RangeCfg, Read, ReadExt, ReadRangeExt, Write,
};

/// Maximum number of nodes in a round topology.
pub const MAX_TOPOLOGY: usize = 256;

/// Maximum length of an encoded node identifier.
///
/// This is intentionally larger than [crate::NODE_ID_LEN] so that malformed identifiers can be
/// decoded and rejected with a precise error during round construction.
pub const MAX_NODE_ID_LEN: usize = 64;

/// Maximum number of per-state timestamps.
pub const MAX_TIMESTAMPS: usize = 16;

/// Maximum number of node errors attached to a round.
pub const MAX_ERRORS: usize = 256;

/// Maximum length (in bytes) of a node error message.
pub const MAX_ERROR_LEN: usize = 4096;

/// An error reported by a node while processing a round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRoundError {
    /// Round the error was reported for.
    pub id: u64,
    /// Serialized identifier of the reporting node.
    pub node_id: Vec<u8>,
    /// Human-readable description of the failure.
    pub error: String,
}

impl Write for RawRoundError {
    fn write(&self, writer: &mut impl BufMut) {
        UInt(self.id).write(writer);
        self.node_id.write(writer);
        self.error.len().write(writer);
        writer.put_slice(self.error.as_bytes());
    }
}

impl Read for RawRoundError {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let id = UInt::read(reader)?.into();
        let node_id = Vec::<u8>::read_range(reader, ..=MAX_NODE_ID_LEN)?;
        let error = Vec::<u8>::read_range(reader, ..=MAX_ERROR_LEN)?;
        let error = String::from_utf8(error)
            .map_err(|_| Error::Invalid("cmix_round::RawRoundError", "error is not utf8"))?;
        Ok(Self { id, node_id, error })
    }
}

impl EncodeSize for RawRoundError {
    fn encode_size(&self) -> usize {
        UInt(self.id).encode_size()
            + self.node_id.encode_size()
            + self.error.len().encode_size()
            + self.error.len()
    }
}

/// The public metadata of a round, as returned by a gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundInfo {
    /// Round identifier (0 is never a valid round).
    pub id: u64,
    /// Global counter used to order updates across all rounds.
    pub update_id: u64,
    /// State of the round, see [crate::State].
    pub state: u32,
    /// Number of slots in the round.
    pub batch_size: u32,
    /// Serialized identifiers of the participating nodes, in order.
    pub topology: Vec<Vec<u8>>,
    /// Unix timestamps (in nanoseconds) indexed by state. Zero means the state was not observed.
    pub timestamps: Vec<u64>,
    /// Errors reported by nodes (only populated for failed rounds).
    pub errors: Vec<RawRoundError>,
    /// How long the round may wait in the resource queue.
    pub resource_queue_timeout_millis: u32,
    /// Size of the ephemeral address space used by the round.
    pub address_space_size: u32,
}

impl Write for RoundInfo {
    fn write(&self, writer: &mut impl BufMut) {
        UInt(self.id).write(writer);
        UInt(self.update_id).write(writer);
        UInt(self.state).write(writer);
        UInt(self.batch_size).write(writer);
        self.topology.write(writer);
        self.timestamps.write(writer);
        self.errors.write(writer);
        UInt(self.resource_queue_timeout_millis).write(writer);
        UInt(self.address_space_size).write(writer);
    }
}

impl Read for RoundInfo {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let id = UInt::read(reader)?.into();
        let update_id = UInt::read(reader)?.into();
        let state = UInt::read(reader)?.into();
        let batch_size = UInt::read(reader)?.into();
        let topology_cfg: (RangeCfg, (RangeCfg, ())) =
            ((..=MAX_TOPOLOGY).into(), ((..=MAX_NODE_ID_LEN).into(), ()));
        let topology = Vec::<Vec<u8>>::read_cfg(reader, &topology_cfg)?;
        let timestamps = Vec::<u64>::read_range(reader, ..=MAX_TIMESTAMPS)?;
        let errors = Vec::<RawRoundError>::read_range(reader, ..=MAX_ERRORS)?;
        let resource_queue_timeout_millis = UInt::read(reader)?.into();
        let address_space_size = UInt::read(reader)?.into();
        Ok(Self {
            id,
            update_id,
            state,
            batch_size,
            topology,
            timestamps,
            errors,
            resource_queue_timeout_millis,
            address_space_size,
        })
    }
}

impl EncodeSize for RoundInfo {
    fn encode_size(&self) -> usize {
        UInt(self.id).encode_size()
            + UInt(self.update_id).encode_size()
            + UInt(self.state).encode_size()
            + UInt(self.batch_size).encode_size()
            + self.topology.encode_size()
            + self.timestamps.encode_size()
            + self.errors.encode_size()
            + UInt(self.resource_queue_timeout_millis).encode_size()
            + UInt(self.address_space_size).encode_size()
    }
}
