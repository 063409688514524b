//! Model the public metadata of cMix rounds.
//!
//! # Overview
//!
//! Gateways describe rounds with a [RoundInfo] record that stays close to the wire (raw node
//! identifiers, integer states, nanosecond timestamps). [make_round] validates such a record and
//! converts it into an immutable [Round] that the rest of the client can reason about.
//!
//! Construction is pure: the same record always produces the same [Round]. Malformed records
//! (node identifiers of the wrong length, unknown states, too many timestamps) are rejected with
//! an [Error] instead of being partially accepted.
//!
//! The [store] module persists rounds behind a versioned envelope.

use commonware_utils::hex;
use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

pub mod store;
mod wire;
pub use wire::{
    RawRoundError, RoundInfo, MAX_ERRORS, MAX_ERROR_LEN, MAX_NODE_ID_LEN, MAX_TIMESTAMPS,
    MAX_TOPOLOGY,
};

/// Identifier of a round. Rounds start at 1; 0 is never a valid round.
pub type Id = u64;

/// Length of a serialized [NodeId] (32 bytes of data followed by a type byte).
pub const NODE_ID_LEN: usize = 33;

/// Errors that can occur when constructing a [Round] from a [RoundInfo].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid node id length: {0}")]
    InvalidNodeId(usize),
    #[error("invalid round state: {0}")]
    InvalidState(u32),
    #[error("too many timestamps: {0}")]
    TooManyTimestamps(usize),
    #[error("invalid timestamp for {0}: {1}")]
    InvalidTimestamp(State, u64),
    #[error("invalid address space size: {0}")]
    InvalidAddressSpace(u32),
}

/// Lifecycle of a round.
///
/// A round only moves forward through these states and never leaves
/// [State::Completed] or [State::Failed].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    #[default]
    Pending = 0,
    Precomputing = 1,
    Standby = 2,
    Queued = 3,
    Realtime = 4,
    Completed = 5,
    Failed = 6,
}

impl State {
    /// Number of distinct states.
    pub const COUNT: usize = 7;

    /// All states, in lifecycle order.
    pub const ALL: [State; Self::COUNT] = [
        State::Pending,
        State::Precomputing,
        State::Standby,
        State::Queued,
        State::Realtime,
        State::Completed,
        State::Failed,
    ];

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }

    /// Returns true if a round in `self` may move to `next`.
    pub fn can_transition(self, next: State) -> bool {
        !self.is_terminal() && next > self
    }
}

impl TryFrom<u32> for State {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(Error::InvalidState(value))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Pending => "PENDING",
            State::Precomputing => "PRECOMPUTING",
            State::Standby => "STANDBY",
            State::Queued => "QUEUED",
            State::Realtime => "REALTIME",
            State::Completed => "COMPLETED",
            State::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Identifier of a node participating in the mix network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Create a node identifier from its serialized form.
    pub const fn new(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The trailing type byte of the identifier.
    pub fn kind(&self) -> u8 {
        self.0[NODE_ID_LEN - 1]
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; NODE_ID_LEN] = value
            .try_into()
            .map_err(|_| Error::InvalidNodeId(value.len()))?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex(&self.0))
    }
}

/// An error reported by a node while processing a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundError {
    pub node: NodeId,
    pub message: String,
}

/// Immutable snapshot of the public metadata of a round.
///
/// The zero value ([Round::default]) is used to signal that a round could not be retrieved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Round {
    id: Id,
    state: State,
    topology: Vec<NodeId>,
    timestamps: BTreeMap<State, SystemTime>,
    errors: Vec<RoundError>,
    batch_size: u32,
    address_space_size: u8,
    update_id: u64,
    raw: RoundInfo,
}

impl Round {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Participating nodes, in the order they process the round.
    pub fn topology(&self) -> &[NodeId] {
        &self.topology
    }

    /// Times at which the round was observed entering each state.
    ///
    /// States that were never observed have no entry.
    pub fn timestamps(&self) -> &BTreeMap<State, SystemTime> {
        &self.timestamps
    }

    pub fn timestamp(&self, state: State) -> Option<SystemTime> {
        self.timestamps.get(&state).copied()
    }

    /// Errors reported by nodes, populated only for failed rounds.
    pub fn errors(&self) -> &[RoundError] {
        &self.errors
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn address_space_size(&self) -> u8 {
        self.address_space_size
    }

    /// Global counter ordering updates across all rounds.
    pub fn update_id(&self) -> u64 {
        self.update_id
    }

    /// The record this round was built from.
    pub fn raw(&self) -> &RoundInfo {
        &self.raw
    }

    /// Scheduled start of realtime processing.
    ///
    /// Unlike other timestamps, the [State::Queued] entry records when realtime is planned to
    /// begin rather than when the round entered the queue.
    pub fn realtime_start(&self) -> Option<SystemTime> {
        self.timestamp(State::Queued)
    }

    /// Time at which the round reached a terminal state, if it has.
    pub fn end(&self) -> Option<SystemTime> {
        self.timestamp(State::Completed)
            .or_else(|| self.timestamp(State::Failed))
    }

    pub fn is_completed(&self) -> bool {
        self.state == State::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round({}, {}, update={}, nodes={})",
            self.id,
            self.state,
            self.update_id,
            self.topology.len()
        )
    }
}

impl TryFrom<RoundInfo> for Round {
    type Error = Error;

    fn try_from(raw: RoundInfo) -> Result<Self, Self::Error> {
        let state = State::try_from(raw.state)?;

        // Only keep observed states
        if raw.timestamps.len() > State::COUNT {
            return Err(Error::TooManyTimestamps(raw.timestamps.len()));
        }
        let mut timestamps = BTreeMap::new();
        for (state, nanos) in State::ALL.iter().zip(raw.timestamps.iter()) {
            if *nanos == 0 {
                continue;
            }
            let time = UNIX_EPOCH
                .checked_add(Duration::from_nanos(*nanos))
                .ok_or(Error::InvalidTimestamp(*state, *nanos))?;
            timestamps.insert(*state, time);
        }

        let topology = raw
            .topology
            .iter()
            .map(|node| NodeId::try_from(node.as_slice()))
            .collect::<Result<Vec<_>, _>>()?;

        let errors = raw
            .errors
            .iter()
            .map(|err| -> Result<RoundError, Error> {
                Ok(RoundError {
                    node: NodeId::try_from(err.node_id.as_slice())?,
                    message: err.error.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let address_space_size = u8::try_from(raw.address_space_size)
            .map_err(|_| Error::InvalidAddressSpace(raw.address_space_size))?;

        Ok(Self {
            id: raw.id,
            state,
            topology,
            timestamps,
            errors,
            batch_size: raw.batch_size,
            address_space_size,
            update_id: raw.update_id,
            raw,
        })
    }
}

/// Construct a [Round] from the record returned by a gateway.
pub fn make_round(info: &RoundInfo) -> Result<Round, Error> {
    Round::try_from(info.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{Decode, Encode};

    fn node(seed: u8) -> Vec<u8> {
        let mut bytes = vec![seed; NODE_ID_LEN];
        bytes[NODE_ID_LEN - 1] = 2;
        bytes
    }

    fn failed_round() -> RoundInfo {
        RoundInfo {
            id: 41,
            update_id: 1_000,
            state: State::Failed as u32,
            batch_size: 64,
            topology: vec![node(3), node(1), node(2)],
            timestamps: vec![10, 0, 30, 40, 0, 0, 70],
            errors: vec![
                RawRoundError {
                    id: 41,
                    node_id: node(1),
                    error: "precomp timeout".into(),
                },
                RawRoundError {
                    id: 41,
                    node_id: node(2),
                    error: "realtime timeout".into(),
                },
            ],
            resource_queue_timeout_millis: 500,
            address_space_size: 18,
        }
    }

    #[test]
    fn test_make_round() {
        let info = failed_round();
        let round = make_round(&info).unwrap();
        assert_eq!(round.id(), 41);
        assert_eq!(round.state(), State::Failed);
        assert!(round.is_failed());
        assert!(!round.is_completed());
        assert_eq!(round.batch_size(), 64);
        assert_eq!(round.address_space_size(), 18);
        assert_eq!(round.update_id(), 1_000);
        assert_eq!(round.raw(), &info);
    }

    #[test]
    fn test_timestamps_are_sparse() {
        let round = make_round(&failed_round()).unwrap();
        let observed: Vec<State> = round.timestamps().keys().copied().collect();
        assert_eq!(
            observed,
            vec![State::Pending, State::Standby, State::Queued, State::Failed]
        );
        assert_eq!(
            round.timestamp(State::Standby),
            Some(UNIX_EPOCH + Duration::from_nanos(30))
        );
        assert_eq!(round.timestamp(State::Precomputing), None);
        assert_eq!(
            round.realtime_start(),
            Some(UNIX_EPOCH + Duration::from_nanos(40))
        );
        assert_eq!(round.end(), Some(UNIX_EPOCH + Duration::from_nanos(70)));
    }

    #[test]
    fn test_topology_preserves_order() {
        let round = make_round(&failed_round()).unwrap();
        let topology: Vec<u8> = round.topology().iter().map(|n| n.as_ref()[0]).collect();
        assert_eq!(topology, vec![3, 1, 2]);
        assert!(round.topology().iter().all(|n| n.kind() == 2));
    }

    #[test]
    fn test_errors_paired_with_nodes() {
        let round = make_round(&failed_round()).unwrap();
        let errors = round.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].node.as_ref()[0], 1);
        assert_eq!(errors[0].message, "precomp timeout");
        assert_eq!(errors[1].node.as_ref()[0], 2);
        assert_eq!(errors[1].message, "realtime timeout");
    }

    #[test]
    fn test_construction_is_deterministic() {
        let encoded = failed_round().encode().freeze();
        let first = RoundInfo::decode_cfg(encoded.clone(), &()).unwrap();
        let second = RoundInfo::decode_cfg(encoded, &()).unwrap();
        assert_eq!(make_round(&first).unwrap(), make_round(&second).unwrap());
    }

    #[test]
    fn test_short_node_id_rejected() {
        let mut info = failed_round();
        info.topology[1] = vec![1; 32];
        assert_eq!(make_round(&info), Err(Error::InvalidNodeId(32)));
    }

    #[test]
    fn test_long_error_node_id_rejected() {
        let mut info = failed_round();
        info.errors[0].node_id = vec![1; 40];
        assert_eq!(make_round(&info), Err(Error::InvalidNodeId(40)));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let mut info = failed_round();
        info.state = 7;
        assert_eq!(make_round(&info), Err(Error::InvalidState(7)));
    }

    #[test]
    fn test_too_many_timestamps_rejected() {
        let mut info = failed_round();
        info.timestamps = vec![1; State::COUNT + 1];
        assert_eq!(
            make_round(&info),
            Err(Error::TooManyTimestamps(State::COUNT + 1))
        );
    }

    #[test]
    fn test_address_space_rejected() {
        let mut info = failed_round();
        info.address_space_size = 256;
        assert_eq!(make_round(&info), Err(Error::InvalidAddressSpace(256)));
    }

    #[test]
    fn test_zero_round() {
        let round = Round::default();
        assert_eq!(round.id(), 0);
        assert_eq!(round.state(), State::Pending);
        assert!(round.topology().is_empty());
        assert!(round.timestamps().is_empty());
        assert_eq!(round.end(), None);
    }

    #[test]
    fn test_state_transitions() {
        assert!(State::Pending.can_transition(State::Precomputing));
        assert!(State::Realtime.can_transition(State::Completed));
        assert!(State::Queued.can_transition(State::Failed));
        assert!(!State::Realtime.can_transition(State::Queued));
        assert!(!State::Completed.can_transition(State::Failed));
        assert!(!State::Failed.can_transition(State::Failed));
        assert_eq!(State::try_from(4), Ok(State::Realtime));
        assert_eq!(State::Queued.to_string(), "QUEUED");
    }
}
