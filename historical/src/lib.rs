//! Resolve the outcome of cMix rounds that have left the gossip window.
//!
//! # Overview
//!
//! Callers submit a round identifier and a [Callback] to a [Mailbox]. The [Engine] collects
//! lookups into a batch and asks a gateway for all of them at once, either when the batch grows
//! past [Params::max_batch_size] or once [Params::batch_period] has elapsed since the first lookup
//! of the batch arrived. Each callback is invoked exactly once, on its own task: with the [Round]
//! and `true` once a gateway returns the round, or with [Round::default] and `false` once
//! gateways have reported it missing [Params::max_retries] times.
//!
//! # Details
//!
//! The batch is owned by a single task and all lookups enter it through a bounded queue. A full
//! queue rejects lookups synchronously with [Error::QueueFull]. Identical round identifiers are
//! not deduplicated: each lookup is carried in the request and resolved independently.
//!
//! A failed request (no gateway reachable, transport error) does not count against
//! [Params::max_retries]. The batch is kept and retried after another [Params::batch_period].
//!
//! Stopping the engine with [Stoppable::stop] hands back every lookup that was still pending. The
//! caller can [Mailbox::resubmit] them to another engine or [Pending::fail] them.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmix_historical::{mocks, Config, Engine, Params};
//! use cmix_round::{NodeId, RoundInfo, State, NODE_ID_LEN};
//! use commonware_runtime::{deterministic, Runner};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let gateway = NodeId::new([1; NODE_ID_LEN]);
//!     let comms = mocks::Comms::new([gateway.clone()]);
//!     comms.insert(RoundInfo {
//!         id: 42,
//!         state: State::Completed as u32,
//!         ..Default::default()
//!     });
//!
//!     let (engine, mailbox) = Engine::new(
//!         context,
//!         Config {
//!             sender: mocks::Sender::new(comms.clone(), [gateway]),
//!             comms,
//!             reporter: (),
//!             params: Params::default(),
//!         },
//!     )
//!     .unwrap();
//!     let _engine = engine.start();
//!
//!     let round = mailbox.fetch(42).unwrap().await.unwrap().unwrap();
//!     assert!(round.is_completed());
//! });
//! ```

use cmix_round::{Id, NodeId, Round};
use std::{fmt::Debug, future::Future};
use thiserror::Error;

mod config;
pub use config::Config;
mod engine;
pub use engine::{Engine, Stoppable};
mod ingress;
pub use ingress::{Mailbox, Pending};
mod metrics;
mod params;
pub use params::Params;
pub mod wire;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// Category of the events emitted to a [Reporter].
pub const CATEGORY: &str = "HistoricalRounds";

/// Errors that can occur when looking up historical rounds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot look up round 0, rounds start at 1")]
    InvalidRound,
    #[error("queue full, cannot look up round {0}")]
    QueueFull(Id),
    #[error("engine closed")]
    Closed,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("no gateway available")]
    NoGateway,
    #[error("rpc failed: {0}")]
    Rpc(String),
}

/// Transport used to reach gateways.
pub trait Comms: Clone + Send + Sync + 'static {
    /// Handle to a gateway connection.
    type Host: Clone + Debug + Send + Sync + 'static;

    /// Error returned by the transport.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the host registered for `gateway`, if any.
    fn get_host(&self, gateway: &NodeId) -> Option<Self::Host>;

    /// Ask `host` for the records of the rounds in `request`.
    fn request_historical_rounds(
        &self,
        host: &Self::Host,
        request: wire::Request,
    ) -> impl Future<Output = Result<wire::Response, Self::Error>> + Send;
}

/// Selects gateways to send requests to.
pub trait Sender: Clone + Send + 'static {
    /// Handle to a gateway connection.
    type Host: Clone + Debug + Send + Sync + 'static;

    /// Run `request` against gateways until one succeeds.
    ///
    /// Returns the first successful result, or an error once no gateway is left to try.
    fn send_to_any<T, F, Fut>(&mut self, request: F) -> impl Future<Output = Result<T, Error>> + Send
    where
        T: Send,
        F: FnMut(Self::Host) -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send;
}

/// Sink for events worth surfacing to the user.
pub trait Reporter: Clone + Send + 'static {
    /// Record an event. Higher `priority` is more severe.
    fn report(&self, priority: u8, category: &str, tag: &str, message: &str);
}

impl Reporter for () {
    fn report(&self, _: u8, _: &str, _: &str, _: &str) {}
}

/// Receives the outcome of a lookup.
///
/// Called with the round and `true` on success, or [Round::default] and `false` on failure.
/// Implemented for any `FnOnce(Round, bool)` that can be sent to another task.
pub trait Callback: FnOnce(Round, bool) + Send + 'static {}

impl<F> Callback for F where F: FnOnce(Round, bool) + Send + 'static {}
