use crate::{Comms, Params, Reporter, Sender};

/// Configuration for the [`Engine`](super::Engine).
pub struct Config<S: Sender, C: Comms<Host = S::Host>, R: Reporter> {
    /// Selects the gateway each batch is sent to.
    pub sender: S,

    /// Transport used to request round records from a gateway.
    pub comms: C,

    /// Receives events about resolved and failed lookups.
    pub reporter: R,

    /// Batching and retry parameters.
    pub params: Params,
}
