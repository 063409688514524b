use crate::wire;
use cmix_round::{Id, NodeId, RoundInfo};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Errors that can be returned by [Comms].
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown host")]
    UnknownHost,
    #[error("request failed")]
    Failed,
}

#[derive(Default)]
struct State {
    hosts: HashSet<NodeId>,
    rounds: HashMap<Id, RoundInfo>,
    hidden: HashMap<Id, u32>,
    failures: usize,
    truncate: Option<usize>,
    requests: Vec<Vec<Id>>,
}

/// An in-memory gateway that serves the rounds it was given.
///
/// The host of a gateway is its [NodeId].
#[derive(Clone, Default)]
pub struct Comms {
    state: Arc<Mutex<State>>,
}

impl Comms {
    /// Creates a transport that can reach `hosts`.
    pub fn new(hosts: impl IntoIterator<Item = NodeId>) -> Self {
        let state = State {
            hosts: hosts.into_iter().collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Serve `info` for requests of its round.
    pub fn insert(&self, info: RoundInfo) {
        self.state.lock().unwrap().rounds.insert(info.id, info);
    }

    /// Report `round` as missing in the next `times` responses that include it.
    ///
    /// `u32::MAX` hides the round forever.
    pub fn hide(&self, round: Id, times: u32) {
        self.state.lock().unwrap().hidden.insert(round, times);
    }

    /// Fail the next `times` requests.
    pub fn fail(&self, times: usize) {
        self.state.lock().unwrap().failures = times;
    }

    /// Return at most `len` slots in the next response.
    pub fn truncate(&self, len: usize) {
        self.state.lock().unwrap().truncate = Some(len);
    }

    /// Returns the rounds of every request received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<Id>> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl crate::Comms for Comms {
    type Host = NodeId;
    type Error = Error;

    fn get_host(&self, gateway: &NodeId) -> Option<NodeId> {
        let state = self.state.lock().unwrap();
        state.hosts.contains(gateway).then_some(*gateway)
    }

    async fn request_historical_rounds(
        &self,
        host: &NodeId,
        request: wire::Request,
    ) -> Result<wire::Response, Error> {
        let mut state = self.state.lock().unwrap();
        if !state.hosts.contains(host) {
            return Err(Error::UnknownHost);
        }
        state.requests.push(request.rounds.clone());
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Failed);
        }

        let mut rounds = Vec::with_capacity(request.rounds.len());
        for id in request.rounds {
            let hidden = match state.hidden.get_mut(&id) {
                Some(&mut 0) | None => false,
                Some(&mut u32::MAX) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    true
                }
            };
            rounds.push(if hidden {
                None
            } else {
                state.rounds.get(&id).cloned()
            });
        }
        if let Some(len) = state.truncate.take() {
            rounds.truncate(len);
        }
        Ok(wire::Response { rounds })
    }
}
