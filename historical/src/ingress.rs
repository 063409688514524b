use crate::{Callback, Error};
use cmix_round::{Id, Round};
use futures::{
    channel::{mpsc, oneshot},
    future, StreamExt,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// A lookup that has not been resolved yet.
///
/// Lookups still held by the [Engine](super::Engine) when it is stopped are handed back to the
/// caller, who can [Mailbox::resubmit] them or [Pending::fail] them.
pub struct Pending {
    round: Id,
    callback: Box<dyn Callback>,
    attempts: u32,
}

impl Pending {
    fn new(round: Id, callback: Box<dyn Callback>) -> Self {
        Self {
            round,
            callback,
            attempts: 0,
        }
    }

    /// The round being looked up.
    pub fn round(&self) -> Id {
        self.round
    }

    /// Number of times gateways reported the round as missing.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record another missing response, returning the updated count.
    pub(crate) fn miss(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Invoke the callback with the outcome of the lookup.
    pub(crate) fn resolve(self, round: Round, success: bool) {
        (self.callback)(round, success);
    }

    /// Give up on the lookup, invoking the callback with a failure.
    pub fn fail(self) {
        self.resolve(Round::default(), false);
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("round", &self.round)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Create a bounded queue of lookups.
///
/// The bound is enforced at admission, so it holds regardless of how many times the [Mailbox]
/// is cloned.
pub(crate) fn queue(capacity: usize) -> (Mailbox, Queue) {
    let (sender, receiver) = mpsc::unbounded();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        Mailbox {
            sender,
            depth: depth.clone(),
            capacity,
        },
        Queue {
            receiver,
            depth,
            closed: false,
        },
    )
}

/// Submits historical round lookups to the [Engine](super::Engine).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<Pending>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl Mailbox {
    /// Look up the outcome of `round`.
    ///
    /// Never blocks. If the lookup is accepted, `callback` is invoked exactly once on a separate
    /// task: with the round and `true` once a gateway returns it, or with [Round::default] and
    /// `false` once the retries are exhausted. If the lookup is rejected, `callback` is dropped
    /// without being invoked.
    pub fn lookup(
        &self,
        round: Id,
        callback: impl FnOnce(Round, bool) + Send + 'static,
    ) -> Result<(), Error> {
        if round == 0 {
            return Err(Error::InvalidRound);
        }
        self.enqueue(Pending::new(round, Box::new(callback)))
            .map_err(|(err, _)| err)
    }

    /// Look up the outcome of `round`, returning a receiver for the result.
    ///
    /// The receiver yields `Some` with the round on success and `None` once the retries are
    /// exhausted. It is canceled if the lookup is dropped.
    pub fn fetch(&self, round: Id) -> Result<oneshot::Receiver<Option<Round>>, Error> {
        let (sender, receiver) = oneshot::channel();
        self.lookup(round, move |round: Round, success: bool| {
            let _ = sender.send(success.then_some(round));
        })?;
        Ok(receiver)
    }

    /// Return a lookup handed back by a stopped engine to the queue, keeping its attempt count.
    ///
    /// If the queue cannot accept it, the lookup is returned.
    pub fn resubmit(&self, pending: Pending) -> Result<(), Pending> {
        self.enqueue(pending).map_err(|(_, pending)| pending)
    }

    /// Number of lookups waiting to be picked up by the engine.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enqueue(&self, pending: Pending) -> Result<(), (Error, Pending)> {
        // Reserve a slot
        let reserved = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < self.capacity).then_some(depth + 1)
            });
        if reserved.is_err() {
            return Err((Error::QueueFull(pending.round), pending));
        }

        // Hand over to the engine
        if let Err(err) = self.sender.unbounded_send(pending) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err((Error::Closed, err.into_inner()));
        }
        Ok(())
    }
}

/// Receiving end of the lookup queue, owned by the [Engine](super::Engine).
pub(crate) struct Queue {
    receiver: mpsc::UnboundedReceiver<Pending>,
    depth: Arc<AtomicUsize>,
    closed: bool,
}

impl Queue {
    /// Wait for the next lookup.
    ///
    /// Returns `None` once every [Mailbox] has been dropped, and never resolves after that.
    pub(crate) async fn next(&mut self) -> Option<Pending> {
        if self.closed {
            return future::pending().await;
        }
        match self.receiver.next().await {
            Some(pending) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Some(pending)
            }
            None => {
                self.closed = true;
                None
            }
        }
    }

    /// Returns true if no more lookups can arrive.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting lookups and return everything still queued.
    pub(crate) fn drain(&mut self) -> Vec<Pending> {
        self.receiver.close();
        self.closed = true;
        let mut drained = Vec::new();
        while let Ok(pending) = self.receiver.try_recv() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            drained.push(pending);
        }
        drained
    }
}
