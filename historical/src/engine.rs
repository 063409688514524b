use crate::{
    ingress::{queue, Mailbox, Pending, Queue},
    metrics::Metrics,
    wire, Comms, Config, Error, Reporter, Sender, CATEGORY,
};
use cmix_round::{make_round, Id, Round, RoundInfo};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics as RuntimeMetrics, Spawner};
use futures::{
    channel::oneshot,
    future::{self, Either},
    pin_mut,
};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

/// Priority of the event summarizing every response received from a gateway.
const METRICS_PRIORITY: u8 = 1;

/// Priority of the event emitted whenever a gateway reports a round missing.
const ERROR_PRIORITY: u8 = 5;

/// What woke up the [Engine] run loop.
enum Event {
    Stop,
    Timer,
    Lookup(Option<Pending>),
}

/// Batches historical round lookups and resolves them against gateways.
pub struct Engine<E, S, C, R>
where
    E: Clock + Spawner + RuntimeMetrics,
    S: Sender,
    C: Comms<Host = S::Host>,
    R: Reporter,
{
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,
    callbacks: E,
    sender: S,
    comms: C,
    reporter: R,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    /// Number of lookups above which the batch is flushed immediately.
    max_batch_size: usize,

    /// Time the first lookup of a batch waits before the batch is flushed.
    batch_period: Duration,

    /// Number of missing responses after which a lookup fails.
    max_retries: u32,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    /// Lookups waiting to be added to the batch.
    queue: Queue,

    /// Lookups included in the next request, in submission order.
    batch: Vec<Pending>,

    /// When the batch is flushed, if it is not empty.
    deadline: Option<SystemTime>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: Metrics,
}

impl<E, S, C, R> Engine<E, S, C, R>
where
    E: Clock + Spawner + RuntimeMetrics,
    S: Sender,
    C: Comms<Host = S::Host>,
    R: Reporter,
{
    /// Creates a new engine with the given configuration.
    ///
    /// Returns a tuple of the engine and the mailbox for submitting lookups.
    pub fn new(context: E, cfg: Config<S, C, R>) -> Result<(Self, Mailbox), Error> {
        cfg.params.validate()?;
        let (mailbox, queue) = queue(cfg.params.queue_capacity);
        let metrics = Metrics::init(&context);
        let callbacks = context.with_label("callback");
        let engine = Self {
            context,
            callbacks,
            sender: cfg.sender,
            comms: cfg.comms,
            reporter: cfg.reporter,
            max_batch_size: cfg.params.max_batch_size,
            batch_period: cfg.params.batch_period,
            max_retries: cfg.params.max_retries,
            queue,
            batch: Vec::new(),
            deadline: None,
            metrics,
        };
        Ok((engine, mailbox))
    }

    /// Starts the engine.
    ///
    /// The engine runs until [Stoppable::stop] is called or every [Mailbox] has been dropped and
    /// all lookups have been resolved.
    pub fn start(self) -> Stoppable {
        let (signal, stop) = oneshot::channel();
        let handle = self
            .context
            .with_label("engine")
            .spawn(|_| self.run(stop));
        Stoppable { signal, handle }
    }

    async fn run(mut self, stop: oneshot::Receiver<()>) -> Vec<Pending> {
        // If the stop handle is dropped, run until the queue closes
        let stop = async move {
            if stop.await.is_err() {
                future::pending::<()>().await;
            }
        };
        pin_mut!(stop);

        loop {
            if self.queue.is_closed() && self.batch.is_empty() {
                debug!("queue closed and batch empty, exiting");
                return Vec::new();
            }

            // Only poll the timer while a batch is accumulating
            let timer = match self.deadline {
                Some(deadline) => Either::Left(self.context.sleep_until(deadline)),
                None => Either::Right(future::pending()),
            };

            let event = select! {
                _ = &mut stop => { Event::Stop },
                _ = timer => { Event::Timer },
                pending = self.queue.next() => { Event::Lookup(pending) },
            };

            match event {
                Event::Stop => {
                    let pending = self.drain();
                    debug!(pending = pending.len(), "stopped");
                    return pending;
                }
                Event::Timer => {
                    if self.batch.is_empty() {
                        self.deadline = None;
                        continue;
                    }
                    self.flush().await;
                }
                Event::Lookup(Some(pending)) => self.push(pending).await,
                Event::Lookup(None) => {
                    debug!(batch = self.batch.len(), "queue closed");
                }
            }
        }
    }

    /// Add a lookup to the batch, flushing it if it grew too large.
    async fn push(&mut self, pending: Pending) {
        debug!(round = pending.round(), "received lookup");
        if self.deadline.is_none() {
            self.deadline = Some(self.context.current() + self.batch_period);
        }
        self.batch.push(pending);
        self.metrics.batch.set(self.batch.len() as i64);
        if self.batch.len() > self.max_batch_size {
            self.flush().await;
        }
    }

    /// Request every round in the batch from a gateway and apply the response.
    async fn flush(&mut self) {
        let request = wire::Request {
            rounds: self.batch.iter().map(Pending::round).collect(),
        };
        let comms = self.comms.clone();
        let result = self
            .sender
            .send_to_any(|host: S::Host| {
                let comms = comms.clone();
                let request = request.clone();
                async move {
                    comms
                        .request_historical_rounds(&host, request)
                        .await
                        .map(|response| (host, response))
                        .map_err(|err| Error::Rpc(err.to_string()))
                }
            })
            .await;
        self.metrics.flushes.inc();

        match result {
            Ok((host, response)) => {
                let received = response.rounds.len();
                debug!(
                    ?host,
                    requested = request.rounds.len(),
                    received,
                    "received historical rounds"
                );
                let batch = std::mem::take(&mut self.batch);
                let resolved = self.process(batch, response);
                self.reporter.report(
                    METRICS_PRIORITY,
                    CATEGORY,
                    "Metrics",
                    &format!(
                        "received {received} historical rounds from gateway {host:?}: {resolved:?}"
                    ),
                );
            }
            Err(err) => {
                // The batch is retried as-is and no attempt is consumed
                error!(?err, rounds = ?request.rounds, "failed to request historical rounds");
                self.metrics.rpc_failures.inc();
            }
        }

        self.deadline = if self.batch.is_empty() {
            None
        } else {
            Some(self.context.current() + self.batch_period)
        };
        self.metrics.batch.set(self.batch.len() as i64);
    }

    /// Resolve the lookups of a flushed batch, returning unresolved ones to the batch.
    ///
    /// Returns the identifiers of the resolved rounds.
    fn process(&mut self, batch: Vec<Pending>, response: wire::Response) -> Vec<Id> {
        if response.rounds.len() > batch.len() {
            warn!(
                requested = batch.len(),
                received = response.rounds.len(),
                "ignoring extra rounds in response"
            );
        }

        let mut slots = response.rounds.into_iter();
        let mut resolved = Vec::new();
        for pending in batch {
            let round = match slots.next() {
                Some(Some(info)) => self.parse(pending.round(), &info),
                Some(None) => None,
                None => {
                    debug!(round = pending.round(), "round absent from response");
                    None
                }
            };
            match round {
                Some(round) => {
                    resolved.push(round.id());
                    self.metrics.resolved.inc();
                    self.dispatch(pending, round, true);
                }
                None => self.miss(pending),
            }
        }

        resolved
    }

    /// Build the round for the lookup of `id` from a gateway record.
    fn parse(&self, id: Id, info: &RoundInfo) -> Option<Round> {
        if info.id != id {
            warn!(expected = id, received = info.id, "mismatched round in response");
            return None;
        }
        match make_round(info) {
            Ok(round) => Some(round),
            Err(err) => {
                warn!(round = id, ?err, "invalid round in response");
                None
            }
        }
    }

    /// Record a missing response, failing the lookup once it runs out of retries.
    fn miss(&mut self, mut pending: Pending) {
        let round = pending.round();
        let attempts = pending.miss();
        if attempts < self.max_retries {
            let remaining = self.max_retries - attempts;
            warn!(round, attempts, remaining, "round not yet available");
            self.metrics.retried.inc();
            self.reporter.report(
                ERROR_PRIORITY,
                CATEGORY,
                "Error",
                &format!(
                    "failed to retrieve round {round}, will try up to {remaining} more times"
                ),
            );
            self.batch.push(pending);
            return;
        }

        warn!(round, attempts, "failed to look up round");
        self.metrics.failed.inc();
        self.reporter.report(
            ERROR_PRIORITY,
            CATEGORY,
            "Error",
            &format!("failed to retrieve round {round} on last attempt, will not try again"),
        );
        self.dispatch(pending, Round::default(), false);
    }

    /// Invoke the callback of `pending` on its own task.
    fn dispatch(&self, pending: Pending, round: Round, success: bool) {
        self.callbacks
            .clone()
            .spawn(move |_| async move { pending.resolve(round, success) });
    }

    /// Stop accepting lookups and return every unresolved one.
    fn drain(&mut self) -> Vec<Pending> {
        let mut pending = std::mem::take(&mut self.batch);
        pending.extend(self.queue.drain());
        self.deadline = None;
        self.metrics.batch.set(0);
        pending
    }
}

/// Handle to a running [Engine].
pub struct Stoppable {
    signal: oneshot::Sender<()>,
    handle: Handle<Vec<Pending>>,
}

impl Stoppable {
    /// Stop the engine and wait for it to exit.
    ///
    /// A flush in progress completes first. Lookups that were queued or in the batch are
    /// returned and no further lookups are accepted.
    pub async fn stop(self) -> Vec<Pending> {
        let _ = self.signal.send(());
        Self::wait(self.handle).await
    }

    /// Wait for the engine to exit on its own, which happens once every [Mailbox] is dropped and
    /// the batch is empty.
    pub async fn join(self) -> Vec<Pending> {
        let Self { signal, handle } = self;
        let pending = Self::wait(handle).await;
        drop(signal);
        pending
    }

    async fn wait(handle: Handle<Vec<Pending>>) -> Vec<Pending> {
        match handle.await {
            Ok(pending) => pending,
            Err(err) => {
                error!(?err, "engine exited unexpectedly");
                Vec::new()
            }
        }
    }
}
