//! Lock-step delivery rounds.
//!
//! Every publish runs one round. The publisher hands a start token to each
//! participating listener, waits until every started listener has
//! acknowledged, then releases each of them exactly once. Only one round runs
//! at a time; the next publisher waits on the round gate.
//!
//! There are no timeouts. A listener that takes its token and never
//! acknowledges stalls the round, and with it every later publish, until its
//! task ends. A listener whose task has already ended is skipped: its start
//! send fails, or its dropped token closes its share of the done channel.

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Capacity of a listener's start channel. Rounds never overlap, so a
/// listener holds at most one pending token.
pub const START_CHANNEL_CAPACITY: usize = 1;

/// Monotonic round number.
pub type RoundId = u64;

/// Sending half of a listener's start channel.
pub type StartSender = mpsc::Sender<RoundToken>;

/// Receiving half of a listener's start channel.
pub type StartReceiver = mpsc::Receiver<RoundToken>;

/// Create a listener's start channel.
#[must_use]
pub fn start_channel() -> (StartSender, StartReceiver) {
    mpsc::channel(START_CHANNEL_CAPACITY)
}

/// Start signal for one listener in one round.
#[derive(Debug)]
pub struct RoundToken {
    round: RoundId,
    done: mpsc::Sender<RoundId>,
    proceed: oneshot::Receiver<()>,
}

impl RoundToken {
    /// The round this token belongs to.
    #[must_use]
    pub fn round(&self) -> RoundId {
        self.round
    }

    /// Acknowledge the round and wait to be released.
    ///
    /// Returns `false` if the publisher went away before releasing.
    pub async fn finish(self) -> bool {
        let Self {
            round,
            done,
            proceed,
        } = self;

        if done.send(round).await.is_err() {
            return false;
        }
        // Our share of the done channel must close before we block, so the
        // publisher can tell a finished listener from a vanished one.
        drop(done);

        proceed.await.is_ok()
    }
}

/// A listener taking part in a round.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Client name.
    pub name: String,
    /// Start channel of the client's listener.
    pub start: StartSender,
}

/// Result of a completed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Round number.
    pub round: RoundId,
    /// Listeners that received a start token.
    pub started: usize,
    /// Acknowledgements received.
    pub acknowledged: usize,
    /// Continuations delivered.
    pub released: usize,
}

/// Serializes rounds and numbers them.
#[derive(Debug, Default)]
pub struct RoundController {
    gate: Mutex<RoundId>,
}

impl RoundController {
    /// Create a controller. The first round is number 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the gate and open a new round.
    ///
    /// The round stays exclusive until the returned guard is dropped.
    pub async fn begin(&self) -> RoundGuard<'_> {
        let mut gate = self.gate.lock().await;
        *gate += 1;
        RoundGuard {
            round: *gate,
            _gate: gate,
        }
    }

    /// Number of the most recently opened round.
    pub async fn last_round(&self) -> RoundId {
        *self.gate.lock().await
    }
}

/// Exclusive access to the current round.
#[derive(Debug)]
pub struct RoundGuard<'a> {
    round: RoundId,
    _gate: MutexGuard<'a, RoundId>,
}

impl RoundGuard<'_> {
    /// Round number.
    #[must_use]
    pub fn id(&self) -> RoundId {
        self.round
    }

    /// Run the rendezvous with the given participants.
    pub async fn run(&mut self, participants: Vec<Participant>) -> RoundOutcome {
        let round = self.round;
        let (done_tx, mut done_rx) = mpsc::channel(participants.len().max(1));
        let mut releases = Vec::with_capacity(participants.len());

        for participant in participants {
            let (proceed_tx, proceed_rx) = oneshot::channel();
            let token = RoundToken {
                round,
                done: done_tx.clone(),
                proceed: proceed_rx,
            };

            if participant.start.send(token).await.is_ok() {
                releases.push((participant.name, proceed_tx));
            } else {
                debug!(round, listener = %participant.name, "Listener gone, skipping");
            }
        }
        drop(done_tx);

        let started = releases.len();
        let mut acknowledged = 0;
        while acknowledged < started {
            match done_rx.recv().await {
                Some(_) => acknowledged += 1,
                None => {
                    debug!(round, started, acknowledged, "Listener dropped its token");
                    break;
                }
            }
        }

        let mut released = 0;
        for (name, proceed) in releases {
            if proceed.send(()).is_ok() {
                released += 1;
            } else {
                trace!(round, listener = %name, "Listener gone before release");
            }
        }

        trace!(round, started, acknowledged, released, "Round complete");

        RoundOutcome {
            round,
            started,
            acknowledged,
            released,
        }
    }
}
