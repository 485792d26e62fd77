//! BLPOP/BRPOP and BLMOVE.
//!
//! A blocking command loops: try the non-blocking form under the
//! database lock; if there's nothing to take, register one signal on
//! every key in the same critical section, release the lock, and race
//! the signal against the deadline and the connection's interrupt
//! channel. A wakeup only means "try again" since another client may
//! have taken the data first.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CommandError, WrongType};
use crate::keyspace::Keyspace;
use crate::session::Session;
use crate::spaces::KeyspaceSet;
use crate::types::End;
use crate::wait::{SignalId, WakeReceiver};

/// Out-of-band events delivered to a connection by other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// CLIENT UNBLOCK (default or TIMEOUT): finish as if timed out.
    Timeout,
    /// CLIENT UNBLOCK ERROR: fail with an UNBLOCKED error.
    Error,
    /// CLIENT KILL: the connection is going away.
    Kill,
}

pub type InterruptSender = mpsc::UnboundedSender<Interrupt>;
pub type InterruptReceiver = mpsc::UnboundedReceiver<Interrupt>;

enum Attempt<T> {
    Done(Option<T>),
    Wait(SignalId, WakeReceiver),
}

enum Race {
    Woken,
    /// The wait table dropped the signal without waking it.
    SenderGone,
    Interrupted(Interrupt),
}

/// BLPOP / BRPOP. Returns the key and element popped, or `None` on
/// timeout. A zero or absent timeout waits forever.
pub async fn blocking_pop(
    session: &mut Session,
    keys: &[Bytes],
    end: End,
    timeout: Option<Duration>,
    interrupts: &mut InterruptReceiver,
) -> Result<Option<(Bytes, Bytes)>, CommandError> {
    block_on(session, keys, timeout, interrupts, |ks| ks.pop_first(keys, end)).await
}

/// BLMOVE / BRPOPLPUSH. Waits on `src` only.
pub async fn blocking_move(
    session: &mut Session,
    src: &Bytes,
    dst: &[u8],
    from: End,
    to: End,
    timeout: Option<Duration>,
    interrupts: &mut InterruptReceiver,
) -> Result<Option<Bytes>, CommandError> {
    block_on(
        session,
        std::slice::from_ref(src),
        timeout,
        interrupts,
        |ks| ks.lmove(src, dst, from, to),
    )
    .await
}

async fn block_on<T>(
    session: &mut Session,
    keys: &[Bytes],
    timeout: Option<Duration>,
    interrupts: &mut InterruptReceiver,
    mut attempt: impl FnMut(&mut Keyspace) -> Result<Option<T>, WrongType>,
) -> Result<Option<T>, CommandError> {
    drain_stale(interrupts)?;
    let deadline = timeout
        .filter(|d| !d.is_zero())
        .map(|d| Instant::now() + d);
    let in_transaction = session.in_transaction();

    loop {
        let step = session.run(|ks| {
            if let Some(found) = attempt(ks)? {
                return Ok(Attempt::Done(Some(found)));
            }
            if in_transaction {
                return Ok(Attempt::Done(None));
            }
            let (signal, rx) = ks.waiters_mut().enter_multi_wait(keys.iter().cloned());
            Ok::<_, WrongType>(Attempt::Wait(signal, rx))
        })?;
        let mut pending = match step {
            Attempt::Done(result) => return Ok(result),
            Attempt::Wait(signal, rx) => PendingWait {
                spaces: Arc::clone(session.spaces()),
                db: session.db(),
                signal,
                rx,
                settled: false,
            },
        };

        let raced = tokio::select! {
            woke = &mut pending.rx => match woke {
                Ok(_) => Race::Woken,
                Err(_) => Race::SenderGone,
            },
            _ = wait_deadline(deadline) => Race::Interrupted(Interrupt::Timeout),
            msg = interrupts.recv() => Race::Interrupted(msg.unwrap_or(Interrupt::Kill)),
        };
        let interrupt = match raced {
            Race::Woken => {
                // unblock already took us out of every queue
                pending.settled = true;
                continue;
            }
            Race::SenderGone => {
                // make sure we are out of every queue before retrying
                pending.cancel();
                continue;
            }
            Race::Interrupted(interrupt) => interrupt,
        };
        pending.cancel();

        return match interrupt {
            Interrupt::Timeout => Ok(None),
            Interrupt::Error => Err(CommandError::Unblocked),
            Interrupt::Kill => Err(CommandError::Killed),
        };
    }
}

/// A registered signal that hasn't been woken yet. Leaving the wait by
/// any path (timeout, interrupt, or the future being dropped) removes
/// it from every queue.
struct PendingWait {
    spaces: Arc<KeyspaceSet>,
    db: usize,
    signal: SignalId,
    rx: WakeReceiver,
    settled: bool,
}

impl PendingWait {
    fn cancel(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let Some(database) = self.spaces.db(self.db) else {
            return;
        };
        let mut ks = database.lock();
        if !ks.waiters_mut().dispose(self.signal) {
            // woken in the same instant we gave up: pass the wakeup on
            if let Ok(key) = self.rx.try_recv() {
                debug!(key = %String::from_utf8_lossy(&key), "forwarding lost wakeup");
                ks.waiters_mut().unblock(&key, 1);
            }
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Discards interrupts that arrived while the client wasn't blocked.
/// A pending kill still wins.
fn drain_stale(interrupts: &mut InterruptReceiver) -> Result<(), CommandError> {
    while let Ok(msg) = interrupts.try_recv() {
        if msg == Interrupt::Kill {
            return Err(CommandError::Killed);
        }
    }
    Ok(())
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
