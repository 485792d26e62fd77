//! Registry of connected clients, used by CLIENT KILL and CLIENT UNBLOCK
//! to reach another connection's interrupt channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mimic_core::{Interrupt, InterruptReceiver, InterruptSender};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct Entry {
    interrupts: InterruptSender,
    blocked: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, Entry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers client `id`. The entry lives as long as the returned
    /// handle.
    pub fn register(self: &Arc<Self>, id: u64) -> (ClientHandle, InterruptReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let blocked = Arc::new(AtomicBool::new(false));
        self.clients.lock().insert(
            id,
            Entry {
                interrupts: tx,
                blocked: Arc::clone(&blocked),
            },
        );
        let handle = ClientHandle {
            id,
            blocked,
            registry: Arc::clone(self),
        };
        (handle, rx)
    }

    /// CLIENT KILL ID. Returns false if no such client is connected.
    pub fn kill(&self, id: u64) -> bool {
        let clients = self.clients.lock();
        match clients.get(&id) {
            Some(entry) => {
                debug!(client = id, "kill requested");
                entry.interrupts.send(Interrupt::Kill).is_ok()
            }
            None => false,
        }
    }

    /// CLIENT UNBLOCK. Only succeeds when the client is parked in a
    /// blocking command.
    pub fn unblock(&self, id: u64, error: bool) -> bool {
        let clients = self.clients.lock();
        let Some(entry) = clients.get(&id) else {
            return false;
        };
        if !entry.blocked.load(Ordering::Acquire) {
            return false;
        }
        let interrupt = if error {
            Interrupt::Error
        } else {
            Interrupt::Timeout
        };
        entry.interrupts.send(interrupt).is_ok()
    }

    /// Tells every connected client to disconnect. Used on shutdown.
    pub fn kill_all(&self) -> usize {
        let clients = self.clients.lock();
        clients
            .values()
            .filter(|entry| entry.interrupts.send(Interrupt::Kill).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.clients.lock().remove(&id);
    }
}

/// A connection's membership in the registry.
pub struct ClientHandle {
    id: u64,
    blocked: Arc<AtomicBool>,
    registry: Arc<ClientRegistry>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the client blocked until the returned guard drops.
    pub fn mark_blocked(&self) -> BlockedGuard<'_> {
        self.blocked.store(true, Ordering::Release);
        BlockedGuard { handle: self }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

pub struct BlockedGuard<'a> {
    handle: &'a ClientHandle,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.handle.blocked.store(false, Ordering::Release);
    }
}
