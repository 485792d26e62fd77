//! The wait table: per-key FIFO queues of blocked commands.
//!
//! A blocked command owns one signal. The signal has a membership node
//! in the queue of every key it waits on, and each node sits in two
//! intrusive lists at once: its key's queue, and its signal's list of
//! memberships. Waking or cancelling a signal walks the second list and
//! unlinks every node in O(1) each, so a multi-key waiter disappears
//! from all of its queues in one step.
//!
//! Nodes and signals live in index-addressed arenas. Signal handles
//! carry a generation so a stale handle can never touch a recycled slot.
//!
//! The table is plain data. Callers mutate it only while holding the
//! owning database's lock.

use ahash::AHashMap;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

/// Handle to a registered wait signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId {
    slot: u32,
    generation: u32,
}

/// The receiving side of a signal. Resolves with the key whose push
/// woke the waiter.
pub type WakeReceiver = oneshot::Receiver<Bytes>;

#[derive(Debug)]
struct Node {
    key: Bytes,
    signal: u32,
    prev_in_key: Option<usize>,
    next_in_key: Option<usize>,
    next_in_signal: Option<usize>,
}

#[derive(Debug)]
struct SignalSlot {
    generation: u32,
    /// First membership node; memberships form a singly linked chain
    /// because they are only ever removed all together.
    first: Option<usize>,
    /// Present while the signal is registered.
    tx: Option<oneshot::Sender<Bytes>>,
}

#[derive(Debug, Clone, Copy)]
struct Queue {
    head: usize,
    tail: usize,
    len: usize,
}

/// Registry of blocked commands, scoped to one key space.
#[derive(Debug, Default)]
pub struct WaitTable {
    nodes: Vec<Option<Node>>,
    free_nodes: Vec<usize>,
    signals: Vec<SignalSlot>,
    free_signals: Vec<u32>,
    queues: AHashMap<Bytes, Queue>,
}

impl WaitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh signal in the queue for `key`.
    pub fn enter_wait(&mut self, key: Bytes) -> (SignalId, WakeReceiver) {
        self.enter_multi_wait(std::iter::once(key))
    }

    /// Registers one fresh signal at the back of every listed key's queue.
    ///
    /// Duplicate keys are not collapsed: a key listed twice gets two
    /// memberships for the same signal.
    pub fn enter_multi_wait<I>(&mut self, keys: I) -> (SignalId, WakeReceiver)
    where
        I: IntoIterator<Item = Bytes>,
    {
        let (tx, rx) = oneshot::channel();
        let slot = self.alloc_signal(tx);

        let mut last: Option<usize> = None;
        for key in keys {
            let node = self.alloc_node(Node {
                key: key.clone(),
                signal: slot,
                prev_in_key: None,
                next_in_key: None,
                next_in_signal: None,
            });
            self.push_back(&key, node);
            match last {
                Some(prev) => self.node_mut(prev).next_in_signal = Some(node),
                None => self.signals[slot as usize].first = Some(node),
            }
            last = Some(node);
        }

        let id = SignalId {
            slot,
            generation: self.signals[slot as usize].generation,
        };
        (id, rx)
    }

    /// Wakes up to `n` waiters from the front of `key`'s queue, in FIFO
    /// order. Each woken signal is removed from every queue it belongs
    /// to before it is notified. Waiters whose receiver is already gone
    /// are discarded without counting against `n`.
    ///
    /// Returns the number of waiters actually notified.
    pub fn unblock(&mut self, key: &[u8], n: usize) -> usize {
        let mut woken = 0;
        while woken < n {
            let Some(head) = self.queues.get(key).map(|q| q.head) else {
                break;
            };
            let slot = self.node(head).signal;
            let Some(tx) = self.release(slot) else {
                continue;
            };
            if tx.send(Bytes::copy_from_slice(key)).is_ok() {
                woken += 1;
            }
        }
        if woken > 0 {
            debug!(key = %String::from_utf8_lossy(key), woken, "woke blocked waiters");
        }
        woken
    }

    /// Removes a signal from every queue it is in. Returns `false` if the
    /// signal was no longer registered (already woken or disposed).
    pub fn dispose(&mut self, id: SignalId) -> bool {
        match self.signals.get(id.slot as usize) {
            Some(s) if s.generation == id.generation && s.tx.is_some() => {
                self.release(id.slot);
                true
            }
            _ => false,
        }
    }

    /// Number of memberships queued on `key`.
    pub fn waiting_on(&self, key: &[u8]) -> usize {
        self.queues.get(key).map_or(0, |q| q.len)
    }

    /// Keys with at least one waiter.
    pub fn waited_keys(&self) -> impl Iterator<Item = &Bytes> {
        self.queues.keys()
    }

    /// True when nobody is blocked on this key space.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Unlinks all memberships of a signal, frees its slot, and hands
    /// back its sender.
    fn release(&mut self, slot: u32) -> Option<oneshot::Sender<Bytes>> {
        let signal = &mut self.signals[slot as usize];
        let tx = signal.tx.take();
        let mut cursor = signal.first.take();
        signal.generation = signal.generation.wrapping_add(1);
        self.free_signals.push(slot);

        while let Some(idx) = cursor {
            let node = self.nodes[idx]
                .take()
                .expect("signal membership points at a free node");
            cursor = node.next_in_signal;
            self.unlink_from_queue(&node);
            self.free_nodes.push(idx);
        }
        tx
    }

    fn push_back(&mut self, key: &Bytes, node: usize) {
        match self.queues.get_mut(key.as_ref()) {
            Some(queue) => {
                let tail = queue.tail;
                queue.tail = node;
                queue.len += 1;
                self.node_mut(tail).next_in_key = Some(node);
                self.node_mut(node).prev_in_key = Some(tail);
            }
            None => {
                self.queues.insert(
                    key.clone(),
                    Queue {
                        head: node,
                        tail: node,
                        len: 1,
                    },
                );
            }
        }
    }

    /// Splices a removed node out of its key queue, dropping the queue
    /// when it empties.
    fn unlink_from_queue(&mut self, node: &Node) {
        if let Some(prev) = node.prev_in_key {
            self.node_mut(prev).next_in_key = node.next_in_key;
        }
        if let Some(next) = node.next_in_key {
            self.node_mut(next).prev_in_key = node.prev_in_key;
        }

        let Some(queue) = self.queues.get_mut(node.key.as_ref()) else {
            return;
        };
        queue.len -= 1;
        if queue.len == 0 {
            self.queues.remove(node.key.as_ref());
            return;
        }
        if node.prev_in_key.is_none() {
            if let Some(next) = node.next_in_key {
                queue.head = next;
            }
        }
        if node.next_in_key.is_none() {
            if let Some(prev) = node.prev_in_key {
                queue.tail = prev;
            }
        }
    }

    fn alloc_signal(&mut self, tx: oneshot::Sender<Bytes>) -> u32 {
        match self.free_signals.pop() {
            Some(slot) => {
                self.signals[slot as usize].tx = Some(tx);
                slot
            }
            None => {
                self.signals.push(SignalSlot {
                    generation: 0,
                    first: None,
                    tx: Some(tx),
                });
                (self.signals.len() - 1) as u32
            }
        }
    }

    fn alloc_node(&mut self, node: Node) -> usize {
        match self.free_nodes.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("queue points at a free node")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("queue points at a free node")
    }
}
