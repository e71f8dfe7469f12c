//! Fragment reassembly.
//!
//! One [`Reassembler`] serves one transport. Groups are tracked
//! independently, so fragments of different messages may interleave and
//! complete in any order. A group that stops receiving fragments is
//! discarded after a timeout rather than held forever; on lossy links that
//! is the expected fate of some messages and not an error.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{tick, unbounded, Sender};
use crossbeam::select;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::{Fragment, GroupId};
use crate::{Error, Result};

/// Collects fragments per group until each group completes or expires.
///
/// All methods take `&self`; the group table is sharded internally, so one
/// reassembler can be shared across receive threads behind an [`Arc`].
///
/// # Examples
/// ```
/// use asterix::framing::{fragment, Reassembler};
///
/// let reassembler = Reassembler::new();
/// let message = vec![0x5a; 20];
/// let mut rebuilt = None;
/// for frag in fragment(3, &message, 7).unwrap() {
///     rebuilt = reassembler.push(frag).unwrap();
/// }
/// assert_eq!(rebuilt.as_deref(), Some(&message[..]));
/// ```
pub struct Reassembler {
    timeout: Duration,
    groups: DashMap<GroupId, ReassemblyGroup>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Age beyond which an incomplete group is discarded.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    #[must_use]
    pub fn new() -> Self {
        Reassembler {
            timeout: Self::DEFAULT_TIMEOUT,
            groups: DashMap::new(),
        }
    }

    /// Replace the discard timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ingest one fragment, returning the reassembled message bytes once
    /// its group is complete.
    ///
    /// A group completes when its last fragment has been seen and every
    /// index below it is stored; completion removes the group. Duplicate
    /// indices overwrite, newest wins. If the group already outlived the
    /// timeout, it is discarded first and the fragment starts a fresh
    /// group, which keeps a stale half-message from swallowing the retry.
    ///
    /// # Errors
    /// [`Error::MalformedFragment`] if the fragment contradicts the
    /// group's established fragment count, e.g. an index at or past the
    /// count, or a second, conflicting last fragment. The whole group is
    /// discarded; its other fragments are unrecoverable anyway. An index
    /// above [`Fragment::MAX_INDEX`] (impossible in a wire-decoded
    /// fragment) is rejected without touching the group.
    pub fn push(&self, fragment: Fragment) -> Result<Option<Vec<u8>>> {
        if fragment.index > Fragment::MAX_INDEX {
            return Err(Error::MalformedFragment {
                group: fragment.group,
                index: fragment.index,
                total: Fragment::MAX_FRAGMENTS,
            });
        }
        let group_id = fragment.group;
        let now = Instant::now();
        match self.groups.entry(group_id) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(entry.get().created) > self.timeout {
                    debug!(group = group_id, "group expired, fragment starts a fresh one");
                    *entry.get_mut() = ReassemblyGroup::new(now);
                }
                match entry.get_mut().store(group_id, fragment) {
                    Ok(true) => {
                        let group = entry.remove();
                        let message = group.assemble();
                        debug!(group = group_id, len = message.len(), "group complete");
                        Ok(Some(message))
                    }
                    Ok(false) => Ok(None),
                    Err(err) => {
                        warn!(group = group_id, %err, "discarding malformed group");
                        entry.remove();
                        Err(err)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let mut group = ReassemblyGroup::new(now);
                match group.store(group_id, fragment) {
                    Ok(true) => Ok(Some(group.assemble())),
                    Ok(false) => {
                        entry.insert(group);
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Discard every group older than the timeout, returning how many were
    /// dropped.
    ///
    /// [`Reassembler::push`] already refuses to extend stale groups, but
    /// only a sweep reclaims groups that never hear another fragment. Call
    /// it periodically or let [`spawn_sweeper`] do so.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        self.groups.retain(|group, state| {
            let age = now.duration_since(state.created);
            if age > self.timeout {
                debug!(
                    group,
                    age_ms = age.as_millis() as u64,
                    received = state.received,
                    "discarding expired group"
                );
                dropped += 1;
                return false;
            }
            true
        });
        if dropped > 0 {
            trace!(dropped, remaining = self.groups.len(), "swept expired groups");
        }
        dropped
    }

    /// Drop every group unconditionally, e.g. on transport teardown.
    pub fn clear(&self) {
        self.groups.clear();
    }

    /// Number of groups currently collecting fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Per-group collection state. Mutated only under the table's entry guard.
struct ReassemblyGroup {
    /// Payload slots indexed by fragment index, sparse until completion.
    slots: Vec<Option<Vec<u8>>>,
    /// Distinct indices stored so far.
    received: usize,
    /// Declared fragment count, known once the last fragment arrives.
    total: Option<usize>,
    /// Highest index stored so far.
    max_index: usize,
    /// When the first fragment of the group arrived.
    created: Instant,
}

impl ReassemblyGroup {
    fn new(created: Instant) -> Self {
        ReassemblyGroup {
            slots: Vec::new(),
            received: 0,
            total: None,
            max_index: 0,
            created,
        }
    }

    /// Store one fragment, reporting whether the group is now complete.
    fn store(&mut self, group: GroupId, fragment: Fragment) -> Result<bool> {
        let index = fragment.index as usize;
        if let Some(total) = self.total {
            if index >= total || (fragment.last && index + 1 != total) {
                return Err(Error::MalformedFragment {
                    group,
                    index: fragment.index,
                    total,
                });
            }
        }
        if fragment.last {
            let total = index + 1;
            if self.received > 0 && self.max_index >= total {
                // something already stored sits past the claimed end
                return Err(Error::MalformedFragment {
                    group,
                    index: fragment.index,
                    total,
                });
            }
            self.total = Some(total);
        }
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        let slot = &mut self.slots[index];
        if slot.is_none() {
            self.received += 1;
        } else {
            trace!(group, index, "duplicate fragment, keeping the newest");
        }
        *slot = Some(fragment.payload);
        self.max_index = self.max_index.max(index);
        Ok(self.total == Some(self.received))
    }

    /// Concatenate payloads in index order. Meaningful only once complete.
    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.slots
                .iter()
                .flatten()
                .map(Vec::len)
                .sum(),
        );
        for payload in self.slots.into_iter().flatten() {
            out.extend_from_slice(&payload);
        }
        out
    }
}

/// Stop signal and join handle for a background sweeper thread.
///
/// Dropping the handle stops the sweeper and joins the thread.
pub struct SweeperHandle {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub fn stop(self) {
        // drop does the work
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sweep `reassembler` every `period` on a background thread so stale
/// groups are reclaimed even when no fragments arrive.
///
/// # Panics
/// If the sweeper thread cannot be started.
#[must_use]
pub fn spawn_sweeper(reassembler: Arc<Reassembler>, period: Duration) -> SweeperHandle {
    let (stop_tx, stop_rx) = unbounded::<()>();
    let ticker = tick(period);
    let handle = thread::Builder::new()
        .name("reassembly_sweeper".into())
        .spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    reassembler.sweep();
                }
                recv(stop_rx) -> _ => break,
            }
        })
        .unwrap();
    SweeperHandle {
        stop: stop_tx,
        handle: Some(handle),
    }
}
