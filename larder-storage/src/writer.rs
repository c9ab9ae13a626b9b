//  Copyright 2025 Larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use larder_common::code::StorageKey;
use larder_memory::metadata::Meta;
use ordered_hash_map::OrderedHashMap;
use parking_lot::{Condvar, Mutex};

use crate::{
    error::Result,
    meta::{BlockMeta, KeyedMetadata},
    store::Files,
};

/// Queue length above which every further enqueue logs a warning. The queue
/// never blocks or rejects, the warning is the only backpressure signal.
pub const DEFAULT_QUEUE_WARNING_SIZE: usize = 1000;

/// How long the writer dozes when the queue runs dry.
const IDLE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct QueueEntry {
    meta: BlockMeta,
    value: Bytes,
}

/// Pending entries in insertion order, plus the entry the writer is
/// processing right now. An entry leaves `pending` the moment the writer
/// picks it up but stays visible through `current` until its bytes are on
/// disk.
struct QueueState<K> {
    pending: OrderedHashMap<K, QueueEntry>,
    current: Option<(K, QueueEntry)>,
}

/// Outcome flags for the entry currently being processed. `skip` is set by
/// a cancel that caught the entry before its write started; `written` means
/// the write finished and the entry is durable.
#[derive(Debug, Default)]
struct Processing {
    written: bool,
    skip: bool,
}

struct Shared<K> {
    queue: Mutex<QueueState<K>>,
    wake: Condvar,
    processing: Mutex<Processing>,
    /// Serializes whole writer iterations against [`WriteQueue::flush`].
    work: Mutex<()>,
    stop: AtomicBool,
    files: Arc<Files>,
    queue_warning_size: usize,
}

/// Handle to the write-behind queue, shared by the cache front end.
pub struct WriteQueue<K> {
    shared: Arc<Shared<K>>,
    name: String,
}

impl<K> Clone for WriteQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            name: self.name.clone(),
        }
    }
}

impl<K> WriteQueue<K>
where
    K: StorageKey,
{
    pub(crate) fn new(
        name: impl Into<String>,
        files: Arc<Files>,
        queue_warning_size: usize,
    ) -> (Self, Writer<K>) {
        let name = name.into();
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                pending: OrderedHashMap::new(),
                current: None,
            }),
            wake: Condvar::new(),
            processing: Mutex::new(Processing::default()),
            work: Mutex::new(()),
            stop: AtomicBool::new(false),
            files,
            queue_warning_size,
        });
        let queue = Self {
            shared: shared.clone(),
            name: name.clone(),
        };
        let writer = Writer { shared, name };
        (queue, writer)
    }

    /// Queues an entry for writing and wakes the writer. A re-put of a
    /// pending key replaces the queued entry; the caller always deletes the
    /// previous version first, so no merging is needed.
    pub fn enqueue(&self, key: K, meta: BlockMeta, value: Bytes) {
        {
            let mut queue = self.shared.queue.lock();
            queue.pending.insert(key, QueueEntry { meta, value });
            if queue.pending.len() > self.shared.queue_warning_size {
                tracing::warn!(
                    "{}: write queue is large: {}",
                    self.name,
                    queue.pending.len()
                );
            }
        }
        self.shared.wake.notify_one();
    }

    /// Value bytes for a key that is still queued or mid-write, so reads
    /// never miss data that is not yet durable.
    pub fn find_pending(&self, key: &K) -> Option<Bytes> {
        let queue = self.shared.queue.lock();
        if let Some((current_key, entry)) = &queue.current {
            if current_key == key {
                return Some(entry.value.clone());
            }
        }
        queue.pending.get(key).map(|entry| entry.value.clone())
    }

    /// Tries to take the key away from the writer. Returns true if the
    /// entry was still pending, or is mid-pickup and its write could be
    /// skipped; in that case the caller must not touch the files. Returns
    /// false once the entry is durable: the write won the race and the
    /// caller has to delete the on-disk record itself.
    pub fn try_cancel(&self, key: &K) -> bool {
        let mut queue = self.shared.queue.lock();

        if queue.pending.remove(key).is_some() {
            return true;
        }

        if queue.current.as_ref().is_some_and(|(k, _)| k == key) {
            let mut processing = self.shared.processing.lock();
            if processing.written {
                return false;
            }
            processing.skip = true;
            return true;
        }

        false
    }

    /// Synchronously writes out every pending entry. Waits for an iteration
    /// in flight to finish first. Each entry goes through the same
    /// current/processing protocol as the background loop, so it stays
    /// visible to reads and cancels while its write is underway.
    pub fn flush(&self) {
        let _work = self.shared.work.lock();
        tracing::info!("{}: flushing {} entries", self.name, self.len());

        while self.shared.drain_one(&self.name) {}

        tracing::debug!("{}: flushing done", self.name);
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signals the writer loop to exit. The spawner owns the join.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_all();
    }
}

impl<K> Shared<K>
where
    K: StorageKey,
{
    /// Pops the oldest pending entry, publishes it as `current`, writes it
    /// unless a cancel got there first, and clears `current`. The caller
    /// must hold the work mutex. Returns false if the queue was empty.
    fn drain_one(&self, name: &str) -> bool {
        {
            let mut processing = self.processing.lock();
            processing.written = false;
            processing.skip = false;
        }

        let popped = {
            let mut queue = self.queue.lock();
            match queue.pending.pop_front_entry() {
                Some((key, entry)) => {
                    queue.current = Some((key.clone(), entry.clone()));
                    let left = queue.pending.len();
                    Some((key, entry, left))
                }
                None => None,
            }
        };

        let Some((key, entry, left)) = popped else {
            return false;
        };

        {
            let mut processing = self.processing.lock();
            if !processing.skip {
                tracing::debug!("{}: writing {:?}, {} left", name, key, left);
                if let Err(e) = write_entry(&self.files, &key, &entry) {
                    // One failed write is skipped, the loop continues.
                    tracing::error!("{}: writing entry failed: {}", name, e);
                }
                // Set even when the write failed: the entry counts as
                // processed either way, and a later delete takes the
                // release-blocks path instead of cancelling.
                processing.written = true;
            }
        }

        self.queue.lock().current = None;
        true
    }
}

/// The background half: owns the drain loop, runs on a dedicated thread.
pub struct Writer<K> {
    shared: Arc<Shared<K>>,
    name: String,
}

impl<K> Writer<K>
where
    K: StorageKey,
{
    pub(crate) fn run(self) {
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }

            if !self.process_one() {
                let mut queue = self.shared.queue.lock();
                if self.shared.stop.load(Ordering::Acquire) {
                    break;
                }
                if queue.pending.len() == 0 {
                    self.shared.wake.wait_for(&mut queue, IDLE_WAIT);
                }
            }
        }

        tracing::info!("{}: writer stopped", self.name);
    }

    /// Drains one entry under the work mutex. Returns false if the queue
    /// was empty.
    fn process_one(&self) -> bool {
        let _work = self.shared.work.lock();
        self.shared.drain_one(&self.name)
    }
}

/// Serializes the keyed metadata, writes both blocks, registers the index
/// entry and back-fills the durable location. Lock order is index then
/// data, same as the foreground delete path.
fn write_entry<K>(files: &Files, key: &K, entry: &QueueEntry) -> Result<()>
where
    K: StorageKey,
{
    let keyed = KeyedMetadata {
        key: key.clone(),
        created: entry.meta.created(),
        time_to_live: entry.meta.time_to_live(),
        max_idle_time: entry.meta.max_idle_time(),
    };
    let meta_bytes = keyed.encode()?;

    let mut index = files.index.lock();
    let mut data = files.data.lock();

    let key_meta_block = data.write(&meta_bytes)?;
    let value_block = data.write(&entry.value)?;
    let index_entry = index.write(key_meta_block, value_block)?;
    entry.meta.set_location(index_entry);

    Ok(())
}
