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
    fs::OpenOptions,
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use bytes::Bytes;
use larder_common::{
    code::{StorageKey, StorageValue},
    statistics::Statistics,
};
use larder_memory::{
    core::{Backend, CacheCore},
    expunge::{ExpungeStrategy, LfuRecycling, Recycle, DEFAULT_RECYCLE_FACTOR},
    metadata::UNLIMITED_IDLE_TIME,
};
use parking_lot::Mutex;

use crate::{
    data::DataFile,
    error::{Error, Result},
    index::{IndexEntry, IndexFile},
    meta::{BlockMeta, KeyedMetadata},
    writer::{WriteQueue, Writer, DEFAULT_QUEUE_WARNING_SIZE},
};

/// The two files backing one cache instance. Lock order is index then data,
/// everywhere.
pub struct Files {
    pub(crate) index: Mutex<IndexFile>,
    pub(crate) data: Mutex<DataFile>,
}

/// Backend that hands stored values to the write-behind queue and reads
/// them back from the queue or the record file.
pub struct DiskBackend<K, V> {
    files: Arc<Files>,
    queue: WriteQueue<K>,
    _value: PhantomData<fn(V) -> V>,
}

impl<K, V> Backend<K, V> for DiskBackend<K, V>
where
    K: StorageKey,
    V: StorageValue,
{
    type Meta = BlockMeta;
    type Error = Error;

    fn store(
        &mut self,
        key: &K,
        value: &V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<BlockMeta> {
        let bytes = Bytes::from(bincode::serialize(value)?);
        let meta = BlockMeta::new(time_to_live, max_idle_time);
        self.queue.enqueue(key.clone(), meta.clone(), bytes);
        Ok(meta)
    }

    fn load(&mut self, key: &K, meta: &BlockMeta) -> Result<V> {
        // The value may still be queued; checking the queue first also
        // avoids a disk round-trip.
        let bytes = match self.queue.find_pending(key) {
            Some(bytes) => bytes,
            None => {
                let location = meta
                    .location()
                    .ok_or(Error::Inconsistent("live entry has no durable location"))?;
                Bytes::from(self.files.data.lock().read(&location.value_block)?)
            }
        };
        Ok(bincode::deserialize(&bytes)?)
    }

    fn discard(&mut self, key: &K, meta: &BlockMeta) -> Result<()> {
        // If the writer still had the entry, its removal is all there is to
        // do. Otherwise the write won the race and the durable record must
        // be deleted here.
        if self.queue.try_cancel(key) {
            return Ok(());
        }

        let location = meta
            .location()
            .ok_or(Error::Inconsistent("live entry has no durable location"))?;

        let mut index = self.files.index.lock();
        let mut data = self.files.data.lock();
        index.delete(location.slot)?;
        data.delete(&location.key_meta_block, true)?;
        data.delete(&location.value_block, true)?;
        Ok(())
    }
}

/// Disk-backed cache: record and index file, write-behind worker, and a
/// size-bounded in-memory index on top.
///
/// # Example
///
/// ```ignore
/// let cache: IndexedDiskCache<String, String> =
///     IndexedDiskCache::builder("answers", "/tmp/larder")
///         .with_max_size(1000)
///         .build()?;
/// cache.put("q".to_owned(), "42".to_owned());
/// assert_eq!(cache.get(&"q".to_owned()), Some("42".to_owned()));
/// cache.close()?;
/// ```
pub struct IndexedDiskCache<K, V, S = LfuRecycling>
where
    K: StorageKey,
    V: StorageValue,
    S: ExpungeStrategy<K, BlockMeta>,
{
    name: String,
    core: Mutex<CacheCore<K, V, DiskBackend<K, V>, S>>,
    queue: WriteQueue<K>,
    files: Arc<Files>,
    lock_path: PathBuf,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<K, V> IndexedDiskCache<K, V, LfuRecycling>
where
    K: StorageKey,
    V: StorageValue,
{
    pub fn builder(
        name: impl Into<String>,
        dir: impl AsRef<Path>,
    ) -> IndexedDiskCacheBuilder<K, V, LfuRecycling> {
        IndexedDiskCacheBuilder::new(name, dir)
    }
}

impl<K, V, S> IndexedDiskCache<K, V, S>
where
    K: StorageKey,
    V: StorageValue,
    S: ExpungeStrategy<K, BlockMeta>,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a value under the default lifetimes, best effort.
    pub fn put(&self, key: K, value: V) -> V {
        self.core.lock().put(key, value)
    }

    pub fn put_with(&self, key: K, value: V, time_to_live: i64, max_idle_time: i64) -> V {
        self.core
            .lock()
            .put_with(key, value, time_to_live, max_idle_time)
    }

    pub fn try_put(&self, key: K, value: V) -> Result<V> {
        self.core.lock().try_put(key, value)
    }

    pub fn try_put_with(
        &self,
        key: K,
        value: V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<V> {
        self.core
            .lock()
            .try_put_with(key, value, time_to_live, max_idle_time)
    }

    /// Best-effort get: failures are logged and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        self.core.lock().get(key)
    }

    pub fn try_get(&self, key: &K) -> Result<Option<V>> {
        self.core.lock().try_get(key)
    }

    pub fn delete(&self, key: &K) -> Result<()> {
        self.core.lock().delete(key)
    }

    /// Purges expired and stale entries outside the size-triggered path.
    pub fn clean_up(&self) -> Result<()> {
        self.core.lock().clean_up()
    }

    /// Metadata snapshot for a key, `None` for absent or expired entries.
    pub fn metadata(&self, key: &K) -> Result<Option<BlockMeta>> {
        self.core.lock().metadata(key)
    }

    /// Records a hit without reading the value. Used by front layers that
    /// serve from their own buffer.
    pub fn touch(&self, key: &K) -> bool {
        self.core.lock().touch(key)
    }

    /// Metadata without side effects, for front layers ranking their
    /// buffer.
    pub fn peek(&self, key: &K) -> Option<BlockMeta> {
        self.core.lock().peek(key).cloned()
    }

    pub fn statistics(&self) -> Statistics {
        self.core.lock().statistics()
    }

    pub fn len(&self) -> usize {
        self.core.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock().is_empty()
    }

    /// Number of entries still waiting for the background writer.
    pub fn write_queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Allocated slot count of the index file.
    pub fn index_allocated(&self) -> usize {
        self.files.index.lock().num_allocated()
    }

    /// Registered block count of the record file. Two blocks per entry.
    pub fn data_allocated(&self) -> usize {
        self.files.data.lock().num_allocated()
    }

    /// Length of the record file in bytes.
    pub fn data_len(&self) -> Result<u64> {
        self.files.data.lock().len()
    }

    /// Synchronously drains the write queue. Afterwards every put that
    /// returned before the call is durable.
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Flushes, stops the writer, and releases the lock file. Called by
    /// drop if not called explicitly, but only an explicit close surfaces
    /// errors.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.queue.flush();
        self.queue.request_stop();
        if let Some(handle) = self.writer_handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("{}: writer thread panicked", self.name);
            }
        }

        std::fs::remove_file(&self.lock_path)?;
        tracing::info!("{}: shutdown complete", self.name);
        Ok(())
    }
}

impl<K, V, S> Drop for IndexedDiskCache<K, V, S>
where
    K: StorageKey,
    V: StorageValue,
    S: ExpungeStrategy<K, BlockMeta>,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("{}: closing cache failed: {}", self.name, e);
        }
    }
}

pub struct IndexedDiskCacheBuilder<K, V, S = LfuRecycling> {
    name: String,
    dir: PathBuf,
    default_time_to_live: i64,
    default_max_idle_time: i64,
    queue_warning_size: usize,
    max_size: usize,
    recycle: Recycle,
    strategy: S,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> IndexedDiskCacheBuilder<K, V, LfuRecycling> {
    pub fn new(name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            dir: dir.as_ref().to_path_buf(),
            default_time_to_live: i64::MAX,
            default_max_idle_time: UNLIMITED_IDLE_TIME,
            queue_warning_size: DEFAULT_QUEUE_WARNING_SIZE,
            max_size: usize::MAX,
            recycle: Recycle::Factor(DEFAULT_RECYCLE_FACTOR),
            // Effectively unbounded until a max size is set.
            strategy: LfuRecycling::new(usize::MAX, 0),
            _marker: PhantomData,
        }
    }

    /// Entry bound; the recycle size defaults to a fraction of it.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self.rebuild_strategy();
        self
    }

    /// Absolute headroom above the max size before a sweep triggers.
    pub fn with_recycle_size(mut self, recycle_size: usize) -> Self {
        self.recycle = Recycle::Size(recycle_size);
        self.rebuild_strategy();
        self
    }

    pub fn with_recycle_factor(mut self, recycle_factor: f64) -> Self {
        self.recycle = Recycle::Factor(recycle_factor);
        self.rebuild_strategy();
        self
    }

    fn rebuild_strategy(&mut self) {
        self.strategy = LfuRecycling::new(self.max_size, self.recycle.size_for(self.max_size));
    }
}

impl<K, V, S> IndexedDiskCacheBuilder<K, V, S> {
    /// Default time to live in milliseconds for entries put without one.
    pub fn with_time_to_live(mut self, time_to_live: i64) -> Self {
        self.default_time_to_live = time_to_live;
        self
    }

    /// Default max idle time in milliseconds, [`UNLIMITED_IDLE_TIME`] to
    /// disable idle eviction.
    pub fn with_max_idle_time(mut self, max_idle_time: i64) -> Self {
        self.default_max_idle_time = max_idle_time;
        self
    }

    /// Queue length above which enqueues log a warning.
    pub fn with_queue_warning_size(mut self, queue_warning_size: usize) -> Self {
        self.queue_warning_size = queue_warning_size;
        self
    }

    /// Replaces the expunge strategy wholesale.
    pub fn with_strategy<S2>(self, strategy: S2) -> IndexedDiskCacheBuilder<K, V, S2> {
        IndexedDiskCacheBuilder {
            name: self.name,
            dir: self.dir,
            default_time_to_live: self.default_time_to_live,
            default_max_idle_time: self.default_max_idle_time,
            queue_warning_size: self.queue_warning_size,
            max_size: self.max_size,
            recycle: self.recycle,
            strategy,
            _marker: PhantomData,
        }
    }

    /// Opens the cache: takes the lock file, opens both files, rebuilds
    /// the in-memory index from the index file, and starts the writer.
    pub fn build(self) -> Result<IndexedDiskCache<K, V, S>>
    where
        K: StorageKey,
        V: StorageValue,
        S: ExpungeStrategy<K, BlockMeta>,
    {
        std::fs::create_dir_all(&self.dir)?;
        let lock_path = create_lock_file(&self.dir, &self.name)?;

        let mut index = IndexFile::open(self.dir.join(format!("{}.index", self.name)))?;
        let mut data = DataFile::open(self.dir.join(format!("{}.data", self.name)))?;

        let recovered = rebuild::<K>(&self.name, &mut index, &mut data)?;

        let files = Arc::new(Files {
            index: Mutex::new(index),
            data: Mutex::new(data),
        });

        let (queue, writer) = WriteQueue::new(self.name.clone(), files.clone(), self.queue_warning_size);
        let writer_handle = spawn_writer(&self.name, writer)?;

        let backend = DiskBackend {
            files: files.clone(),
            queue: queue.clone(),
            _value: PhantomData,
        };
        let mut core = CacheCore::new(
            self.name.clone(),
            self.default_time_to_live,
            self.default_max_idle_time,
            backend,
            self.strategy,
        );
        for (keyed, entry) in recovered {
            core.restore(
                keyed.key,
                BlockMeta::restored(keyed.created, keyed.time_to_live, keyed.max_idle_time, entry),
            );
        }

        Ok(IndexedDiskCache {
            name: self.name,
            core: Mutex::new(core),
            queue,
            files,
            lock_path,
            writer_handle: Mutex::new(Some(writer_handle)),
            closed: AtomicBool::new(false),
        })
    }
}

fn create_lock_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let lock_path = dir.join(format!("{name}.lock"));
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(_) => Ok(lock_path),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(Error::LockConflict { path: lock_path })
        }
        Err(e) => Err(e.into()),
    }
}

fn spawn_writer<K>(name: &str, writer: Writer<K>) -> Result<JoinHandle<()>>
where
    K: StorageKey,
{
    Ok(std::thread::Builder::new()
        .name(format!("{name}.writer"))
        .spawn(move || writer.run())?)
}

/// Replays the index file: re-registers each entry's blocks with the
/// allocator and decodes its keyed metadata. Corrupt entries release
/// whatever was reclaimed for them and are dropped; overlapping survivors
/// abort the open.
fn rebuild<K>(
    name: &str,
    index: &mut IndexFile,
    data: &mut DataFile,
) -> Result<Vec<(KeyedMetadata<K>, IndexEntry)>>
where
    K: StorageKey,
{
    tracing::info!("{}: reading index", name);

    let entries = index.initialize()?;
    let mut recovered = Vec::with_capacity(entries.len());
    let mut data_length = 0u64;

    for entry in entries {
        match recover_entry::<K>(index, data, &entry) {
            Some(keyed) => {
                data_length += entry.key_meta_block.len() + entry.value_block.len();
                recovered.push((keyed, entry));
            }
            None => continue,
        }
    }

    if !data.check_consistency() {
        return Err(Error::Inconsistent("record file has overlapping blocks"));
    }

    let utilization = data_length * 100 / data.len()?.max(1);
    tracing::info!(
        "{}: read index: {} entries, {}% data space utilization",
        name,
        recovered.len(),
        utilization
    );

    Ok(recovered)
}

fn recover_entry<K>(
    index: &mut IndexFile,
    data: &mut DataFile,
    entry: &IndexEntry,
) -> Option<KeyedMetadata<K>>
where
    K: StorageKey,
{
    if let Err(e) = data.allocate_space(entry.key_meta_block) {
        tracing::warn!("recovering slot {} failed: {}", entry.slot, e);
        discard_entry(index, data, entry, false);
        return None;
    }

    let keyed = data
        .read(&entry.key_meta_block)
        .and_then(|bytes| KeyedMetadata::decode(&bytes));
    let keyed = match keyed {
        Ok(keyed) => keyed,
        Err(e) => {
            tracing::warn!("reading {} failed: {}", entry.key_meta_block, e);
            discard_entry(index, data, entry, true);
            return None;
        }
    };

    if let Err(e) = data.allocate_space(entry.value_block) {
        tracing::warn!("recovering slot {} failed: {}", entry.slot, e);
        discard_entry(index, data, entry, true);
        return None;
    }

    Some(keyed)
}

/// Drops a corrupt entry: frees its slot and, if its key meta block had
/// already been re-registered, releases that too. Blocks that conflicted
/// with another entry's are left alone, they belong to that entry.
fn discard_entry(index: &mut IndexFile, data: &mut DataFile, entry: &IndexEntry, release_meta: bool) {
    if let Err(e) = index.delete(entry.slot) {
        tracing::warn!("releasing slot {} failed: {}", entry.slot, e);
    }
    if release_meta {
        if let Err(e) = data.delete(&entry.key_meta_block, false) {
            tracing::warn!("releasing {} failed: {}", entry.key_meta_block, e);
        }
    }
}
