//! Durable on-disk FIFO of outbound telemetry payloads.
//!
//! A spool is a directory holding one file per undelivered payload, named by
//! zero-padded sequence number so that lexicographic order equals arrival
//! order:
//!
//! ```text
//! ${user_cache_dir}/opentelemetry-bundle/<signal>/
//!     .lock                       exclusive advisory lock
//!     0000000000000042.entry      durable entry
//!     0000000000000043.tmp        in-flight write, invisible to recovery
//! ```
//!
//! Durability contract: when [`Spool::enqueue`] returns `Ok`, the entry has
//! been written and fsynced under a temporary name, renamed into place, and
//! the directory fsynced — it survives process termination at any later
//! point. A crash between the temp write and the rename leaves a `.tmp` file
//! that recovery deletes without ever surfacing.
//!
//! Exactly one process may own a spool directory (single producer side,
//! single [`RetryDriver`](crate::retry) consumer); the `.lock` file is held
//! for the spool's lifetime and co-tenancy fails fast at open time.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use fs2::FileExt as _;
use thiserror::Error;

use crate::diag;
use crate::Signal;

mod entry;

pub use entry::{DecodeError, EntryMeta};

const LOCK_FILE: &str = ".lock";
const ENTRY_EXT: &str = "entry";
const TMP_EXT: &str = "tmp";
const BUNDLE_DIR: &str = "opentelemetry-bundle";

/// Failures of the durable queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpoolError {
    /// Another process holds the spool directory.
    #[error("spool directory {dir:?} is locked by another process")]
    Locked {
        /// The contended directory.
        dir: PathBuf,
    },

    /// The entry could not be persisted for lack of space.
    #[error("no space left to persist spool entry")]
    Space(#[source] io::Error),

    /// The spool was closed; the producer side is shutting down.
    #[error("spool is closed")]
    Closed,

    /// Any other filesystem failure.
    #[error("spool i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The entry metadata could not be serialized.
    #[error("spool entry metadata failed to serialize: {0}")]
    Encode(#[source] serde_json::Error),
}

fn classify_io(err: io::Error) -> SpoolError {
    if err.kind() == io::ErrorKind::StorageFull || err.raw_os_error() == Some(28) {
        SpoolError::Space(err)
    } else {
        SpoolError::Io(err)
    }
}

/// One undelivered payload read back from the spool.
#[derive(Debug, Clone)]
pub struct SpoolEntry {
    /// Sequence assigned at enqueue time; strictly increasing per directory.
    pub seq: u64,
    /// Delivery metadata.
    pub meta: EntryMeta,
    /// Opaque payload bytes.
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct State {
    next_seq: u64,
    // Bumped on every successful enqueue so a waiter can detect arrivals
    // that raced ahead of its wait.
    generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    signal: Signal,
    lock_file: File,
    state: Mutex<State>,
    wake: Condvar,
}

/// Handle to one spool directory. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct Spool {
    inner: Arc<Inner>,
}

impl Spool {
    /// Open (creating if necessary) the spool directory, acquire its lock,
    /// and recover the next sequence number from the entries on disk.
    pub fn open(dir: impl Into<PathBuf>, signal: Signal) -> Result<Spool, SpoolError> {
        let dir = dir.into();
        create_dir_owner_only(&dir).map_err(classify_io)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(classify_io)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| SpoolError::Locked { dir: dir.clone() })?;

        let mut max_seq = None;
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().is_some_and(|ext| ext == TMP_EXT) {
                // Torn write from a previous process; never load it.
                let _ = fs::remove_file(&path);
            } else if let Some(seq) = entry_seq(&path) {
                max_seq = Some(max_seq.map_or(seq, |max: u64| max.max(seq)));
            }
        }

        Ok(Spool {
            inner: Arc::new(Inner {
                dir,
                signal,
                lock_file,
                state: Mutex::new(State {
                    next_seq: max_seq.map_or(0, |max| max + 1),
                    generation: 0,
                    closed: false,
                }),
                wake: Condvar::new(),
            }),
        })
    }

    /// Default spool directory for a signal, under the user cache directory.
    pub fn default_dir(signal: Signal) -> Option<PathBuf> {
        dirs::cache_dir().map(|base| base.join(BUNDLE_DIR).join(signal.as_str()))
    }

    /// Persist one payload. Durable on return.
    pub fn enqueue(&self, meta: &EntryMeta, body: &[u8]) -> Result<u64, SpoolError> {
        let raw = entry::encode(meta, body).map_err(SpoolError::Encode)?;

        let mut state = self.lock_state();
        if state.closed {
            return Err(SpoolError::Closed);
        }
        let seq = state.next_seq;
        let tmp_path = self.inner.dir.join(format!("{seq:016}.{TMP_EXT}"));
        let entry_path = self.inner.dir.join(format!("{seq:016}.{ENTRY_EXT}"));

        let written = (|| -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&raw)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &entry_path)?;
            sync_dir(&self.inner.dir)
        })();
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(classify_io(err));
        }

        state.next_seq = seq + 1;
        state.generation += 1;
        drop(state);
        self.inner.wake.notify_all();
        Ok(seq)
    }

    /// Return the entry with the smallest sequence without removing it.
    ///
    /// Entries that fail to decode are reported, dropped, and skipped: a
    /// poison entry must never block the queue.
    pub fn peek_oldest(&self) -> Result<Option<SpoolEntry>, SpoolError> {
        loop {
            if self.lock_state().closed {
                return Err(SpoolError::Closed);
            }
            let Some((seq, path)) = self.scan_oldest()? else {
                return Ok(None);
            };
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                // Acknowledged concurrently; look again.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(classify_io(err)),
            };
            match entry::decode(&raw) {
                Ok((meta, body)) => return Ok(Some(SpoolEntry { seq, meta, body })),
                Err(err) => {
                    diag::error(
                        self.inner.signal,
                        None,
                        "poison",
                        &format!("dropping corrupt spool entry {seq}: {err}"),
                    );
                    self.acknowledge(seq)?;
                }
            }
        }
    }

    /// Remove an entry from durable storage. Idempotent.
    pub fn acknowledge(&self, seq: u64) -> Result<(), SpoolError> {
        let path = self.inner.dir.join(format!("{seq:016}.{ENTRY_EXT}"));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(classify_io(err)),
        }
    }

    /// Number of undelivered entries on disk.
    pub fn len(&self) -> Result<usize, SpoolError> {
        let mut count = 0;
        for dir_entry in fs::read_dir(&self.inner.dir)? {
            if entry_seq(&dir_entry?.path()).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether the spool currently holds no undelivered entries.
    pub fn is_empty(&self) -> Result<bool, SpoolError> {
        Ok(self.len()? == 0)
    }

    /// Mark the spool closed and release the directory lock. Subsequent
    /// operations fail with [`SpoolError::Closed`].
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        let _ = fs2::FileExt::unlock(&self.inner.lock_file);
        self.inner.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Snapshot of the enqueue generation, taken before scanning for
    /// entries. Pass it to [`wait_wake`](Self::wait_wake) so an enqueue that
    /// lands between the scan and the wait is not missed.
    pub(crate) fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Block until an enqueue (or close) wakes the caller, or `timeout`
    /// elapses. Returns immediately when an enqueue already happened after
    /// the `seen` generation snapshot. Used by the retry driver while the
    /// spool is empty.
    pub(crate) fn wait_wake(&self, seen: u64, timeout: Duration) {
        let state = self.lock_state();
        if state.closed || state.generation != seen {
            return;
        }
        let _ = self
            .inner
            .wake
            .wait_timeout(state, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    /// Wake a driver blocked in [`wait_wake`](Self::wait_wake).
    pub(crate) fn wake(&self) {
        self.inner.wake.notify_all();
    }

    fn scan_oldest(&self) -> Result<Option<(u64, PathBuf)>, SpoolError> {
        let mut oldest: Option<(u64, PathBuf)> = None;
        for dir_entry in fs::read_dir(&self.inner.dir)? {
            let path = dir_entry?.path();
            if let Some(seq) = entry_seq(&path) {
                if oldest.as_ref().is_none_or(|(min, _)| seq < *min) {
                    oldest = Some((seq, path));
                }
            }
        }
        Ok(oldest)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn entry_seq(path: &Path) -> Option<u64> {
    if !path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 16 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(unix)]
fn create_dir_owner_only(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt as _;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_dir_owner_only(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
