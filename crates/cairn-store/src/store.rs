//! Filesystem layout, append path, and chain reads.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use cairn_types::{validate_type_name, CanonicalEvent, ContentHash, Event};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{io_error, StoreError};
use crate::registry::TypeRegistry;

/// First line of every `chain.csv`.
pub const CHAIN_HEADER: &str = "timestamp,event_hash,event_type";

const EVENTS_DIR: &str = "events";
const CHAIN_FILE: &str = "chain.csv";
const LOCK_FILE: &str = "chain.lock";
const GITIGNORE_FILE: &str = ".gitignore";

/// Outcome of one [`EventStore::append`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEventRecord {
    pub event_hash: ContentHash,
    pub event_type: String,
    /// Zero-based index of the chain row written by this append.
    pub sequence_position: u64,
    pub timestamp: DateTime<Utc>,
    /// The blob already existed before this append.
    pub is_duplicate: bool,
}

/// One raw `chain.csv` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainRow {
    pub timestamp: DateTime<Utc>,
    pub event_hash: ContentHash,
    pub event_type: String,
}

/// A chain row together with its decoded event.
#[derive(Debug, Clone)]
pub struct ChainEntry<E> {
    pub timestamp: DateTime<Utc>,
    pub event_hash: ContentHash,
    pub event_type: String,
    pub event: E,
}

/// Integrity summary produced by [`EventStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Chain rows, repeats included.
    pub rows: usize,
    /// Distinct hashes referenced by the chain.
    pub distinct: usize,
    /// Referenced hashes with no blob on disk.
    pub missing_blobs: Vec<ContentHash>,
    /// Blobs whose content no longer hashes to their name.
    pub corrupt_blobs: Vec<ContentHash>,
    /// Blobs on disk that no chain row references.
    pub orphan_blobs: Vec<ContentHash>,
}

impl VerifyReport {
    /// Every chain row resolves to an intact blob.
    pub fn is_healthy(&self) -> bool {
        self.missing_blobs.is_empty() && self.corrupt_blobs.is_empty()
    }
}

/// Exclusive writer marker, removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(base: &Path) -> Result<Self, StoreError> {
        let path = base.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id()).map_err(|e| io_error(&path, e))?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::Locked(base.to_path_buf()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release chain lock");
        }
    }
}

#[derive(Debug)]
struct Writer {
    chain: File,
    _lock: LockFile,
}

/// Durable, deduplicated, append-only event log rooted at a directory.
///
/// ```text
/// <base>/
///   .gitignore              "*"
///   chain.csv               timestamp,event_hash,event_type
///   chain.lock              present while a writer is open
///   events/<hh>/<hash>.json canonical JSON, written once
/// ```
///
/// Every [`append`](Self::append) adds one chain row, even when the blob
/// already exists, so the chain records every observation while the blob
/// directory holds each distinct event once.
///
/// An occurrence counts as observed once its chain row is complete. A blob
/// with no chain row (left by a crash between the two writes) does not make
/// the next append a duplicate, and a final row without its newline is a torn
/// write: readers ignore it and the next writer truncates it.
#[derive(Debug)]
pub struct EventStore {
    base: PathBuf,
    writer: Option<Writer>,
    next_position: u64,
    /// Hashes with at least one chain row. Only tracked for writers.
    chained: HashSet<ContentHash>,
}

impl EventStore {
    /// Opens `base` for appending, creating the layout if needed.
    ///
    /// Holds `chain.lock` until the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another writer holds the lock,
    /// `StoreError::MalformedChain` if an existing chain cannot be parsed, or
    /// `StoreError::Io` on filesystem failure.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        let events_dir = base.join(EVENTS_DIR);
        fs::create_dir_all(&events_dir).map_err(|e| io_error(&events_dir, e))?;
        ensure_gitignore(&base)?;

        let lock = LockFile::acquire(&base)?;
        let chain_path = base.join(CHAIN_FILE);
        truncate_torn_tail(&chain_path)?;
        let chain = open_chain_for_append(&chain_path)?;

        let mut store = Self {
            base,
            writer: None,
            next_position: 0,
            chained: HashSet::new(),
        };
        let rows = store.read_chain()?;
        store.next_position = rows.len() as u64;
        store.chained = rows.into_iter().map(|row| row.event_hash).collect();
        store.writer = Some(Writer { chain, _lock: lock });

        tracing::info!(
            path = %store.base.display(),
            rows = store.next_position,
            "opened event store"
        );
        Ok(store)
    }

    /// Opens `base` for reading only. Takes no lock and creates nothing.
    ///
    /// A directory that does not exist yet reads as an empty store.
    pub fn open_read_only(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        if !base.join(CHAIN_FILE).exists() {
            tracing::warn!(path = %base.display(), "event store has no chain.csv yet");
        }
        Self {
            base,
            writer: None,
            next_position: 0,
            chained: HashSet::new(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Rows appended so far. Only tracked for writers.
    pub fn chain_len(&self) -> u64 {
        self.next_position
    }

    /// Where the blob for `hash` lives, whether or not it exists.
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.json"))
    }

    fn shard_dir(&self, hash: &ContentHash) -> PathBuf {
        self.base.join(EVENTS_DIR).join(hash.shard())
    }

    fn chain_path(&self) -> PathBuf {
        self.base.join(CHAIN_FILE)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Records one observation of `event`.
    ///
    /// The blob is written only if it does not exist yet, and is durable
    /// before the chain row referencing it is appended. The record is a
    /// duplicate when an earlier chain row already names the same hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ReadOnly` for read-only stores,
    /// `StoreError::Validation` if the event is malformed (nothing is
    /// written), or `StoreError::Io` if the blob or the chain row cannot be
    /// written.
    pub fn append<E: Event>(&mut self, event: &E) -> Result<StoredEventRecord, StoreError> {
        if self.writer.is_none() {
            return Err(StoreError::ReadOnly(self.base.clone()));
        }
        let canonical = CanonicalEvent::of(event)?;
        let hash = canonical.hash().clone();

        let created = write_blob_once(
            &self.shard_dir(&hash),
            &self.blob_path(&hash),
            canonical.json().as_bytes(),
        )?;
        if !created && !self.chained.contains(&hash) {
            tracing::debug!(event_hash = %hash, "adopting blob that no chain row references");
        }

        let timestamp = Utc::now().trunc_subsecs(6);
        let row = format!(
            "{},{},{}\n",
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            hash,
            canonical.event_type()
        );
        let chain_path = self.chain_path();
        let Some(writer) = self.writer.as_mut() else {
            return Err(StoreError::ReadOnly(self.base.clone()));
        };
        let committed_len = writer
            .chain
            .metadata()
            .map_err(|e| io_error(&chain_path, e))?
            .len();
        if let Err(e) = writer
            .chain
            .write_all(row.as_bytes())
            .and_then(|()| writer.chain.sync_data())
        {
            if let Err(undo) = writer.chain.set_len(committed_len) {
                tracing::warn!(
                    path = %chain_path.display(),
                    error = %undo,
                    "failed to cut back partial chain row"
                );
            }
            return Err(io_error(&chain_path, e));
        }

        let sequence_position = self.next_position;
        self.next_position += 1;
        let is_duplicate = !self.chained.insert(hash.clone());

        tracing::debug!(
            event_type = canonical.event_type(),
            event_hash = %hash,
            sequence_position,
            duplicate = is_duplicate,
            "appended event"
        );

        Ok(StoredEventRecord {
            event_hash: hash,
            event_type: canonical.event_type().to_string(),
            sequence_position,
            timestamp,
            is_duplicate,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Every complete chain row in append order, without touching blobs.
    ///
    /// A final line with no trailing newline is a torn write and is left out.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MalformedChain` if a row cannot be parsed or
    /// `StoreError::Io` if the chain cannot be read.
    pub fn read_chain(&self) -> Result<Vec<ChainRow>, StoreError> {
        let path = self.chain_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };
        let (complete, torn) = split_torn_tail(&contents);
        if let Some(torn) = torn {
            tracing::warn!(path = %path.display(), row = torn, "ignoring torn chain row");
        }
        parse_chain(complete)
    }

    /// Every chain row in append order, decoded through `registry`.
    ///
    /// Rows whose type is not registered are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingBlob` if a registered row has no blob,
    /// `StoreError::Serialization` if a blob does not decode into its
    /// registered type, or any error from [`EventStore::read_chain`].
    pub fn read_all<E: 'static>(
        &self,
        registry: &TypeRegistry<E>,
    ) -> Result<Vec<ChainEntry<E>>, StoreError> {
        self.read_filtered(registry, |_| true)
    }

    /// [`EventStore::read_all`] restricted to `types`, order preserved.
    ///
    /// # Errors
    ///
    /// See [`EventStore::read_all`].
    pub fn read_by_types<E: 'static>(
        &self,
        registry: &TypeRegistry<E>,
        types: &[&str],
    ) -> Result<Vec<ChainEntry<E>>, StoreError> {
        self.read_filtered(registry, |event_type| {
            types.iter().any(|wanted| *wanted == event_type)
        })
    }

    fn read_filtered<E: 'static>(
        &self,
        registry: &TypeRegistry<E>,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<ChainEntry<E>>, StoreError> {
        let rows = self.read_chain()?;
        let mut blobs: HashMap<ContentHash, String> = HashMap::new();
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for (row_index, row) in rows.into_iter().enumerate() {
            if !keep(&row.event_type) {
                continue;
            }
            if !registry.contains(&row.event_type) {
                skipped += 1;
                continue;
            }
            if !blobs.contains_key(&row.event_hash) {
                let json = self.read_blob(row_index, &row.event_hash)?;
                blobs.insert(row.event_hash.clone(), json);
            }
            let Some(decoded) = registry.decode(&row.event_type, &blobs[&row.event_hash]) else {
                continue;
            };
            entries.push(ChainEntry {
                timestamp: row.timestamp,
                event_hash: row.event_hash,
                event_type: row.event_type,
                event: decoded?,
            });
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped chain rows with unregistered event types");
        }
        Ok(entries)
    }

    fn read_blob(&self, row: usize, hash: &ContentHash) -> Result<String, StoreError> {
        let path = self.blob_path(hash);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(json),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::MissingBlob {
                row,
                hash: hash.to_string(),
            }),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    // ── Integrity ────────────────────────────────────────────────────

    /// Cross-checks the chain against the blob directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MalformedChain` if the chain cannot be parsed or
    /// `StoreError::Io` if a blob or directory cannot be read.
    pub fn verify(&self) -> Result<VerifyReport, StoreError> {
        let rows = self.read_chain()?;
        let mut report = VerifyReport {
            rows: rows.len(),
            ..VerifyReport::default()
        };
        let mut referenced: HashSet<ContentHash> = HashSet::new();

        for row in &rows {
            if !referenced.insert(row.event_hash.clone()) {
                continue;
            }
            let path = self.blob_path(&row.event_hash);
            match fs::read_to_string(&path) {
                Ok(json) => {
                    if ContentHash::of(&row.event_type, &json) != row.event_hash {
                        report.corrupt_blobs.push(row.event_hash.clone());
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.missing_blobs.push(row.event_hash.clone());
                }
                Err(e) => return Err(io_error(&path, e)),
            }
        }

        report.distinct = referenced.len();
        report.orphan_blobs = self.orphan_blobs(&referenced)?;
        Ok(report)
    }

    fn orphan_blobs(&self, referenced: &HashSet<ContentHash>) -> Result<Vec<ContentHash>, StoreError> {
        let events_dir = self.base.join(EVENTS_DIR);
        let shards = match fs::read_dir(&events_dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&events_dir, e)),
        };

        let mut orphans = BTreeSet::new();
        for shard in shards {
            let shard_path = shard.map_err(|e| io_error(&events_dir, e))?.path();
            if !shard_path.is_dir() {
                continue;
            }
            let blobs = fs::read_dir(&shard_path).map_err(|e| io_error(&shard_path, e))?;
            for blob in blobs {
                let path = blob.map_err(|e| io_error(&shard_path, e))?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Ok(hash) = ContentHash::parse(stem) else {
                    continue;
                };
                if !referenced.contains(&hash) {
                    orphans.insert(hash);
                }
            }
        }
        Ok(orphans.into_iter().collect())
    }
}

fn ensure_gitignore(base: &Path) -> Result<(), StoreError> {
    let path = base.join(GITIGNORE_FILE);
    if !path.exists() {
        fs::write(&path, "*\n").map_err(|e| io_error(&path, e))?;
    }
    Ok(())
}

/// Splits `contents` into its newline-terminated prefix and the unterminated
/// last line, if any.
fn split_torn_tail(contents: &str) -> (&str, Option<&str>) {
    if contents.is_empty() || contents.ends_with('\n') {
        return (contents, None);
    }
    let start = contents.rfind('\n').map_or(0, |i| i + 1);
    (&contents[..start], Some(&contents[start..]))
}

/// Cuts an unterminated last line off the chain file. The row it belonged to
/// was never synced, so the occurrence it described was never observed.
fn truncate_torn_tail(path: &Path) -> Result<(), StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(path, e)),
    };
    let (complete, Some(torn)) = split_torn_tail(&contents) else {
        return Ok(());
    };
    tracing::warn!(path = %path.display(), row = torn, "truncating torn chain row");

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    file.set_len(complete.len() as u64)
        .map_err(|e| io_error(path, e))?;
    file.sync_all().map_err(|e| io_error(path, e))
}

fn open_chain_for_append(path: &Path) -> Result<File, StoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    let len = file.metadata().map_err(|e| io_error(path, e))?.len();
    if len == 0 {
        writeln!(file, "{CHAIN_HEADER}").map_err(|e| io_error(path, e))?;
        file.sync_all().map_err(|e| io_error(path, e))?;
    }
    Ok(file)
}

/// Writes `bytes` to `path` unless it already exists. Returns whether this
/// call created the blob.
fn write_blob_once(shard: &Path, path: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
    if path.exists() {
        return Ok(false);
    }
    fs::create_dir_all(shard).map_err(|e| io_error(shard, e))?;

    let mut tmp = NamedTempFile::new_in(shard).map_err(|e| io_error(shard, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(shard, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(shard, e))?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(io_error(path, e.error)),
    }
}

fn parse_chain(contents: &str) -> Result<Vec<ChainRow>, StoreError> {
    let mut lines = contents.lines().enumerate();
    match lines.next() {
        None => return Ok(Vec::new()),
        Some((_, header)) if header == CHAIN_HEADER => {}
        Some((_, other)) => {
            return Err(StoreError::MalformedChain {
                line: 1,
                reason: format!("expected header '{CHAIN_HEADER}', found '{other}'"),
            })
        }
    }

    let mut rows = Vec::new();
    for (index, line) in lines {
        if line.is_empty() {
            continue;
        }
        rows.push(parse_row(index + 1, line)?);
    }
    Ok(rows)
}

fn parse_row(line_no: usize, line: &str) -> Result<ChainRow, StoreError> {
    let malformed = |reason: String| StoreError::MalformedChain {
        line: line_no,
        reason,
    };

    let mut fields = line.splitn(3, ',');
    let (Some(timestamp), Some(hash), Some(event_type)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed(format!("expected 3 fields in '{line}'")));
    };

    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| malformed(format!("bad timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);
    let event_hash = ContentHash::parse(hash).map_err(|e| malformed(e.to_string()))?;
    validate_type_name(event_type).map_err(|e| malformed(e.to_string()))?;

    Ok(ChainRow {
        timestamp,
        event_hash,
        event_type: event_type.to_string(),
    })
}
