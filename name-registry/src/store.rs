//! Shared record table backed by an append-only file.
//!
//! The file holds one `<domain> <type> <value>` line per successful
//! REGISTER. It is replayed once when the store opens and only appended to
//! afterwards, so memory and disk agree as long as every mutation goes
//! through [`RecordStore::register`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
    sync::RwLock,
};
use tracing::{debug, info, warn};

use crate::record::{Record, RecordType, ValidationError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("failed to append to backing file")]
    Io(#[from] io::Error),
}

/// Thread-safe domain → records table.
///
/// A single `RwLock` covers both the map and the file handle. REGISTER holds
/// it exclusively across the file append and the map push, so the file line
/// order always matches the in-memory order. Lookups share the lock and never
/// see a half-applied registration.
pub struct RecordStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

struct Inner {
    records: HashMap<String, Vec<Record>>,
    log: File,
    log_len: u64,
    /// A failed append could not be rolled back, so the file may end
    /// mid-line. The next append starts with a newline.
    torn_tail: bool,
}

impl RecordStore {
    /// Opens (creating if needed) the backing file and replays it.
    ///
    /// Lines that do not split into exactly three fields, or whose type is
    /// unknown, are skipped.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await?;

        let mut contents = Vec::new();
        log.read_to_end(&mut contents).await?;
        let mut log_len = contents.len() as u64;

        let mut records: HashMap<String, Vec<Record>> = HashMap::new();
        let mut loaded = 0usize;
        let mut skipped = 0usize;
        for (index, line) in String::from_utf8_lossy(&contents).lines().enumerate() {
            match parse_log_line(line) {
                Some(record) => {
                    records
                        .entry(record.domain().to_string())
                        .or_default()
                        .push(record);
                    loaded += 1;
                }
                None if line.trim().is_empty() => {}
                None => {
                    debug!(
                        line = index + 1,
                        content = line,
                        "skipping malformed backing file line"
                    );
                    skipped += 1;
                }
            }
        }

        // A torn final line would otherwise be glued to the next append.
        if contents.last().is_some_and(|&byte| byte != b'\n') {
            log.write_all(b"\n").await?;
            log.flush().await?;
            log_len += 1;
        }

        info!(path = %path.display(), loaded, skipped, "replayed backing file");

        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                records,
                log,
                log_len,
                torn_tail: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) async fn replace_log(&self, log: File) {
        self.inner.write().await.log = log;
    }

    /// All records for `domain` whose type matches `record_type`, ignoring case.
    ///
    /// An unknown domain and a known domain without that type both come back
    /// empty.
    pub async fn lookup(&self, record_type: &str, domain: &str) -> Vec<Record> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(domain)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        record
                            .record_type()
                            .as_str()
                            .eq_ignore_ascii_case(record_type)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record in the store. Per-domain insertion order is kept; the
    /// order between domains is unspecified.
    pub async fn list(&self) -> Vec<Record> {
        let inner = self.inner.read().await;
        inner.records.values().flatten().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.records.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Validates and stores a new record, appending it to the backing file first.
    ///
    /// On any error neither the map nor the file is changed.
    pub async fn register(
        &self,
        domain: &str,
        record_type: &str,
        value: &str,
    ) -> Result<Record, StoreError> {
        let record = Record::parse(domain, record_type, value)?;
        let line = format!("{record}\n");

        let mut inner = self.inner.write().await;
        inner.append(line.as_bytes()).await?;
        inner
            .records
            .entry(record.domain().to_string())
            .or_default()
            .push(record.clone());

        Ok(record)
    }
}

impl Inner {
    async fn append(&mut self, line: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        if self.torn_tail {
            buf.push(b'\n');
        }
        buf.extend_from_slice(line);

        if let Err(err) = write_line(&mut self.log, &buf).await {
            if let Err(truncate_err) = self.log.set_len(self.log_len).await {
                warn!(
                    write_error = ?err,
                    rollback_error = ?truncate_err,
                    good_len = self.log_len,
                    "backing file rollback failed, file may end in a partial line"
                );
                self.torn_tail = true;
            }
            return Err(err);
        }

        self.log_len += buf.len() as u64;
        self.torn_tail = false;
        Ok(())
    }
}

async fn write_line(log: &mut File, line: &[u8]) -> io::Result<()> {
    log.write_all(line).await?;
    log.flush().await
}

fn parse_log_line(line: &str) -> Option<Record> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [domain, record_type, value] = fields.as_slice() else {
        return None;
    };
    let record_type: RecordType = record_type.parse().ok()?;
    Some(Record::new(*domain, record_type, *value))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    async fn open_with(contents: &str) -> (TempDir, RecordStore) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("records.db");
        tokio::fs::write(&path, contents).await.expect("seed file");
        let store = RecordStore::open(&path).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn creates_missing_backing_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("fresh.db");
        let store = RecordStore::open(&path).await.expect("open store");
        assert!(store.is_empty().await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn replay_skips_malformed_lines() {
        let (_dir, store) = open_with(
            "example.com A 10.0.0.1\n\
             just two\n\
             \n\
             a b c d\n\
             example.com TXT hello\n\
             example.com A 10.0.0.2\n",
        )
        .await;

        assert_eq!(store.len().await, 2);
        let values: Vec<_> = store
            .lookup("A", "example.com")
            .await
            .iter()
            .map(|r| r.value().to_string())
            .collect();
        assert_eq!(values, ["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn replayed_records_are_not_revalidated() {
        let (_dir, store) = open_with("mail.example.com MX mx1.example.com\n").await;

        let mx = store.lookup("MX", "mail.example.com").await;
        assert_eq!(mx.len(), 1);
        assert_eq!(mx[0].value(), "mx1.example.com");
        assert!(store.lookup("CNAME", "mail.example.com").await.is_empty());
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_on_type_only() {
        let (_dir, store) = open_with("example.com MX mx1.example.com\n").await;

        assert_eq!(store.lookup("mx", "example.com").await.len(), 1);
        assert!(store.lookup("MX", "EXAMPLE.COM").await.is_empty());
        assert!(store.lookup("MX", "missing.com").await.is_empty());
        assert!(store.lookup("SRV", "example.com").await.is_empty());
    }

    #[tokio::test]
    async fn register_appends_to_memory_and_file() {
        let (_dir, store) = open_with("").await;

        let record = store
            .register("example.com", "a", "10.0.0.1")
            .await
            .expect("register");
        assert_eq!(record.record_type(), RecordType::A);
        store
            .register("example.com", "A", "10.0.0.2")
            .await
            .expect("register");

        let values: Vec<_> = store
            .lookup("A", "example.com")
            .await
            .iter()
            .map(|r| r.value().to_string())
            .collect();
        assert_eq!(values, ["10.0.0.1", "10.0.0.2"]);

        let on_disk = tokio::fs::read_to_string(store.path()).await.expect("read file");
        assert_eq!(on_disk, "example.com A 10.0.0.1\nexample.com A 10.0.0.2\n");
    }

    #[tokio::test]
    async fn rejected_register_leaves_store_and_file_alone() {
        let (_dir, store) = open_with("example.com A 10.0.0.1\n").await;
        let before = tokio::fs::metadata(store.path()).await.expect("metadata").len();

        let result = store.register("bad_domain", "A", "10.0.0.1").await;
        assert!(matches!(result, Err(StoreError::Invalid(ValidationError::Domain(_)))));
        let result = store.register("example.com", "TXT", "hello").await;
        assert!(matches!(result, Err(StoreError::Invalid(ValidationError::UnknownType(_)))));

        assert_eq!(store.len().await, 1);
        let after = tokio::fs::metadata(store.path()).await.expect("metadata").len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn torn_trailing_line_is_terminated_on_open() {
        let (_dir, store) = open_with("example.com A 10.0.0.1\nhalf wri").await;
        store
            .register("other.org", "A", "10.0.0.9")
            .await
            .expect("register");

        let on_disk = tokio::fs::read_to_string(store.path()).await.expect("read file");
        assert_eq!(
            on_disk,
            "example.com A 10.0.0.1\nhalf wri\nother.org A 10.0.0.9\n"
        );
    }

    #[tokio::test]
    async fn registrations_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("records.db");
        {
            let store = RecordStore::open(&path).await.expect("open store");
            store
                .register("example.com", "CNAME", "web.example.com")
                .await
                .expect("register");
        }

        let store = RecordStore::open(&path).await.expect("reopen store");
        let records = store.lookup("CNAME", "example.com").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value(), "web.example.com");
    }

    #[tokio::test]
    async fn concurrent_registers_keep_file_and_memory_in_step() {
        let (_dir, store) = open_with("").await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for task in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .register(&format!("host{task}.com"), "A", &format!("10.0.{task}.{i}"))
                        .await
                        .expect("register");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(store.len().await, 80);

        let on_disk = tokio::fs::read_to_string(store.path()).await.expect("read file");
        let lines: Vec<&str> = on_disk.lines().collect();
        assert_eq!(lines.len(), 80);

        for task in 0..8 {
            let domain = format!("host{task}.com");
            let from_file: Vec<String> = lines
                .iter()
                .filter_map(|line| parse_log_line(line))
                .filter(|record| record.domain() == domain)
                .map(|record| record.value().to_string())
                .collect();
            let from_memory: Vec<String> = store
                .lookup("A", &domain)
                .await
                .iter()
                .map(|record| record.value().to_string())
                .collect();
            assert_eq!(from_file.len(), 10);
            assert_eq!(from_file, from_memory);
        }
    }

    #[tokio::test]
    async fn failed_append_leaves_store_and_file_alone() {
        let (_dir, store) = open_with("example.com A 10.0.0.1\n").await;
        let before = tokio::fs::read(store.path()).await.expect("read file");

        let read_only = File::open(store.path()).await.expect("reopen read-only");
        store.replace_log(read_only).await;

        let result = store.register("other.com", "A", "10.0.0.9").await;
        assert!(matches!(result, Err(StoreError::Io(_))));

        assert_eq!(store.len().await, 1);
        assert!(store.lookup("A", "other.com").await.is_empty());
        let after = tokio::fs::read(store.path()).await.expect("read file");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn append_after_failed_rollback_starts_a_fresh_line() {
        let (_dir, store) = open_with("example.com A 10.0.0.1\n").await;

        // Neither the write nor the truncate can succeed on a read-only handle.
        let read_only = File::open(store.path()).await.expect("reopen read-only");
        store.replace_log(read_only).await;
        assert!(store.register("other.com", "A", "10.0.0.9").await.is_err());
        assert!(store.inner.read().await.torn_tail);

        let writable = OpenOptions::new()
            .append(true)
            .open(store.path())
            .await
            .expect("reopen for append");
        store.replace_log(writable).await;
        store
            .register("other.com", "A", "10.0.0.9")
            .await
            .expect("register");
        assert!(!store.inner.read().await.torn_tail);

        let on_disk = tokio::fs::read_to_string(store.path()).await.expect("read file");
        assert_eq!(on_disk, "example.com A 10.0.0.1\n\nother.com A 10.0.0.9\n");

        let reopened = RecordStore::open(store.path()).await.expect("reopen store");
        assert_eq!(reopened.len().await, 2);
    }
}
