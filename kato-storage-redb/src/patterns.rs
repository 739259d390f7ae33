//! Pattern row operations for redb storage

use std::sync::Arc;

use async_trait::async_trait;
use kato_core::types::{PatternName, PutOutcome};
use kato_core::{Error, PatternRecord, PatternStore, Result};
use redb::{ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::tables::{encode_key, kb_range, PATTERNS_TABLE};
use crate::{RedbPatternStore, MAX_RECORD_SIZE};

fn decode_record(bytes: &[u8]) -> Result<PatternRecord> {
    if bytes.len() > MAX_RECORD_SIZE {
        return Err(Error::Storage(format!(
            "Pattern record exceeds size limit: {} > {} bytes",
            bytes.len(),
            MAX_RECORD_SIZE
        )));
    }
    postcard::from_bytes(bytes)
        .map_err(|e| Error::Storage(format!("Failed to deserialize pattern record: {e}")))
}

fn encode_record(record: &PatternRecord) -> Result<Vec<u8>> {
    postcard::to_allocvec(record)
        .map_err(|e| Error::Storage(format!("Failed to serialize pattern record: {e}")))
}

#[async_trait]
impl PatternStore for RedbPatternStore {
    async fn put(&self, record: &PatternRecord, persistence: usize) -> Result<PutOutcome> {
        debug!(kb_id = %record.kb_id, name = %record.name, "storing pattern");
        let db = Arc::clone(&self.db);
        let key = encode_key(&record.kb_id, &record.name);
        let incoming = record.clone();

        let (outcome, merged) = {
            let key = key.clone();
            tokio::task::spawn_blocking(move || {
                let write_txn = db.begin_write().map_err(|e| {
                    Error::Storage(format!("Failed to begin write transaction: {e}"))
                })?;

                let (outcome, merged) = {
                    let mut table = write_txn.open_table(PATTERNS_TABLE).map_err(|e| {
                        Error::Storage(format!("Failed to open patterns table: {e}"))
                    })?;

                    let existing = table
                        .get(key.as_str())
                        .map_err(|e| Error::Storage(format!("Failed to get pattern: {e}")))?
                        .map(|guard| decode_record(guard.value()))
                        .transpose()?;

                    let (outcome, merged) = match existing {
                        Some(mut current) => {
                            current.apply_relearn(&incoming, persistence);
                            (
                                PutOutcome {
                                    created: false,
                                    frequency: current.frequency,
                                },
                                current,
                            )
                        }
                        None => {
                            let mut fresh = incoming;
                            for window in fresh.emotive_windows.values_mut() {
                                while window.len() > persistence {
                                    window.pop_front();
                                }
                            }
                            (
                                PutOutcome {
                                    created: true,
                                    frequency: fresh.frequency,
                                },
                                fresh,
                            )
                        }
                    };

                    let bytes = encode_record(&merged)?;
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(|e| Error::Storage(format!("Failed to insert pattern: {e}")))?;
                    (outcome, merged)
                };

                // The put is acknowledged only once this commit returns
                write_txn
                    .commit()
                    .map_err(|e| Error::Storage(format!("Failed to commit transaction: {e}")))?;

                Ok::<_, Error>((outcome, merged))
            })
            .await
            .map_err(|e| Error::Storage(format!("Task join error: {e}")))??
        };

        self.cache_put(key, merged);
        Ok(outcome)
    }

    async fn get(&self, kb_id: &str, name: &str) -> Result<Option<PatternRecord>> {
        let key = encode_key(kb_id, name);
        if let Some(record) = self.cache_get(&key) {
            return Ok(Some(record));
        }

        let db = Arc::clone(&self.db);
        let record = {
            let key = key.clone();
            tokio::task::spawn_blocking(move || {
                let read_txn = db.begin_read().map_err(|e| {
                    Error::Storage(format!("Failed to begin read transaction: {e}"))
                })?;
                let table = read_txn
                    .open_table(PATTERNS_TABLE)
                    .map_err(|e| Error::Storage(format!("Failed to open patterns table: {e}")))?;
                table
                    .get(key.as_str())
                    .map_err(|e| Error::Storage(format!("Failed to get pattern: {e}")))?
                    .map(|guard| decode_record(guard.value()))
                    .transpose()
            })
            .await
            .map_err(|e| Error::Storage(format!("Task join error: {e}")))??
        };

        if let Some(record) = &record {
            self.cache_put(key, record.clone());
        }
        Ok(record)
    }

    async fn get_batch(
        &self,
        kb_id: &str,
        names: &[PatternName],
    ) -> Result<Vec<Option<PatternRecord>>> {
        let db = Arc::clone(&self.db);
        let keys: Vec<String> = names.iter().map(|name| encode_key(kb_id, name)).collect();

        tokio::task::spawn_blocking(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::Storage(format!("Failed to begin read transaction: {e}")))?;
            let table = read_txn
                .open_table(PATTERNS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open patterns table: {e}")))?;

            keys.iter()
                .map(|key| {
                    table
                        .get(key.as_str())
                        .map_err(|e| Error::Storage(format!("Failed to get pattern: {e}")))?
                        .map(|guard| decode_record(guard.value()))
                        .transpose()
                })
                .collect()
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {e}")))?
    }

    async fn query_by_length(
        &self,
        kb_id: &str,
        min_length: usize,
        max_length: usize,
    ) -> Result<Vec<PatternRecord>> {
        let db = Arc::clone(&self.db);
        let (start, end) = kb_range(kb_id);

        tokio::task::spawn_blocking(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::Storage(format!("Failed to begin read transaction: {e}")))?;
            let table = read_txn
                .open_table(PATTERNS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open patterns table: {e}")))?;

            let mut records = Vec::new();
            let range = table
                .range::<&str>(start.as_str()..end.as_str())
                .map_err(|e| Error::Storage(format!("Failed to scan patterns: {e}")))?;
            for entry in range {
                let (_, value) = entry
                    .map_err(|e| Error::Storage(format!("Failed to read pattern entry: {e}")))?;
                let record = decode_record(value.value())?;
                if (min_length..=max_length).contains(&record.length) {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {e}")))?
    }

    async fn clear_kb(&self, kb_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let (start, end) = kb_range(kb_id);

        tokio::task::spawn_blocking(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::Storage(format!("Failed to begin write transaction: {e}")))?;
            {
                let mut table = write_txn
                    .open_table(PATTERNS_TABLE)
                    .map_err(|e| Error::Storage(format!("Failed to open patterns table: {e}")))?;

                let keys: Vec<String> = {
                    let range = table
                        .range::<&str>(start.as_str()..end.as_str())
                        .map_err(|e| Error::Storage(format!("Failed to scan patterns: {e}")))?;
                    range
                        .map(|entry| {
                            entry
                                .map(|(key, _)| key.value().to_string())
                                .map_err(|e| {
                                    Error::Storage(format!("Failed to read pattern entry: {e}"))
                                })
                        })
                        .collect::<Result<_>>()?
                };
                for key in keys {
                    table
                        .remove(key.as_str())
                        .map_err(|e| Error::Storage(format!("Failed to remove pattern: {e}")))?;
                }
            }
            write_txn
                .commit()
                .map_err(|e| Error::Storage(format!("Failed to commit transaction: {e}")))?;
            Ok::<_, Error>(())
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {e}")))??;

        self.cache_clear();
        Ok(())
    }
}
