//! Typed adapter over the pluggable vector index
//!
//! The client owns the per-kb dimension contract, the retry policy
//! for retriable backend failures, and the nearest-neighbor
//! substitution step of `observe`: vectors whose similarity to an
//! already-stored synthetic symbol clears the configured threshold
//! collapse onto that symbol, so repeated near-identical vectors
//! produce one stable symbol per kb.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hashing;
use crate::retry::{RetryConfig, RetryMetrics, RetryPolicy};
use crate::storage::VectorIndex;
use crate::types::Deadline;

pub struct VectorIndexClient {
    index: Arc<dyn VectorIndex>,
    /// Fixed dimension per kb, detected at first upsert unless configured
    dimensions: RwLock<HashMap<String, usize>>,
    configured_dimension: Option<usize>,
    retry: RetryConfig,
    retry_metrics: Arc<RetryMetrics>,
    call_timeout: Option<Duration>,
}

impl VectorIndexClient {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        configured_dimension: Option<usize>,
        retry: RetryConfig,
        retry_metrics: Arc<RetryMetrics>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            index,
            dimensions: RwLock::new(HashMap::new()),
            configured_dimension,
            retry,
            retry_metrics,
            call_timeout,
        }
    }

    fn retry_policy(&self, deadline: Deadline) -> RetryPolicy {
        RetryPolicy::with_config(self.retry.clone())
            .with_metrics(Arc::clone(&self.retry_metrics))
            .with_deadline(deadline)
    }

    fn enforce_dimension(&self, kb_id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::invalid_input("vector has zero length"));
        }
        if let Some(expected) = self.configured_dimension {
            if vector.len() != expected {
                return Err(Error::invalid_input_with(
                    "vector dimension mismatch",
                    [
                        ("expected".to_string(), expected.to_string()),
                        ("actual".to_string(), vector.len().to_string()),
                        ("kb_id".to_string(), kb_id.to_string()),
                    ],
                ));
            }
            return Ok(());
        }
        let mut dimensions = self.dimensions.write();
        match dimensions.get(kb_id) {
            Some(&expected) if expected != vector.len() => Err(Error::invalid_input_with(
                "vector dimension mismatch",
                [
                    ("expected".to_string(), expected.to_string()),
                    ("actual".to_string(), vector.len().to_string()),
                    ("kb_id".to_string(), kb_id.to_string()),
                ],
            )),
            Some(_) => Ok(()),
            None => {
                dimensions.insert(kb_id.to_string(), vector.len());
                Ok(())
            }
        }
    }

    /// Bound a backend call by the per-call timeout and the operation
    /// deadline. A per-call timeout reads as a retriable backend
    /// failure; an exhausted deadline is terminal.
    async fn bounded<T, F>(
        &self,
        deadline: Deadline,
        operation: &'static str,
        future: F,
    ) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        deadline.check(operation)?;
        let limit = match (self.call_timeout, deadline.remaining()) {
            (Some(call), Some(left)) => Some(call.min(left)),
            (Some(call), None) => Some(call),
            (None, left) => left,
        };
        match limit {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) if deadline.is_expired() => Err(Error::DeadlineExceeded { operation }),
                Err(_) => Err(Error::VectorBackend {
                    retriable: true,
                    message: format!("{operation} timed out after {limit:?}"),
                }),
            },
            None => future.await,
        }
    }

    /// Resolve one observation's vectors into synthetic symbols.
    ///
    /// Each vector is searched for `knn` nearest existing symbols
    /// first; a neighbor at or above `similarity_threshold` replaces
    /// the freshly hashed symbol. The vector itself is always
    /// upserted under its own hash, which is idempotent for
    /// byte-identical inputs.
    pub async fn resolve_symbols(
        &self,
        kb_id: &str,
        vectors: &[Vec<f32>],
        knn: usize,
        similarity_threshold: f32,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        let mut symbols = Vec::with_capacity(vectors.len());
        for vector in vectors {
            self.enforce_dimension(kb_id, vector)?;
            let own_symbol = hashing::vector_symbol(vector)?;

            let neighbors = self
                .bounded(deadline, "vector_search", async {
                    self.retry_policy(deadline)
                        .execute(|| self.index.search(kb_id, vector, knn))
                        .await
                })
                .await?;

            let substituted = neighbors
                .into_iter()
                .find(|(symbol, score)| *symbol != own_symbol && *score >= similarity_threshold)
                .map(|(symbol, score)| {
                    debug!(
                        own = %own_symbol,
                        substituted = %symbol,
                        score,
                        "collapsed vector onto existing synthetic symbol"
                    );
                    symbol
                });

            self.bounded(deadline, "vector_upsert", async {
                self.retry_policy(deadline)
                    .execute(|| self.index.upsert(kb_id, &own_symbol, vector))
                    .await
            })
            .await?;

            symbols.push(substituted.unwrap_or(own_symbol));
        }
        Ok(symbols)
    }

    /// Drop the kb's collection (part of `clear_all`)
    pub async fn drop_collection(&self, kb_id: &str, deadline: Deadline) -> Result<()> {
        self.dimensions.write().remove(kb_id);
        self.bounded(deadline, "vector_drop_collection", async {
            self.retry_policy(deadline)
                .execute(|| self.index.drop_collection(kb_id))
                .await
        })
        .await
    }
}
