use futures::future::join_all;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::VerdictStore;
use crate::classifier::Classifier;
use crate::error::{BLANK_URI, EMPTY_URI_LIST, FilterError};
use crate::policy::VerdictPolicy;
use crate::types::Verdict;

/// Resolves a batch of image URIs to verdicts, serving what it can from the
/// verdict store and classifying the rest in a single classifier call.
pub struct BatchFilter {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn VerdictStore>,
    policy: VerdictPolicy,
}

impl BatchFilter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn VerdictStore>,
        policy: VerdictPolicy,
    ) -> Self {
        Self {
            classifier,
            store,
            policy,
        }
    }

    /// Returns one verdict per input URI, in input order, duplicates included.
    ///
    /// Classification is all-or-nothing: if any uncached URI cannot be fetched
    /// or classified, the whole batch fails and nothing is written back.
    #[tracing::instrument(
        skip(self, uris, cancel),
        fields(batch_id = %uuid::Uuid::new_v4().simple(), input_count = uris.len())
    )]
    pub async fn filter(
        &self,
        uris: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Verdict>, FilterError> {
        if uris.is_empty() {
            return Err(FilterError::InvalidRequest(EMPTY_URI_LIST.to_string()));
        }
        if uris.iter().any(|uri| uri.trim().is_empty()) {
            return Err(FilterError::InvalidRequest(BLANK_URI.to_string()));
        }

        let batch_start = Instant::now();
        let distinct = distinct_in_order(uris);
        tracing::debug!(distinct_count = distinct.len(), "Looking up cached verdicts");

        let lookups = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(canceled("cache lookup")),
            lookups = join_all(distinct.iter().map(|uri| self.lookup(uri))) => lookups,
        };

        let mut verdicts: HashMap<&str, bool> = HashMap::with_capacity(distinct.len());
        let mut uncached = Vec::new();
        for (&uri, cached) in distinct.iter().zip(lookups) {
            match cached {
                Some(verdict) => {
                    verdicts.insert(uri, verdict.pass);
                }
                None => uncached.push(uri.to_string()),
            }
        }

        counter!("filter_cache_hits_total").increment(verdicts.len() as u64);
        counter!("filter_cache_misses_total").increment(uncached.len() as u64);
        tracing::debug!(
            cached = verdicts.len(),
            uncached = uncached.len(),
            "Cache lookup complete"
        );

        let fresh = if uncached.is_empty() {
            Vec::new()
        } else {
            self.classify(&uncached, cancel).await?
        };

        if !fresh.is_empty() {
            if cancel.is_cancelled() {
                return Err(canceled("write-back"));
            }
            self.write_back(&fresh).await;
        }

        for verdict in &fresh {
            verdicts.insert(&verdict.uri, verdict.pass);
        }

        let response = uris
            .iter()
            .map(|uri| {
                verdicts
                    .get(uri.as_str())
                    .map(|&pass| Verdict {
                        uri: uri.clone(),
                        pass,
                    })
                    .ok_or_else(|| {
                        FilterError::ClassificationFailed(format!("no verdict resolved for {uri}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            processing_time_ms = batch_start.elapsed().as_millis(),
            classified = fresh.len(),
            "Batch filtered"
        );
        Ok(response)
    }

    /// Drops the cached verdict for `uri`; the next batch containing it is
    /// classified again.
    #[tracing::instrument(skip(self))]
    pub async fn evict(&self, uri: &str) -> Result<(), FilterError> {
        self.store.delete(uri).await?;
        tracing::info!("Cached verdict evicted");
        Ok(())
    }

    /// Read failures count as misses so the batch can still be served.
    async fn lookup(&self, uri: &str) -> Option<Verdict> {
        match self.store.get(uri).await {
            Ok(verdict) => verdict,
            Err(err) => {
                counter!("filter_cache_read_failures_total").increment(1);
                tracing::warn!(uri, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn classify(
        &self,
        uncached: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Verdict>, FilterError> {
        counter!("filter_classifier_calls_total").increment(1);
        tracing::debug!(input_count = uncached.len(), "Calling classifier");

        let annotations = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(canceled("classification")),
            result = self.classifier.classify(uncached) => result.map_err(|err| {
                tracing::error!(error = %err, "Classifier call failed");
                FilterError::from(err)
            })?,
        };

        uncached
            .iter()
            .map(|uri| {
                annotations
                    .get(uri)
                    .map(|annotation| Verdict {
                        uri: uri.clone(),
                        pass: self.policy.evaluate(annotation),
                    })
                    .ok_or_else(|| {
                        FilterError::ClassificationFailed(format!(
                            "classifier returned no annotation for {uri}"
                        ))
                    })
            })
            .collect()
    }

    /// Once started, write-back runs to completion on its own task, even if
    /// the batch future is dropped. Write failures are logged and otherwise
    /// ignored; the caller still gets the verdicts.
    async fn write_back(&self, fresh: &[Verdict]) {
        let store = self.store.clone();
        let fresh = fresh.to_vec();
        let task = tokio::spawn(async move {
            let writes = join_all(fresh.iter().map(|verdict| store.put(verdict))).await;
            for (verdict, result) in fresh.iter().zip(writes) {
                if let Err(err) = result {
                    counter!("filter_cache_write_failures_total").increment(1);
                    tracing::warn!(uri = %verdict.uri, error = %err, "Cache write failed");
                }
            }
        });
        if let Err(err) = task.await {
            tracing::error!(error = %err, "Cache write-back task failed");
        }
    }
}

fn canceled(stage: &str) -> FilterError {
    counter!("filter_canceled_total").increment(1);
    tracing::warn!(stage, "Batch canceled");
    FilterError::Canceled
}

fn distinct_in_order(uris: &[String]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(uris.len());
    uris.iter()
        .map(String::as_str)
        .filter(|uri| seen.insert(*uri))
        .collect()
}
