//! Batch image uploads with bounded concurrency and per-asset retries.
//!
//! Inputs that are already remote pass straight through. Everything else is split
//! into chunks of `max_concurrent`; each chunk's uploads run together and the chunk
//! settles completely before the next one starts. A failed asset is recorded, never
//! raised, so every asset that needed uploading ends up in exactly one of
//! `uploaded_urls` or `failed_uploads`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::uploads::{
    BatchProgress, BatchUploadResult, DataUri, ResolvedDestination, UploadDestination, UploadTask,
};
use crate::error::ServiceError;
use crate::services::notifications::{Notifier, UploadNotification};
use crate::services::retry::{with_retry, with_retry_counted, RetryPolicy};
use crate::services::storage::AssetStore;

pub type ProgressCallback<'a> = &'a (dyn Fn(&BatchProgress) + Send + Sync);
pub type ChunkCompleteCallback<'a> = &'a (dyn Fn(&BatchUploadResult) + Send + Sync);

/// Per-call overrides; unset values fall back to the manager's defaults.
#[derive(Clone, Copy, Default)]
pub struct BatchOptions<'a> {
    pub max_concurrent: Option<usize>,
    pub chunk_delay: Option<Duration>,
    /// Called after each chunk settles.
    pub on_progress: Option<ProgressCallback<'a>>,
    /// Called after each chunk settles with that chunk's own results.
    pub on_batch_complete: Option<ChunkCompleteCallback<'a>>,
}

pub struct BatchUploadManager<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    asset_policy: RetryPolicy,
    single_policy: RetryPolicy,
    max_concurrent: usize,
    chunk_delay: Duration,
}

impl<S: AssetStore> BatchUploadManager<S> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        max_concurrent: usize,
        chunk_delay: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            asset_policy: RetryPolicy::batch(),
            single_policy: RetryPolicy::storage(),
            max_concurrent: max_concurrent.max(1),
            chunk_delay,
        }
    }

    /// Replace the per-asset batch policy and the single-operation storage policy.
    pub fn with_policies(mut self, batch: RetryPolicy, single: RetryPolicy) -> Self {
        self.asset_policy = batch;
        self.single_policy = single;
        self
    }

    /// Upload one image outside a batch, under the storage policy.
    #[instrument(skip(self, data_uri))]
    pub async fn upload_image(
        &self,
        data_uri: &str,
        destination: &UploadDestination,
    ) -> Result<String, ServiceError> {
        let resolved = ResolvedDestination::resolve(destination)?;
        let image = DataUri::parse(data_uri)?;
        let path = resolved.object_path(&object_name(&image));
        let (store, path, mime) = (&*self.store, path.as_str(), image.mime_type.as_str());

        with_retry(
            || store.upload(path, image.bytes.clone(), mime),
            &self.single_policy,
            None,
        )
        .await
    }

    /// Delete a stored image under the storage policy.
    #[instrument(skip(self))]
    pub async fn delete_image(&self, path: &str) -> Result<(), ServiceError> {
        if path.trim().is_empty() {
            return Err(ServiceError::validation("Image path is required"));
        }
        let store = &*self.store;
        with_retry(|| store.delete(path), &self.single_policy, None).await
    }

    #[instrument(skip_all, fields(assets = assets.len(), report_id = %destination.report_id))]
    pub async fn upload_multiple_images(
        &self,
        assets: Vec<String>,
        destination: &UploadDestination,
        options: BatchOptions<'_>,
    ) -> BatchUploadResult {
        let (pending, passthrough): (Vec<String>, Vec<String>) =
            assets.into_iter().partition(|a| DataUri::is_data_uri(a));

        if pending.is_empty() {
            debug!("Nothing to upload; all assets already remote");
            return BatchUploadResult {
                uploaded_urls: passthrough,
                ..Default::default()
            };
        }

        let resolved = match ResolvedDestination::resolve(destination) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(error = %e, "Could not resolve upload destination; returning assets unchanged");
                let result = BatchUploadResult {
                    uploaded_urls: passthrough,
                    failed_uploads: pending,
                    total_failure: true,
                    ..Default::default()
                };
                if let Some(n) = UploadNotification::for_batch(&result, 0) {
                    self.notifier.notify(&n);
                }
                return result;
            }
        };

        let chunk_size = options.max_concurrent.unwrap_or(self.max_concurrent).max(1);
        let chunk_delay = options.chunk_delay.unwrap_or(self.chunk_delay);
        let tasks: Vec<UploadTask> = pending
            .into_iter()
            .enumerate()
            .map(|(index, data_uri)| UploadTask { index, data_uri })
            .collect();
        let total = tasks.len();
        let chunk_count = total.div_ceil(chunk_size);

        let mut uploaded = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut total_attempts = 0;
        let mut total_retries = 0;

        for (chunk_index, chunk) in tasks.chunks(chunk_size).enumerate() {
            let mut chunk_result = BatchUploadResult::default();

            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(|task| self.upload_task(task, &resolved))
                .collect();

            // Completion order, not input order
            while let Some((task, outcome, attempts)) = in_flight.next().await {
                chunk_result.total_attempts += attempts;
                chunk_result.total_retries += attempts.saturating_sub(1);
                match outcome {
                    Ok(url) => chunk_result.uploaded_urls.push(url),
                    Err(e) => {
                        warn!(index = task.index, attempts, error = %e, "Image upload failed");
                        chunk_result.failed_uploads.push(task.data_uri.clone());
                    }
                }
            }

            total_attempts += chunk_result.total_attempts;
            total_retries += chunk_result.total_retries;
            uploaded.extend(chunk_result.uploaded_urls.iter().cloned());
            failed.extend(chunk_result.failed_uploads.iter().cloned());

            if let Some(cb) = options.on_progress {
                cb(&BatchProgress {
                    completed: uploaded.len() + failed.len(),
                    total,
                    succeeded: uploaded.len(),
                    failed: failed.len(),
                    chunk_index,
                    chunk_count,
                });
            }
            if let Some(cb) = options.on_batch_complete {
                cb(&chunk_result);
            }

            if chunk_index + 1 < chunk_count && !chunk_delay.is_zero() {
                tokio::time::sleep(chunk_delay).await;
            }
        }

        let newly_uploaded = uploaded.len();
        let mut uploaded_urls = passthrough;
        uploaded_urls.extend(uploaded);

        let result = BatchUploadResult {
            uploaded_urls,
            failed_uploads: failed,
            total_attempts,
            total_retries,
            total_failure: false,
        };

        info!(
            uploaded = newly_uploaded,
            failed = result.failed_uploads.len(),
            attempts = total_attempts,
            retries = total_retries,
            "Batch upload finished"
        );
        if let Some(n) = UploadNotification::for_batch(&result, newly_uploaded) {
            self.notifier.notify(&n);
        }

        result
    }

    /// Flattened variant kept for older callers: successes followed by the originals
    /// that could not be stored, or the input unchanged when the batch could not start.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_multiple_report_images(
        &self,
        image_urls: Vec<String>,
        report_id: &str,
        room_id: &str,
        property_name: Option<String>,
        room_name: Option<String>,
        component_name: Option<String>,
        options: BatchOptions<'_>,
    ) -> Vec<String> {
        let destination = UploadDestination {
            report_id: report_id.to_string(),
            room_id: room_id.to_string(),
            property_name,
            room_name,
            component_name,
        };

        let originals = image_urls.clone();
        let result = self
            .upload_multiple_images(image_urls, &destination, options)
            .await;
        if result.total_failure {
            originals
        } else {
            result.into_flat_list()
        }
    }

    /// One asset under the batch policy. Returns how many attempts were made.
    async fn upload_task<'t>(
        &self,
        task: &'t UploadTask,
        destination: &ResolvedDestination,
    ) -> (&'t UploadTask, Result<String, ServiceError>, u32) {
        let image = match DataUri::parse(&task.data_uri) {
            Ok(image) => image,
            // Never reached the store
            Err(e) => return (task, Err(e), 0),
        };
        let path = destination.object_path(&object_name(&image));
        let (store, path, mime) = (&*self.store, path.as_str(), image.mime_type.as_str());

        let (outcome, attempts) = with_retry_counted(
            || store.upload(path, image.bytes.clone(), mime),
            &self.asset_policy,
            None,
        )
        .await;
        (task, outcome, attempts)
    }
}

/// Unique object name, stable across retries of the same asset.
fn object_name(image: &DataUri) -> String {
    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        image.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;

    const A: &str = "data:image/png;base64,AAAA";
    const B: &str = "data:image/png;base64,BBBB";
    const C: &str = "data:image/jpeg;base64,CCCC";
    const REMOTE: &str = "https://cdn.example.com/existing.jpg";

    /// Fails uploads whose payload is listed, `n` times or forever.
    #[derive(Default)]
    struct MockStore {
        failures: Mutex<HashMap<Vec<u8>, Option<u32>>>,
        calls: Mutex<Vec<String>>,
        /// Uploads answered with an unclassified "SlowDown" error before succeeding.
        throttled: AtomicU32,
        latency: Option<Duration>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockStore {
        fn slow(latency: Duration) -> Self {
            Self {
                latency: Some(latency),
                ..Default::default()
            }
        }

        fn throttling(times: u32) -> Self {
            let store = Self::default();
            store.throttled.store(times, Ordering::SeqCst);
            store
        }

        fn failing(uri: &str, times: Option<u32>) -> Self {
            let store = Self::default();
            store.fail(uri, times);
            store
        }

        fn fail(&self, uri: &str, times: Option<u32>) {
            let bytes = DataUri::parse(uri).unwrap().bytes;
            self.failures.lock().insert(bytes, times);
        }
    }

    impl AssetStore for MockStore {
        async fn upload(
            &self,
            path: &str,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<String, ServiceError> {
            if let Some(latency) = self.latency {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(latency).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            self.calls.lock().push(path.to_string());
            if self
                .throttled
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ServiceError::new(
                    ErrorKind::Internal,
                    "SlowDown: please reduce your request rate",
                ));
            }
            let mut failures = self.failures.lock();
            match failures.get_mut(&bytes) {
                Some(None) => {
                    return Err(ServiceError::new(ErrorKind::ServerUnavailable, "503 from store"))
                }
                Some(Some(n)) if *n > 0 => {
                    *n -= 1;
                    return Err(ServiceError::new(ErrorKind::Network, "network error"));
                }
                _ => {}
            }
            Ok(format!("https://store.test/{}", path))
        }

        async fn delete(&self, _path: &str) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<UploadNotification>>);

    impl Notifier for RecordingNotifier {
        fn notify(&self, n: &UploadNotification) {
            self.0.lock().push(n.clone());
        }
    }

    fn destination() -> UploadDestination {
        UploadDestination {
            report_id: "r1".to_string(),
            room_id: "k2".to_string(),
            property_name: Some("12 High St".to_string()),
            room_name: Some("Kitchen".to_string()),
            component_name: None,
        }
    }

    fn manager(
        store: MockStore,
    ) -> (BatchUploadManager<MockStore>, Arc<MockStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = BatchUploadManager::new(
            store.clone(),
            notifier.clone(),
            2,
            Duration::from_millis(500),
        );
        (manager, store, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_asset_is_recorded_not_raised() {
        let (manager, store, notifier) = manager(MockStore::failing(B, None));
        let progress = Mutex::new(Vec::new());
        let on_progress = |p: &BatchProgress| progress.lock().push(p.clone());

        let result = manager
            .upload_multiple_images(
                vec![A.to_string(), B.to_string(), C.to_string()],
                &destination(),
                BatchOptions {
                    max_concurrent: Some(2),
                    on_progress: Some(&on_progress),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(result.uploaded_urls.len(), 2);
        assert_eq!(result.failed_uploads, vec![B.to_string()]);
        assert!(result.total_attempts >= 3);
        // B was tried twice under the batch policy
        assert_eq!(result.total_attempts, 4);
        assert_eq!(result.total_retries, 1);
        assert!(!result.total_failure);
        assert!(result
            .uploaded_urls
            .iter()
            .all(|u| u.starts_with("https://store.test/12-high-st/kitchen/")));

        let progress = progress.lock();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].completed, 2);
        assert_eq!(progress[1].completed, 3);
        assert_eq!(progress[1].chunk_count, 2);

        assert_eq!(store.calls.lock().len(), 4);
        let notes = notifier.0.lock();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].succeeded, 2);
        assert_eq!(notes[0].failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_into_success() {
        let (manager, _store, _) = manager(MockStore::failing(A, Some(1)));
        let result = manager
            .upload_multiple_images(vec![A.to_string()], &destination(), BatchOptions::default())
            .await;

        assert_eq!(result.uploaded_urls.len(), 1);
        assert!(result.failed_uploads.is_empty());
        assert_eq!(result.total_attempts, 2);
        assert_eq!(result.total_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_assets_pass_through() {
        let (manager, store, notifier) = manager(MockStore::default());

        let only_remote = manager
            .upload_multiple_images(vec![REMOTE.to_string()], &destination(), BatchOptions::default())
            .await;
        assert_eq!(only_remote.uploaded_urls, vec![REMOTE.to_string()]);
        assert_eq!(only_remote.total_attempts, 0);
        assert!(store.calls.lock().is_empty());
        assert!(notifier.0.lock().is_empty());

        let mixed = manager
            .upload_multiple_images(
                vec![A.to_string(), REMOTE.to_string()],
                &destination(),
                BatchOptions::default(),
            )
            .await;
        assert_eq!(mixed.uploaded_urls[0], REMOTE);
        assert_eq!(mixed.uploaded_urls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_destination_returns_inputs() {
        let (manager, store, notifier) = manager(MockStore::default());
        let inputs = vec![A.to_string(), REMOTE.to_string(), B.to_string()];

        let flat = manager
            .upload_multiple_report_images(
                inputs.clone(),
                "",
                "k2",
                None,
                None,
                None,
                BatchOptions::default(),
            )
            .await;
        assert_eq!(flat, inputs);
        assert!(store.calls.lock().is_empty());

        let result = manager
            .upload_multiple_images(
                inputs,
                &UploadDestination::default(),
                BatchOptions::default(),
            )
            .await;
        assert!(result.total_failure);
        assert_eq!(result.failed_uploads, vec![A.to_string(), B.to_string()]);
        assert_eq!(notifier.0.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_data_uri_fails_without_store_call() {
        let (manager, store, _) = manager(MockStore::default());
        let bad = "data:image/png;base64,***";
        let result = manager
            .upload_multiple_images(
                vec![bad.to_string(), A.to_string()],
                &destination(),
                BatchOptions::default(),
            )
            .await;

        assert_eq!(result.failed_uploads, vec![bad.to_string()]);
        assert_eq!(result.uploaded_urls.len(), 1);
        assert_eq!(store.calls.lock().len(), 1);
        // Only A reached the store
        assert_eq!(result.total_attempts, 1);
        assert_eq!(result.total_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_callback_gets_each_chunks_own_results() {
        let (manager, _store, _) = manager(MockStore::failing(B, None));
        let chunks = Mutex::new(Vec::new());
        let on_chunk = |r: &BatchUploadResult| chunks.lock().push(r.clone());

        manager
            .upload_multiple_images(
                vec![A.to_string(), B.to_string(), C.to_string()],
                &destination(),
                BatchOptions {
                    max_concurrent: Some(2),
                    on_batch_complete: Some(&on_chunk),
                    ..Default::default()
                },
            )
            .await;

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].uploaded_urls.len(), 1);
        assert_eq!(chunks[0].failed_uploads, vec![B.to_string()]);
        assert_eq!(chunks[0].total_attempts, 3);
        assert_eq!(chunks[1].uploaded_urls.len(), 1);
        assert!(chunks[1].failed_uploads.is_empty());
        assert_eq!(chunks[1].total_attempts, 1);
        assert!(chunks.iter().all(|c| !c.total_failure));
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_chunks_but_not_after_the_last() {
        let inputs: Vec<String> = (0u8..5)
            .map(|i| format!("data:image/png;base64,{}", base64_of(&[i])))
            .collect();
        let (manager, _store, _) = manager(MockStore::default());

        // Three chunks of at most two: two pauses of the 500ms default
        let start = Instant::now();
        manager
            .upload_multiple_images(inputs.clone(), &destination(), BatchOptions::default())
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        let start = Instant::now();
        manager
            .upload_multiple_images(
                inputs[..4].to_vec(),
                &destination(),
                BatchOptions {
                    chunk_delay: Some(Duration::from_millis(250)),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(250));

        let start = Instant::now();
        manager
            .upload_multiple_images(inputs[..2].to_vec(), &destination(), BatchOptions::default())
            .await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_uploads_never_exceed_chunk_size() {
        let inputs: Vec<String> = (0u8..7)
            .map(|i| format!("data:image/png;base64,{}", base64_of(&[i, 7])))
            .collect();
        let (manager, store, _) = manager(MockStore::slow(Duration::from_millis(100)));

        let start = Instant::now();
        let result = manager
            .upload_multiple_images(
                inputs,
                &destination(),
                BatchOptions {
                    max_concurrent: Some(3),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(result.uploaded_urls.len(), 7);
        assert_eq!(store.peak_in_flight.load(Ordering::SeqCst), 3);
        // Chunks of 3, 3 and 1 each take one round trip, with two pauses between them
        assert_eq!(start.elapsed(), Duration::from_millis(3 * 100 + 2 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn extra_retry_patterns_apply_to_batch_uploads() {
        let (defaults, store, _) = manager(MockStore::throttling(1));
        let result = defaults
            .upload_multiple_images(vec![A.to_string()], &destination(), BatchOptions::default())
            .await;
        assert_eq!(result.failed_uploads, vec![A.to_string()]);
        assert_eq!(result.total_attempts, 1);
        assert_eq!(store.calls.lock().len(), 1);

        let (tuned, store, _) = manager(MockStore::throttling(1));
        let tuned = tuned.with_policies(
            RetryPolicy::batch().with_extra_patterns(["slowdown"]),
            RetryPolicy::storage(),
        );
        let result = tuned
            .upload_multiple_images(vec![A.to_string()], &destination(), BatchOptions::default())
            .await;
        assert!(result.failed_uploads.is_empty());
        assert_eq!(result.total_attempts, 2);
        assert_eq!(result.total_retries, 1);
        assert_eq!(store.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_asset_is_lost_for_any_failure_pattern() {
        let inputs: Vec<String> = (0u8..5)
            .map(|i| format!("data:image/png;base64,{}", base64_of(&[i, i, i])))
            .collect();

        for mask in 0u32..32 {
            let store = MockStore::default();
            for (i, uri) in inputs.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    store.fail(uri, None);
                }
            }
            let (manager, _, _) = manager(store);
            let result = manager
                .upload_multiple_images(
                    inputs.clone(),
                    &destination(),
                    BatchOptions {
                        max_concurrent: Some(2),
                        ..Default::default()
                    },
                )
                .await;

            assert_eq!(
                result.uploaded_urls.len() + result.failed_uploads.len(),
                inputs.len(),
                "mask {:05b}",
                mask
            );
            assert_eq!(result.failed_uploads.len(), mask.count_ones() as usize);
            assert!(result.failed_uploads.iter().all(|f| inputs.contains(f)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_image_operations_use_storage_policy() {
        let (manager, store, _) = manager(MockStore::failing(C, Some(2)));
        let url = manager.upload_image(C, &destination()).await.unwrap();
        assert!(url.ends_with(".jpg"));
        assert_eq!(store.calls.lock().len(), 3);

        let err = manager.delete_image("  ").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        manager.delete_image("a/b.jpg").await.unwrap();
    }

    fn base64_of(bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }
}
