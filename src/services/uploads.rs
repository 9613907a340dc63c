//! Fan-out of multipart file parts into concurrent storage transfers, and the
//! fan-in barrier that releases the request only when all of them succeeded.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::ApiError,
    models::upload::{Destination, FormFields, PendingUpload, UploadMap, UploadResult},
    services::{
        multipart::{DecodeError, DecodeEvent, FilePart, MultipartDecoder},
        storage::{ByteStream, ObjectStorage, StorageError, StorageResult},
    },
};

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Top-level folder all destinations live under.
    pub root_folder: String,
    /// Upper bound for a single transfer; `None` waits forever.
    pub transfer_timeout: Option<Duration>,
    /// Chunks buffered between the decoder and a transfer.
    pub channel_capacity: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            root_folder: "vidtube".to_string(),
            transfer_timeout: Some(Duration::from_secs(600)),
            channel_capacity: 8,
        }
    }
}

/// Scalar fields plus fully resolved uploads of one request.
#[derive(Debug, Default)]
pub struct ProcessedForm {
    pub fields: FormFields,
    pub uploads: UploadMap,
}

type TransferOutcome = (PendingUpload, StorageResult<UploadResult>);

pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn ObjectStorage>, settings: UploadSettings) -> Self {
        Self { storage, settings }
    }

    pub fn destination_for(&self, field_name: &str) -> Destination {
        Destination::for_field(&self.settings.root_folder, field_name)
    }

    /// Drain the decoder, streaming every file part into its own transfer, then
    /// wait for all transfers. Either every part is uploaded or the request
    /// fails and whatever did get stored is deleted again.
    pub async fn process(&self, mut decoder: MultipartDecoder) -> Result<ProcessedForm, ApiError> {
        let mut fields = FormFields::default();
        let mut transfers: JoinSet<TransferOutcome> = JoinSet::new();
        let mut next_index = 0usize;
        let mut abandoned_field: Option<String> = None;

        let decoded = async {
            while let Some(event) = decoder.next_event().await? {
                match event {
                    DecodeEvent::Field { name, value } => fields.insert(name, value),
                    DecodeEvent::File(mut part) => {
                        let pending = PendingUpload {
                            index: next_index,
                            destination: self.destination_for(&part.info().field_name),
                            info: part.info().clone(),
                        };
                        next_index += 1;
                        tracing::debug!(
                            field = %pending.info.field_name,
                            folder = %pending.destination.folder,
                            "starting transfer"
                        );

                        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
                        self.spawn_transfer(&mut transfers, pending, rx);

                        if !pump(&mut part, &tx).await? {
                            // The transfer stopped reading; it has already failed.
                            abandoned_field = Some(part.info().field_name.clone());
                            break;
                        }
                    }
                }
            }
            Ok::<(), DecodeError>(())
        }
        .await;

        if decoded.is_err() {
            transfers.abort_all();
        }

        let (mut completed, mut failure) = join_transfers(&mut transfers).await;

        if let Some(field) = abandoned_field {
            if failure.is_none() {
                failure = Some(ApiError::UploadFailed {
                    field,
                    source: StorageError::UploadFailed("transfer stopped reading the part".into()),
                });
            }
        }

        let failure = match decoded {
            Err(e) => Some(ApiError::from(e)),
            Ok(()) => failure,
        };

        if let Some(err) = failure {
            self.compensate(completed.into_iter().map(|(_, result)| result).collect())
                .await;
            return Err(err);
        }

        completed.sort_by_key(|(pending, _)| pending.index);
        let mut uploads = UploadMap::default();
        for (pending, result) in completed {
            uploads.push(&pending.info.field_name, result);
        }

        tracing::info!(
            files = uploads.len(),
            fields = fields.len(),
            backend = self.storage.backend_name(),
            "multipart upload complete"
        );

        Ok(ProcessedForm { fields, uploads })
    }

    fn spawn_transfer(
        &self,
        transfers: &mut JoinSet<TransferOutcome>,
        pending: PendingUpload,
        rx: mpsc::Receiver<io::Result<Bytes>>,
    ) {
        let storage = Arc::clone(&self.storage);
        let limit = self.settings.transfer_timeout;

        transfers.spawn(async move {
            let body: ByteStream = Box::pin(ReceiverStream::new(rx));
            let upload = storage.create_object(&pending.destination, &pending.info, body);
            let result = match limit {
                Some(limit) => tokio::time::timeout(limit, upload)
                    .await
                    .unwrap_or_else(|_| Err(StorageError::Timeout(limit.as_secs()))),
                None => upload.await,
            };
            (pending, result)
        });
    }

    /// Best-effort delete of objects belonging to a request that failed.
    async fn compensate(&self, stored: Vec<UploadResult>) {
        if stored.is_empty() {
            return;
        }
        let storage = &self.storage;
        let outcomes = join_all(stored.iter().map(|object| storage.delete_object(object))).await;
        for (object, outcome) in stored.iter().zip(outcomes) {
            match outcome {
                Ok(()) => tracing::debug!(public_id = %object.public_id, "removed orphaned upload"),
                Err(e) => tracing::warn!(public_id = %object.public_id, error = %e, "could not remove orphaned upload"),
            }
        }
    }

    /// Delete uploads of a request the business handler rejected.
    pub async fn discard(&self, uploads: &UploadMap) {
        self.compensate(uploads.iter().cloned().collect()).await;
    }

    /// Delete objects a row stopped referencing (deleted video, replaced
    /// thumbnail). Failures are logged only.
    pub async fn release(&self, objects: Vec<UploadResult>) {
        self.compensate(objects).await;
    }
}

/// Forward one part's chunks into its transfer. `Ok(false)` means the
/// transfer dropped its receiver before the part ended.
async fn pump(
    part: &mut FilePart<'_>,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> Result<bool, DecodeError> {
    loop {
        match part.chunk().await {
            Ok(Some(bytes)) => {
                if tx.send(Ok(bytes)).await.is_err() {
                    return Ok(false);
                }
            }
            Ok(None) => return Ok(true),
            Err(e) => {
                let _ = tx.try_send(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    e.to_string(),
                )));
                return Err(e);
            }
        }
    }
}

/// Await every task in the set. The first failure aborts the rest, which are
/// still awaited so no task outlives the request.
async fn join_transfers(
    transfers: &mut JoinSet<TransferOutcome>,
) -> (Vec<(PendingUpload, UploadResult)>, Option<ApiError>) {
    let mut completed = Vec::new();
    let mut failure: Option<ApiError> = None;

    while let Some(joined) = transfers.join_next().await {
        match joined {
            Ok((pending, Ok(result))) => completed.push((pending, result)),
            Ok((pending, Err(source))) => {
                tracing::warn!(
                    field = %pending.info.field_name,
                    file = ?pending.info.file_name,
                    error = %source,
                    "transfer failed"
                );
                if failure.is_none() {
                    failure = Some(ApiError::UploadFailed {
                        field: pending.info.field_name,
                        source,
                    });
                    transfers.abort_all();
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(error = %e, "transfer task panicked");
                if failure.is_none() {
                    failure = Some(ApiError::Internal(format!("transfer task failed: {e}")));
                    transfers.abort_all();
                }
            }
        }
    }

    (completed, failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upload::{ObjectInfo, ResourceType};
    use crate::services::multipart::testing::{body, multipart, Part};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    #[derive(Default)]
    struct FakeStorage {
        fail_field: Option<&'static str>,
        barrier: Option<Barrier>,
        hang: bool,
        created: Mutex<Vec<UploadResult>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn create_object(
            &self,
            destination: &Destination,
            info: &ObjectInfo,
            mut body: ByteStream,
        ) -> StorageResult<UploadResult> {
            let mut data = Vec::new();
            while let Some(chunk) = body.next().await {
                data.extend_from_slice(&chunk.map_err(|e| StorageError::Source(e.to_string()))?);
            }
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_field == Some(info.field_name.as_str()) {
                return Err(StorageError::UploadFailed("backend said no".into()));
            }
            let content = String::from_utf8_lossy(&data).to_string();
            let result = UploadResult {
                secure_url: format!("mem://{}/{}", destination.folder, content),
                public_id: content,
                resource_type: destination.resource_type,
                bytes: data.len() as u64,
                format: None,
                original_filename: info.file_name.clone(),
                content_type: info.content_type.clone(),
            };
            self.created.lock().unwrap().push(result.clone());
            Ok(result)
        }

        async fn delete_object(&self, object: &UploadResult) -> StorageResult<()> {
            self.deleted.lock().unwrap().push(object.public_id.clone());
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "fake"
        }
    }

    fn orchestrator(storage: Arc<FakeStorage>) -> UploadOrchestrator {
        UploadOrchestrator::new(storage, UploadSettings::default())
    }

    fn three_parts() -> Vec<u8> {
        body(&[
            Part::Text("title", "demo"),
            Part::File("thumbnail", "t1.png", "image/png", b"thumb-one"),
            Part::File("video", "v.mp4", "video/mp4", b"the-video"),
            Part::File("thumbnail", "t2.png", "image/png", b"thumb-two"),
        ])
    }

    #[tokio::test]
    async fn every_part_yields_one_result_in_part_order() {
        let storage = Arc::new(FakeStorage {
            barrier: Some(Barrier::new(3)),
            ..Default::default()
        });
        let orch = orchestrator(storage.clone());
        let decoder = MultipartDecoder::new(multipart(three_parts()).await);

        // Every transfer waits for the other two, so this only finishes if all
        // three are in flight at the same time.
        let form = tokio::time::timeout(Duration::from_secs(5), orch.process(decoder))
            .await
            .expect("transfers were not concurrent")
            .unwrap();

        assert_eq!(form.fields.get("title"), Some("demo"));
        assert_eq!(form.uploads.len(), 3);
        assert_eq!(form.uploads.fields().collect::<Vec<_>>(), vec!["thumbnail", "video"]);

        let thumbs: Vec<_> = form.uploads.get("thumbnail").iter().map(|r| r.public_id.as_str()).collect();
        assert_eq!(thumbs, vec!["thumb-one", "thumb-two"]);
        let video = form.uploads.first("video").unwrap();
        assert_eq!(video.public_id, "the-video");
        assert_eq!(video.resource_type, ResourceType::Video);
        assert!(video.secure_url.starts_with("mem://vidtube/videos/"));
        assert!(storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failed_transfer_fails_the_request_and_cleans_up() {
        let storage = Arc::new(FakeStorage {
            fail_field: Some("video"),
            ..Default::default()
        });
        let orch = orchestrator(storage.clone());
        let decoder = MultipartDecoder::new(multipart(three_parts()).await);

        let err = orch.process(decoder).await.unwrap_err();
        match err {
            ApiError::UploadFailed { field, source } => {
                assert_eq!(field, "video");
                assert!(matches!(source, StorageError::UploadFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let mut created: Vec<_> = storage.created.lock().unwrap().iter().map(|r| r.public_id.clone()).collect();
        let mut deleted = storage.deleted.lock().unwrap().clone();
        created.sort();
        deleted.sort();
        assert_eq!(created, deleted);
    }

    #[tokio::test]
    async fn fields_without_files_pass_through() {
        let storage = Arc::new(FakeStorage::default());
        let orch = orchestrator(storage.clone());
        let raw = body(&[Part::Text("name", "first"), Part::Text("name", "second")]);

        let form = orch.process(MultipartDecoder::new(multipart(raw).await)).await.unwrap();
        assert!(form.uploads.is_empty());
        assert_eq!(form.fields.get("name"), Some("second"));
        assert!(storage.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_body_is_bad_request() {
        let storage = Arc::new(FakeStorage::default());
        let orch = orchestrator(storage.clone());
        let mut raw = body(&[
            Part::File("thumbnail", "t.png", "image/png", b"complete"),
            Part::File("video", "v.mp4", "video/mp4", &[b'x'; 8192]),
        ]);
        raw.truncate(raw.len() - 4000);

        let err = orch.process(MultipartDecoder::new(multipart(raw).await)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let created: Vec<_> = storage.created.lock().unwrap().iter().map(|r| r.public_id.clone()).collect();
        let deleted = storage.deleted.lock().unwrap().clone();
        assert_eq!(created.len(), deleted.len());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_transfer_times_out() {
        let storage = Arc::new(FakeStorage {
            hang: true,
            ..Default::default()
        });
        let orch = UploadOrchestrator::new(
            storage,
            UploadSettings {
                transfer_timeout: Some(Duration::from_secs(30)),
                ..UploadSettings::default()
            },
        );
        let raw = body(&[Part::File("banner", "b.jpg", "image/jpeg", b"banner")]);

        let err = orch.process(MultipartDecoder::new(multipart(raw).await)).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::UploadFailed { source: StorageError::Timeout(30), .. }
        ));
    }

    #[tokio::test]
    async fn discard_deletes_every_result() {
        let storage = Arc::new(FakeStorage::default());
        let orch = orchestrator(storage.clone());
        let form = orch
            .process(MultipartDecoder::new(multipart(three_parts()).await))
            .await
            .unwrap();

        orch.discard(&form.uploads).await;
        assert_eq!(storage.deleted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn release_deletes_objects_a_row_no_longer_references() {
        let storage = Arc::new(FakeStorage::default());
        let orch = orchestrator(storage.clone());
        let stored = |id: &str, resource_type| UploadResult {
            secure_url: format!("mem://{id}"),
            public_id: id.to_string(),
            resource_type,
            bytes: 0,
            format: None,
            original_filename: None,
            content_type: None,
        };

        orch.release(vec![
            stored("videos/v", ResourceType::Video),
            stored("thumbnails/t", ResourceType::Image),
        ])
        .await;
        orch.release(Vec::new()).await;

        assert_eq!(
            *storage.deleted.lock().unwrap(),
            vec!["videos/v".to_string(), "thumbnails/t".to_string()]
        );
    }
}
