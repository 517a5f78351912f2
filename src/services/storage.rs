use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// S3 rejects non-final multipart parts smaller than 5 MB.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// HDF5 data files keep their proper MIME type; everything else goes up as
/// generic binary.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("h5") | Some("hdf5") => "application/x-hdf5",
        _ => "application/octet-stream",
    }
}

/// Destination for uploaded objects. One object per file, keyed by the
/// file's path relative to the upload root.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, local_path: &Path, content_type: &str) -> Result<()>;
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    chunk_size: usize,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String, chunk_size: usize) -> Self {
        Self {
            client,
            bucket,
            chunk_size: chunk_size.max(MIN_PART_SIZE),
        }
    }

    async fn upload_multipart(
        &self,
        key: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let mut file = tokio::fs::File::open(local_path).await?;

        let multipart_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let upload_id = multipart_res.upload_id().ok_or_else(|| Error::Storage {
            message: "multipart upload session returned no upload ID".to_string(),
            retryable: true,
        })?;

        match self.transmit_parts(key, upload_id, &mut file).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Orphaned sessions accrue storage; abort is best effort.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %display_sdk_error(&abort_err), "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn transmit_parts(
        &self,
        key: &str,
        upload_id: &str,
        file: &mut tokio::fs::File,
    ) -> Result<()> {
        let mut part_number = 1;
        let mut completed_parts = Vec::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let mut n = 0;
            while n < self.chunk_size {
                let read = file.read(&mut buffer[n..]).await?;
                if read == 0 {
                    break;
                }
                n += read;
            }

            if n == 0 {
                break;
            }

            let body = ByteStream::from(buffer[..n].to_vec());
            let part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(body)
                .part_number(part_number)
                .send()
                .await
                .map_err(classify_sdk_error)?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(part_res.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            part_number += 1;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, local_path: &Path, content_type: &str) -> Result<()> {
        let size = tokio::fs::metadata(local_path).await?.len();

        // S3 multipart requires at least one part.
        if size == 0 {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from_static(&[]))
                .send()
                .await
                .map_err(classify_sdk_error)?;
            return Ok(());
        }

        self.upload_multipart(key, local_path, content_type).await
    }
}

/// Maps SDK failures onto retryable vs terminal storage errors. Network
/// and server-side failures are worth a fresh session; 4xx responses
/// (access denied, missing bucket, bad request) are not.
fn classify_sdk_error<E>(err: SdkError<E>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let retryable = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => ctx.raw().status().is_server_error(),
        _ => false,
    };

    Error::Storage {
        message: display_sdk_error(&err),
        retryable,
    }
}

fn display_sdk_error<E>(err: &SdkError<E>) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{}", aws_sdk_s3::error::DisplayErrorContext(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_hdf5() {
        assert_eq!(
            content_type_for(Path::new("weights.h5")),
            "application/x-hdf5"
        );
        assert_eq!(
            content_type_for(Path::new("model.HDF5")),
            "application/x-hdf5"
        );
        assert_eq!(
            content_type_for(Path::new("runs/epoch3/weights.h5")),
            "application/x-hdf5"
        );
    }

    #[test]
    fn test_chunk_size_clamped_to_s3_minimum() {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        let client = Client::from_conf(conf);

        let store = S3ObjectStore::new(client.clone(), "bucket".to_string(), 1024);
        assert_eq!(store.chunk_size, MIN_PART_SIZE);

        let store = S3ObjectStore::new(client, "bucket".to_string(), 16 * 1024 * 1024);
        assert_eq!(store.chunk_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_content_type_for_everything_else() {
        assert_eq!(
            content_type_for(Path::new("notes.txt")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("data.bin")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("noext")),
            "application/octet-stream"
        );
    }
}
