use crate::services::storage::S3ObjectStore;
use aws_sdk_s3::config::{Credentials, Region};
use std::env;
use std::sync::Arc;
use tracing::info;

/// Builds the S3 client from the ambient environment.
///
/// `S3_ENDPOINT` / `S3_ACCESS_KEY` / `S3_SECRET_KEY` take precedence when
/// set (MinIO and friends); otherwise the default AWS provider chain
/// supplies credentials.
pub async fn setup_storage(bucket: &str, chunk_size: usize) -> Arc<S3ObjectStore> {
    let mut loader = aws_config::from_env();

    if let Ok(endpoint_url) = env::var("S3_ENDPOINT") {
        info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);
        loader = loader.endpoint_url(endpoint_url);
    } else {
        info!("☁️  S3 Storage: AWS default endpoint (Bucket: {})", bucket);
    }

    if let (Ok(access_key), Ok(secret_key)) = (env::var("S3_ACCESS_KEY"), env::var("S3_SECRET_KEY"))
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }

    let region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let aws_config = loader.region(Region::new(region)).load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3ObjectStore::new(
        s3_client,
        bucket.to_string(),
        chunk_size,
    ))
}
