//! S3/MinIO blob storage

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::info;

use super::{BlobStorage, Download};
use crate::config::S3Config;

#[derive(Clone)]
pub struct S3Blobs {
    client: Client,
    bucket: String,
}

impl S3Blobs {
    pub fn new(config: &S3Config) -> Self {
        info!("Connecting to S3 at {}", config.endpoint);

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "invoker",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl BlobStorage for S3Blobs {
    async fn download(&self, key: &str) -> Result<Download> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;
        Ok(Download::Stream(Box::pin(response.body.into_async_read())))
    }

    async fn upload(&self, key: &str, source: &Path) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("Failed to read {:?}", source))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        Ok(())
    }
}
