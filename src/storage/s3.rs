use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::{Path, PathBuf};

use super::{ByteReader, ByteStore, join_path};
use crate::config::SpacesConfig;
use crate::errors::{Result, SnapshotError};

/// A byte store backed by an S3-compatible bucket (AWS, DigitalOcean Spaces,
/// MinIO). Store paths are keys below the configured folder prefix.
#[derive(Clone)]
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    folder_prefix: Option<String>,
}

impl S3Store {
    pub async fn connect(spaces_config: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces_config.endpoint_url)
            .region(Region::new(spaces_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces_config.access_key_id,
                &spaces_config.secret_access_key,
                None, // session_token
                None, // expiry
                "Static",
            ))
            .load()
            .await;

        S3Store {
            client: s3::Client::new(&sdk_config),
            bucket: spaces_config.bucket_name.clone(),
            folder_prefix: spaces_config.folder_prefix.clone(),
        }
    }

    fn key(&self, path: &str) -> String {
        match &self.folder_prefix {
            Some(prefix) => join_path(prefix, path),
            None => path.trim_start_matches('/').to_string(),
        }
    }

    fn path_from_key<'a>(&self, key: &'a str) -> &'a str {
        match &self.folder_prefix {
            Some(prefix) => super::relative_to(prefix, key).unwrap_or(key),
            None => key,
        }
    }

    async fn head(&self, path: &str) -> Result<s3::operation::head_object::HeadObjectOutput> {
        let key = self.key(path);
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!(
                    "Failed to stat s3://{}/{}: {}",
                    self.bucket, key, e
                ))
            })
    }
}

#[async_trait]
impl ByteStore for S3Store {
    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(SnapshotError::storage(format!(
                        "Failed to check s3://{}/{}: {}",
                        self.bucket, key, service_error
                    )))
                }
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path);
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!("Failed to get object s3://{}/{}: {}", self.bucket, key, e))
            })?;
        let data = object.body.collect().await.map_err(|e| {
            SnapshotError::storage(format!("Failed to read object s3://{}/{}: {}", self.bucket, key, e))
        })?;
        let bytes = data.into_bytes().to_vec();
        tracing::debug!("Downloaded {} bytes from s3://{}/{}", bytes.len(), self.bucket, key);
        Ok(bytes)
    }

    async fn put(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        let key = self.key(path);
        let len = contents.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(contents))
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!("Failed to upload to s3://{}/{}: {}", self.bucket, key, e))
            })?;
        tracing::debug!("Uploaded {} bytes to s3://{}/{}", len, self.bucket, key);
        Ok(())
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let key = self.key(path);
        let body = ByteStream::from_path(source).await.map_err(|e| {
            SnapshotError::storage(format!(
                "Failed to create ByteStream from file {}: {}",
                source.display(),
                e
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!(
                    "Failed to upload file {} to s3://{}/{}: {}",
                    source.display(),
                    self.bucket,
                    key,
                    e
                ))
            })?;
        tracing::debug!("Uploaded {} to s3://{}/{}", source.display(), self.bucket, key);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.key(path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!("Failed to delete s3://{}/{}: {}", self.bucket, key, e))
            })?;
        tracing::debug!("Deleted s3://{}/{}", self.bucket, key);
        Ok(true)
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let head = self.head(path).await?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let head = self.head(path).await?;
        let modified = head
            .last_modified()
            .ok_or_else(|| SnapshotError::storage(format!("No modification time for {}", path)))?;
        DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())
            .ok_or_else(|| SnapshotError::storage(format!("Invalid modification time for {}", path)))
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.key(prefix);
        let base = base.trim_end_matches('/');
        let key_prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };
        let mut paginator = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&key_prefix)
            .into_paginator()
            .send();

        let mut files = Vec::new();
        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| {
                SnapshotError::storage(format!(
                    "Failed to list s3://{}/{}: {}",
                    self.bucket, key_prefix, e
                ))
            })?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    if !key.ends_with('/') {
                        files.push(self.path_from_key(key).to_string());
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_stream(&self, path: &str) -> Result<ByteReader> {
        let key = self.key(path);
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                SnapshotError::storage(format!("Failed to get object s3://{}/{}: {}", self.bucket, key, e))
            })?;
        Ok(Box::new(Box::pin(object.body.into_async_read())))
    }

    async fn make_directory(&self, _path: &str) -> Result<()> {
        // Buckets have no directories; keys create their own prefixes.
        Ok(())
    }

    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}
