//! S3-compatible object store over `aws-sdk-s3`.

use std::collections::VecDeque;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::ObjectCannedAcl;
use futures::stream::{self, BoxStream};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::debug;

use super::{BucketInfo, ObjectEntry, ObjectInfo, ObjectStore, PutOptions, StoreError, StoreResult};
use crate::providers::ProviderCredentials;

/// Characters escaped in a copy source. Keeps `/` so keys stay readable.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object store backed by an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct AwsObjectStore {
    client: Client,
}

impl AwsObjectStore {
    /// Connect to `endpoint` (or the AWS default when `None`).
    ///
    /// Without explicit credentials the SDK's default provider chain is
    /// used. Path-style addressing is forced so MinIO-like endpoints work.
    pub async fn connect(
        endpoint: Option<&str>,
        region: &str,
        credentials: Option<&ProviderCredentials>,
    ) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(creds) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                "kumo",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        debug!(?endpoint, region, "connected object store");
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn upstream<E>(err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.raw_response().map(|r| r.status().as_u16());
    let message = match err.as_service_error() {
        Some(svc) => svc
            .message()
            .or(svc.code())
            .unwrap_or("object storage error")
            .to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    StoreError::Upstream { message, code }
}

fn millis(t: Option<&DateTime>) -> i64 {
    t.and_then(|t| t.to_millis().ok()).unwrap_or(0)
}

#[async_trait]
impl ObjectStore for AwsObjectStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        let out = self.client.list_buckets().send().await.map_err(upstream)?;
        Ok(out
            .buckets()
            .iter()
            .filter_map(|b| {
                Some(BucketInfo {
                    name: b.name()?.to_string(),
                    created_ms: millis(b.creation_date()),
                })
            })
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(upstream(e)),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error().is_some_and(|s| {
                    s.is_bucket_already_exists() || s.is_bucket_already_owned_by_you()
                }) =>
            {
                Err(StoreError::BucketExists(bucket.to_string()))
            }
            Err(e) => Err(upstream(e)),
        }
    }

    async fn remove_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.client.delete_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().and_then(|s| s.code()) == Some("BucketNotEmpty") => {
                Err(StoreError::BucketNotEmpty(bucket.to_string()))
            }
            Err(e) if e.as_service_error().and_then(|s| s.code()) == Some("NoSuchBucket") => {
                Err(StoreError::not_found(bucket))
            }
            Err(e) => Err(upstream(e)),
        }
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        recursive: bool,
    ) -> BoxStream<'a, StoreResult<ObjectEntry>> {
        let pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter((!recursive).then(|| "/".to_string()))
            .into_paginator()
            .send();

        Box::pin(stream::unfold(
            (pages, VecDeque::new(), false),
            move |(mut pages, mut buffered, failed)| async move {
                loop {
                    if let Some(entry) = buffered.pop_front() {
                        return Some((Ok(entry), (pages, buffered, failed)));
                    }
                    if failed {
                        return None;
                    }
                    match pages.next().await {
                        None => return None,
                        Some(Err(e)) => {
                            let err = if e.as_service_error().is_some_and(|s| s.is_no_such_bucket()) {
                                StoreError::not_found(bucket)
                            } else {
                                upstream(e)
                            };
                            return Some((Err(err), (pages, buffered, true)));
                        }
                        Some(Ok(page)) => {
                            for p in page.common_prefixes() {
                                if let Some(prefix) = p.prefix() {
                                    buffered.push_back(ObjectEntry::Prefix(prefix.to_string()));
                                }
                            }
                            for o in page.contents() {
                                if let Some(key) = o.key() {
                                    buffered.push_back(ObjectEntry::Object(ObjectInfo {
                                        key: key.to_string(),
                                        size: o.size().unwrap_or(0).max(0) as u64,
                                        modified_ms: millis(o.last_modified()),
                                        content_type: None,
                                        public_read: false,
                                    }));
                                }
                            }
                        }
                    }
                }
            },
        ))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectInfo>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(out) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: out.content_length().unwrap_or(0).max(0) as u64,
                modified_ms: millis(out.last_modified()),
                content_type: out.content_type().map(str::to_string),
                public_read: false,
            })),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(None),
            Err(e) => Err(upstream(e)),
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let out = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                return Err(StoreError::not_found(format!("{bucket}/{key}")));
            }
            Err(e) => return Err(upstream(e)),
        };
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::upstream(e.to_string(), None))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
    ) -> StoreResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset.saturating_add(length - 1));
        let out = match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(range)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                return Err(StoreError::not_found(format!("{bucket}/{key}")));
            }
            // Range starts past EOF.
            Err(e) if e.raw_response().is_some_and(|r| r.status().as_u16() == 416) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(upstream(e)),
        };
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::upstream(e.to_string(), None))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        opts: &PutOptions,
    ) -> StoreResult<()> {
        let content_type = opts
            .content_type
            .clone()
            .or_else(|| super::guess_content_type(key).map(str::to_string));
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_content_type(content_type);
        if opts.public_read {
            req = req.acl(ObjectCannedAcl::PublicRead);
        }
        req.send().await.map_err(upstream)?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let source = format!(
            "{}/{}",
            src_bucket,
            utf8_percent_encode(src_key, COPY_SOURCE)
        );
        self.client
            .copy_object()
            .copy_source(source)
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(upstream)?;
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(upstream)?;
        Ok(())
    }
}
