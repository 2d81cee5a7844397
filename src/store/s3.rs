//! Concrete [`ObjectStore`] backed by `aws-sdk-s3`, constructed the way
//! the engine builds its other typed clients: take a settings value,
//! resolve credentials/endpoint overrides, hand back a struct beside
//! the trait it implements.

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials as AwsCredentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketVersioningStatus, ObjectVersion};
use bytes::Bytes;

use crate::config::{Credentials, Settings};
use crate::error::BackendError;

use super::{
	DeleteResult, GetResult, HeadResult, ListPrefixOptions, ListPrefixPage, ListVersionsOptions,
	ListVersionsPage, ObjectStore, PutOptions, PutResult, StoreResult, VersionEntry,
	VersioningState,
};

pub struct S3ObjectStore {
	client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
	pub async fn new(settings: &Settings) -> Result<Self, BackendError> {
		let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
			.region(Region::new(settings.region.clone()));

		if let Some(Credentials::Static { access_key_id, secret_access_key, session_token }) =
			settings.overrides.credentials.clone()
		{
			loader = loader.credentials_provider(AwsCredentials::new(
				access_key_id,
				secret_access_key,
				session_token,
				None,
				"immukv-static",
			));
		}

		let shared_config = loader.load().await;
		let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
		if let Some(endpoint) = &settings.overrides.endpoint_url {
			s3_config = s3_config.endpoint_url(endpoint);
		}
		if settings.overrides.force_path_style {
			s3_config = s3_config.force_path_style(true);
		}

		Ok(Self { client: aws_sdk_s3::Client::from_conf(s3_config.build()) })
	}

	pub fn from_client(client: aws_sdk_s3::Client) -> Self {
		Self { client }
	}
}

fn transport_err<E: std::error::Error + Send + Sync + 'static>(e: SdkError<E>) -> BackendError {
	BackendError::Transport(anyhow::anyhow!(e))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
	async fn get<'a>(
		&self,
		bucket: &'a str,
		key: &'a str,
		version_id: Option<&'a str>,
	) -> StoreResult<GetResult> {
		let mut req = self.client.get_object().bucket(bucket).key(key);
		if let Some(v) = version_id {
			req = req.version_id(v);
		}
		let resp = req.send().await.map_err(|e| match e.as_service_error() {
			Some(se) if se.is_no_such_key() => BackendError::NotFound,
			// A missing *version* of an existing key isn't a modeled
			// GetObjectError variant; S3 reports it by error code only.
			Some(se) if se.meta().code() == Some("NoSuchVersion") => BackendError::NotFound,
			_ => transport_err(e),
		})?;
		let etag = resp.e_tag().ok_or(BackendError::MissingVersionId)?.trim_matches('"').to_string();
		let version_id =
			resp.version_id().ok_or(BackendError::MissingVersionId)?.to_string();
		let body = resp
			.body
			.collect()
			.await
			.map_err(|e| BackendError::Transport(anyhow::anyhow!(e)))?
			.into_bytes();
		Ok(GetResult { body, etag, version_id })
	}

	async fn put(
		&self,
		bucket: &str,
		key: &str,
		body: Bytes,
		opts: PutOptions,
	) -> StoreResult<PutResult> {
		let mut req = self
			.client
			.put_object()
			.bucket(bucket)
			.key(key)
			.body(ByteStream::from(body))
			.content_type(opts.content_type.unwrap_or_else(|| "application/octet-stream".into()));

		if let Some(etag) = &opts.if_match {
			req = req.if_match(etag);
		}
		if opts.if_none_match {
			req = req.if_none_match("*");
		}
		if let Some(kms) = &opts.kms_key_id {
			req = req
				.server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
				.ssekms_key_id(kms);
		}
		if let Some(meta) = &opts.user_metadata {
			for (k, v) in meta {
				req = req.metadata(k, v);
			}
		}

		let resp = req.send().await.map_err(|e| match e.as_service_error() {
			Some(se) if se.meta().code() == Some("PreconditionFailed") => {
				BackendError::PreconditionFailed
			},
			Some(se) if se.meta().code() == Some("AccessDenied") => BackendError::AccessDenied,
			_ => transport_err(e),
		})?;

		let etag = resp.e_tag().ok_or(BackendError::MissingVersionId)?.trim_matches('"').to_string();
		let version_id =
			resp.version_id().ok_or(BackendError::MissingVersionId)?.to_string();
		Ok(PutResult { etag, version_id })
	}

	async fn head(&self, bucket: &str, key: &str) -> StoreResult<HeadResult> {
		let resp = self
			.client
			.head_object()
			.bucket(bucket)
			.key(key)
			.send()
			.await
			.map_err(|e| match e.as_service_error() {
				Some(se) if se.is_not_found() => BackendError::NotFound,
				_ => transport_err(e),
			})?;
		let etag = resp.e_tag().ok_or(BackendError::MissingVersionId)?.trim_matches('"').to_string();
		let version_id =
			resp.version_id().ok_or(BackendError::MissingVersionId)?.to_string();
		Ok(HeadResult { etag, version_id })
	}

	async fn list_versions(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListVersionsOptions,
	) -> StoreResult<ListVersionsPage> {
		let mut req = self.client.list_object_versions().bucket(bucket).prefix(prefix);
		if let Some(m) = &opts.key_marker {
			req = req.key_marker(m);
		}
		if let Some(m) = &opts.version_id_marker {
			req = req.version_id_marker(m);
		}
		if let Some(n) = opts.max_keys {
			req = req.max_keys(n as i32);
		}
		let resp = req.send().await.map_err(transport_err)?;

		let to_entry = |v: &ObjectVersion| VersionEntry {
			key: v.key().unwrap_or_default().to_string(),
			version_id: v.version_id().unwrap_or_default().to_string(),
			is_latest: v.is_latest().unwrap_or(false),
		};
		let mut entries: Vec<VersionEntry> = resp.versions().iter().map(to_entry).collect();
		for dm in resp.delete_markers() {
			entries.push(VersionEntry {
				key: dm.key().unwrap_or_default().to_string(),
				version_id: dm.version_id().unwrap_or_default().to_string(),
				is_latest: dm.is_latest().unwrap_or(false),
			});
		}

		Ok(ListVersionsPage {
			entries,
			next_key_marker: resp.next_key_marker().map(str::to_string),
			next_version_id_marker: resp.next_version_id_marker().map(str::to_string),
		})
	}

	async fn list_prefix(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListPrefixOptions,
	) -> StoreResult<ListPrefixPage> {
		let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
		if let Some(s) = &opts.start_after {
			req = req.start_after(s);
		}
		if let Some(t) = &opts.continuation_token {
			req = req.continuation_token(t);
		}
		if let Some(n) = opts.max_keys {
			req = req.max_keys(n as i32);
		}
		let resp = req.send().await.map_err(transport_err)?;
		let keys = resp
			.contents()
			.iter()
			.filter_map(|o| o.key().map(str::to_string))
			.collect();
		Ok(ListPrefixPage {
			keys,
			next_continuation_token: resp.next_continuation_token().map(str::to_string),
		})
	}

	async fn delete(&self, bucket: &str, key: &str) -> StoreResult<DeleteResult> {
		let resp = self
			.client
			.delete_object()
			.bucket(bucket)
			.key(key)
			.send()
			.await
			.map_err(transport_err)?;
		let delete_marker_version_id =
			resp.version_id().ok_or(BackendError::MissingVersionId)?.to_string();
		Ok(DeleteResult { delete_marker_version_id })
	}

	async fn get_bucket_versioning(&self, bucket: &str) -> StoreResult<VersioningState> {
		let resp = self
			.client
			.get_bucket_versioning()
			.bucket(bucket)
			.send()
			.await
			.map_err(transport_err)?;
		Ok(match resp.status() {
			Some(&BucketVersioningStatus::Enabled) => VersioningState::Enabled,
			_ => VersioningState::Disabled,
		})
	}
}
