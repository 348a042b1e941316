//! Content-addressed, TTL-bounded on-disk cache for large binary payloads.
//!
//! Each stored blob is one payload file named `<blobId>.<ext>` plus a
//! `<blobId>.meta` JSON sidecar carrying mime, size, creation and expiry
//! times, and tags. There is no index file; the directory listing is
//! authoritative. Writes are atomic (write-to-temp-then-rename), and the
//! sidecar is renamed into place last, so a [`BlobRef`] is never observable
//! before its record is complete. A background sweeper deletes expired
//! records; readers that opened a payload before deletion complete normally,
//! while new reads fail with `NotFound`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pwmcp_proxy_proto::config::BlobSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Reference to a stored blob, returned to callers in place of raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
	/// Opaque id: a 10-digit decimal timestamp and a 12-hex content digest.
	pub blob_id: String,
	/// Mime type recorded at store time.
	pub mime_type: String,
	/// Payload size in bytes.
	pub size_bytes: u64,
	/// Wall-clock expiry after which the sweeper may delete the record.
	pub expires_at: DateTime<Utc>,
}

impl BlobRef {
	/// The string form substituted into tool results.
	#[must_use]
	pub fn uri(&self) -> String {
		format!("blob://{}.{}", self.blob_id, extension_for(&self.mime_type))
	}
}

/// A retrieved blob: payload plus the sidecar fields callers care about.
#[derive(Debug)]
pub struct BlobGet {
	pub bytes: Vec<u8>,
	pub mime_type: String,
	pub size_bytes: u64,
	pub expires_at: DateTime<Utc>,
}

/// Sidecar record persisted next to each payload file.
#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
	created_at: DateTime<Utc>,
	mime_type: String,
	size_bytes: u64,
	tags: Vec<String>,
	expires_at: DateTime<Utc>,
	file_name: String,
}

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
	#[error("blob {0} not found")]
	NotFound(String),

	#[error("payload of {size} bytes exceeds the per-blob cap of {max} bytes")]
	TooLarge { size: u64, max: u64 },

	#[error("blob store I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("corrupt blob sidecar {path}: {error}")]
	CorruptMeta {
		path: PathBuf,
		#[source]
		error: serde_json::Error,
	},
}

/// On-disk blob store shared by all pools.
#[derive(Debug)]
pub struct BlobStore {
	root: PathBuf,
	max_bytes: u64,
	ttl: Duration,
	sweep_interval: Duration,
	/// Distinguishes temp file names so concurrent puts never collide.
	temp_counter: AtomicU64,
}

impl BlobStore {
	/// Open (creating if necessary) the store under the configured root.
	pub fn open(settings: &BlobSettings) -> std::io::Result<Self> {
		let root = settings
			.storage_root
			.clone()
			.unwrap_or_else(|| std::env::temp_dir().join("pwmcp-proxy-blobs"));
		std::fs::create_dir_all(&root)?;
		Ok(Self {
			root,
			max_bytes: settings.max_bytes,
			ttl: settings.ttl,
			sweep_interval: settings.sweep_interval,
			temp_counter: AtomicU64::new(0),
		})
	}

	/// The storage root directory.
	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Store a payload, returning its reference.
	///
	/// The payload file is renamed into place before the sidecar, so the
	/// record becomes visible atomically. Two identical payloads stored at
	/// different times yield different blob ids (the timestamp differs);
	/// de-duplication is not a contract.
	pub async fn put(
		&self,
		bytes: &[u8],
		mime_type: &str,
		tags: &[String],
	) -> Result<BlobRef, BlobError> {
		let size = bytes.len() as u64;
		if size > self.max_bytes {
			return Err(BlobError::TooLarge {
				size,
				max: self.max_bytes,
			});
		}

		let created_at = Utc::now();
		let digest = Sha256::digest(bytes);
		let digest_hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
		let blob_id = format!("{:010}-{digest_hex}", created_at.timestamp());
		let expires_at = created_at + self.ttl;

		let file_name = format!("{blob_id}.{}", extension_for(mime_type));
		let payload_path = self.root.join(&file_name);
		let meta_path = self.meta_path(&blob_id);

		let temp = self.temp_path();
		tokio::fs::write(&temp, bytes).await?;
		tokio::fs::rename(&temp, &payload_path).await?;

		let meta = BlobMeta {
			created_at,
			mime_type: mime_type.to_string(),
			size_bytes: size,
			tags: tags.to_vec(),
			expires_at,
			file_name,
		};
		let temp = self.temp_path();
		let encoded = serde_json::to_vec(&meta).map_err(|error| BlobError::CorruptMeta {
			path: meta_path.clone(),
			error,
		})?;
		tokio::fs::write(&temp, encoded).await?;
		tokio::fs::rename(&temp, &meta_path).await?;

		tracing::debug!(blob_id, mime_type, size, "stored blob");

		Ok(BlobRef {
			blob_id,
			mime_type: mime_type.to_string(),
			size_bytes: size,
			expires_at,
		})
	}

	/// Fetch a blob by id.
	pub async fn get(&self, blob_id: &str) -> Result<BlobGet, BlobError> {
		let meta = self.read_meta(blob_id).await?;
		let bytes = match tokio::fs::read(self.root.join(&meta.file_name)).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(BlobError::NotFound(blob_id.to_string()));
			}
			Err(e) => return Err(e.into()),
		};
		Ok(BlobGet {
			bytes,
			mime_type: meta.mime_type,
			size_bytes: meta.size_bytes,
			expires_at: meta.expires_at,
		})
	}

	/// Enumerate surviving blobs, optionally filtered by id prefix and tags.
	///
	/// A blob matches a tag filter when it carries every requested tag.
	/// Ordering is unspecified.
	pub async fn list(
		&self,
		prefix: Option<&str>,
		tags: Option<&[String]>,
	) -> Result<Vec<BlobRef>, BlobError> {
		let mut out = Vec::new();
		let mut entries = tokio::fs::read_dir(&self.root).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().is_none_or(|ext| ext != "meta") {
				continue;
			}
			let Some(blob_id) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			if let Some(prefix) = prefix
				&& !blob_id.starts_with(prefix)
			{
				continue;
			}
			let meta = match self.read_meta(blob_id).await {
				Ok(meta) => meta,
				// Swept between read_dir and here.
				Err(BlobError::NotFound(_)) => continue,
				Err(e) => return Err(e),
			};
			if let Some(tags) = tags
				&& !tags.iter().all(|t| meta.tags.contains(t))
			{
				continue;
			}
			out.push(BlobRef {
				blob_id: blob_id.to_string(),
				mime_type: meta.mime_type,
				size_bytes: meta.size_bytes,
				expires_at: meta.expires_at,
			});
		}
		Ok(out)
	}

	/// Delete a blob. Returns whether a record existed. Idempotent.
	pub async fn delete(&self, blob_id: &str) -> Result<bool, BlobError> {
		let meta = match self.read_meta(blob_id).await {
			Ok(meta) => meta,
			Err(BlobError::NotFound(_)) => return Ok(false),
			Err(e) => return Err(e),
		};
		remove_if_present(&self.root.join(&meta.file_name)).await?;
		remove_if_present(&self.meta_path(blob_id)).await?;
		Ok(true)
	}

	/// Remove all records whose expiry is in the past.
	///
	/// Payload files with no sidecar are treated as orphans and removed once
	/// older than the configured TTL. Safe to run concurrently with `put` and
	/// `get`: a reader that opened its payload before the sweeper observes a
	/// consistent file, and later reads fail with `NotFound`.
	pub async fn sweep_expired(&self) -> Result<usize, BlobError> {
		let now = Utc::now();
		let mut removed = 0usize;

		let mut entries = tokio::fs::read_dir(&self.root).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
				continue;
			};
			if name.ends_with(".tmp") {
				continue;
			}

			if path.extension().is_some_and(|ext| ext == "meta") {
				let Some(blob_id) = path.file_stem().and_then(|s| s.to_str()) else {
					continue;
				};
				let meta = match self.read_meta(blob_id).await {
					Ok(meta) => meta,
					Err(BlobError::NotFound(_)) => continue,
					Err(e) => {
						tracing::warn!(?path, error = %e, "skipping unreadable sidecar");
						continue;
					}
				};
				if meta.expires_at < now {
					remove_if_present(&self.root.join(&meta.file_name)).await?;
					remove_if_present(&path).await?;
					removed += 1;
				}
				continue;
			}

			// Payload without a sidecar: orphan, deleted once past TTL.
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			if tokio::fs::try_exists(self.meta_path(stem)).await? {
				continue;
			}
			let modified = entry.metadata().await?.modified()?;
			if modified.elapsed().unwrap_or_default() > self.ttl {
				tracing::warn!(?path, "removing orphaned blob payload");
				remove_if_present(&path).await?;
				removed += 1;
			}
		}

		Ok(removed)
	}

	/// Run [`BlobStore::sweep_expired`] on the configured interval until the
	/// token is cancelled.
	pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
		let store = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(store.sweep_interval);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			interval.tick().await;
			loop {
				tokio::select! {
					() = shutdown.cancelled() => break,
					_ = interval.tick() => {
						match store.sweep_expired().await {
							Ok(0) => {}
							Ok(removed) => tracing::info!(removed, "blob sweep"),
							Err(e) => tracing::warn!(error = %e, "blob sweep failed"),
						}
					}
				}
			}
		})
	}

	async fn read_meta(&self, blob_id: &str) -> Result<BlobMeta, BlobError> {
		let path = self.meta_path(blob_id);
		let raw = match tokio::fs::read(&path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(BlobError::NotFound(blob_id.to_string()));
			}
			Err(e) => return Err(e.into()),
		};
		serde_json::from_slice(&raw).map_err(|error| BlobError::CorruptMeta { path, error })
	}

	fn meta_path(&self, blob_id: &str) -> PathBuf {
		self.root.join(format!("{blob_id}.meta"))
	}

	fn temp_path(&self) -> PathBuf {
		let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
		self.root
			.join(format!(".write-{}-{n}.tmp", std::process::id()))
	}
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
	match tokio::fs::remove_file(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(e),
	}
}

/// File extension for a mime type; `bin` when unknown.
#[must_use]
pub fn extension_for(mime_type: &str) -> &'static str {
	match mime_type {
		"image/png" => "png",
		"image/jpeg" => "jpg",
		"image/gif" => "gif",
		"image/webp" => "webp",
		"application/pdf" => "pdf",
		"text/plain" => "txt",
		"application/zip" => "zip",
		_ => "bin",
	}
}
