//! In-memory cache of paginated, post-processed accessibility snapshots.
//!
//! Entries are keyed by a fingerprint computed by the dispatcher over the raw
//! snapshot payload and its post-processing parameters. The fingerprint is
//! the sole contract this cache exposes: two tool calls with the same
//! fingerprint return identical page content while the entry is live.
//! Entries are immutable after insertion; only TTL eviction removes them.
//! The cache does not survive a proxy restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One immutable cached snapshot.
#[derive(Debug)]
struct SnapshotEntry {
	/// Output format the pages were rendered in.
	#[allow(dead_code)]
	mode: String,
	/// Serialized page strings, in order.
	pages: Vec<String>,
	/// Items per page used when paginating.
	page_size: usize,
	/// Total item count before pagination.
	total_items: usize,
	#[allow(dead_code)]
	created_at: DateTime<Utc>,
	expires_at: Instant,
}

/// One page served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPage {
	pub page: String,
	pub page_size: usize,
	pub total_pages: usize,
	pub total_items: usize,
	pub has_more: bool,
}

/// Process-wide snapshot cache shared across all pools.
#[derive(Debug)]
pub struct SnapshotCache {
	entries: Mutex<HashMap<String, SnapshotEntry>>,
	ttl: Duration,
}

impl SnapshotCache {
	/// Create a cache whose entries live for `ttl`.
	#[must_use]
	pub fn new(ttl: Duration) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			ttl,
		}
	}

	/// Insert a paginated snapshot under its fingerprint.
	///
	/// A fingerprint that is already present is left untouched: identical
	/// inputs produce identical pages, and entries are immutable.
	pub fn store(&self, fingerprint: &str, mode: &str, pages: Vec<String>, page_size: usize, total_items: usize) {
		let mut entries = self.entries.lock().expect("snapshot cache mutex poisoned");
		entries
			.entry(fingerprint.to_string())
			.or_insert_with(|| SnapshotEntry {
				mode: mode.to_string(),
				pages,
				page_size,
				total_items,
				created_at: Utc::now(),
				expires_at: Instant::now() + self.ttl,
			});
	}

	/// Fetch one page of a cached snapshot.
	///
	/// Returns `None` when the fingerprint is unknown, expired, or the page
	/// index is out of range.
	#[must_use]
	pub fn lookup(&self, fingerprint: &str, page_index: usize) -> Option<SnapshotPage> {
		let entries = self.entries.lock().expect("snapshot cache mutex poisoned");
		let entry = entries.get(fingerprint)?;
		if entry.expires_at <= Instant::now() {
			return None;
		}
		let page = entry.pages.get(page_index)?;
		Some(SnapshotPage {
			page: page.clone(),
			page_size: entry.page_size,
			total_pages: entry.pages.len(),
			total_items: entry.total_items,
			has_more: page_index + 1 < entry.pages.len(),
		})
	}

	/// Remove all expired entries, returning how many were dropped.
	pub fn evict_expired(&self) -> usize {
		let now = Instant::now();
		let mut entries = self.entries.lock().expect("snapshot cache mutex poisoned");
		let before = entries.len();
		entries.retain(|_, entry| entry.expires_at > now);
		before - entries.len()
	}

	/// Number of live entries, counting not-yet-swept expired ones.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.lock().expect("snapshot cache mutex poisoned").len()
	}

	/// Whether the cache holds no entries at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Run [`SnapshotCache::evict_expired`] on `interval` until cancelled.
	///
	/// Shares the background timer family with the blob sweeper.
	pub fn spawn_sweeper(
		self: &Arc<Self>,
		interval: Duration,
		shutdown: CancellationToken,
	) -> tokio::task::JoinHandle<()> {
		let cache = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			ticker.tick().await;
			loop {
				tokio::select! {
					() = shutdown.cancelled() => break,
					_ = ticker.tick() => {
						let evicted = cache.evict_expired();
						if evicted > 0 {
							tracing::debug!(evicted, "snapshot cache sweep");
						}
					}
				}
			}
		})
	}
}
