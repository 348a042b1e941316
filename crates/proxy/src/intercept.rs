//! Binary interception: replaces oversize base64/binary fields in tool
//! results with blob references.
//!
//! # Heuristic
//!
//! A string-valued object field is intercepted when its exact decoded size
//! exceeds the inline threshold AND any of:
//!
//! 1. the value is a `data:<mime>;base64,` URI;
//! 2. the field name is a known binary key (`screenshot`, `pdf`, `image`,
//!    `data`, `bytes`, `file`), compared case-insensitively;
//! 3. the value matches the base64 profile: only characters from the
//!    standard base64 alphabet (plus padding and line breaks) and a payload
//!    length divisible by four.
//!
//! The forced-intercept tool set (`browser_screenshot`, `browser_pdf`, ...)
//! exists for mime attribution: their payloads get image/pdf mime types even
//! when no data URI, sibling mime field, or telling field name says so.
//! False positives of the
//! profile check are possible and accepted. A candidate that fails strict
//! base64 decoding is logged and left unmodified; the call does not fail.
//!
//! Strings inside arrays have no field name to hang sibling metadata on and
//! are never rewritten; objects nested inside arrays are scanned normally.
//! Fields already holding a `blob://` reference are never rewritten, which
//! makes the transform idempotent.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use crate::blob::BlobStore;

/// Tools whose results always carry binary payloads, with the mime type
/// attributed to those payloads when nothing else names one.
const FORCED_TOOLS: &[(&str, &str)] = &[
	("browser_screenshot", "image/png"),
	("browser_take_screenshot", "image/png"),
	("browser_pdf", "application/pdf"),
	("browser_pdf_save", "application/pdf"),
	("browser_save_as_pdf", "application/pdf"),
];

/// Field names that conventionally hold binary payloads.
const BINARY_KEYS: &[&str] = &["screenshot", "pdf", "image", "data", "bytes", "file"];

/// One field selected for replacement.
struct Candidate {
	/// JSON pointer to the object holding the field.
	parent: String,
	key: String,
	bytes: Vec<u8>,
	mime: String,
}

/// The result transformer run by the dispatcher after every child call.
#[derive(Clone)]
pub struct Interceptor {
	blobs: Arc<BlobStore>,
	threshold: usize,
}

impl Interceptor {
	/// Create an interceptor writing to `blobs` with the given inline
	/// threshold in decoded bytes.
	#[must_use]
	pub fn new(blobs: Arc<BlobStore>, threshold: usize) -> Self {
		Self { blobs, threshold }
	}

	/// Replace every oversize binary field of `result` with a blob reference
	/// plus `_size_kb`, `_mime_type`, and `_expires_at` sibling fields.
	///
	/// Idempotent, and the identity on results without oversize binary
	/// fields. Store failures are logged and leave the field unmodified.
	pub async fn transform(&self, tool: &str, mut result: Value) -> Value {
		let mut candidates = Vec::new();
		scan(tool, &mut String::new(), &result, self.threshold, &mut candidates);

		for candidate in candidates {
			let blob = match self
				.blobs
				.put(&candidate.bytes, &candidate.mime, &[tool.to_string()])
				.await
			{
				Ok(blob) => blob,
				Err(e) => {
					tracing::warn!(
						tool,
						field = %candidate.key,
						error = %e,
						"failed to store intercepted payload, leaving field inline",
					);
					continue;
				}
			};

			let Some(Value::Object(parent)) = result.pointer_mut(&candidate.parent) else {
				continue;
			};
			apply(parent, &candidate.key, &blob);
		}

		result
	}
}

fn apply(parent: &mut Map<String, Value>, key: &str, blob: &crate::blob::BlobRef) {
	parent.insert(key.to_string(), Value::String(blob.uri()));
	parent.insert(
		format!("{key}_size_kb"),
		Value::from(blob.size_bytes.div_ceil(1024)),
	);
	parent.insert(
		format!("{key}_mime_type"),
		Value::String(blob.mime_type.clone()),
	);
	parent.insert(
		format!("{key}_expires_at"),
		Value::String(blob.expires_at.to_rfc3339()),
	);
}

/// Recursively collect interception candidates.
fn scan(
	tool: &str,
	pointer: &mut String,
	value: &Value,
	threshold: usize,
	out: &mut Vec<Candidate>,
) {
	match value {
		Value::Object(map) => {
			for (key, child) in map {
				if let Value::String(s) = child {
					if let Some((bytes, mime)) = decode_candidate(tool, key, s, map, threshold) {
						out.push(Candidate {
							parent: pointer.clone(),
							key: key.clone(),
							bytes,
							mime,
						});
					}
					continue;
				}
				let len = pointer.len();
				pointer.push('/');
				pointer.push_str(&escape_pointer_token(key));
				scan(tool, pointer, child, threshold, out);
				pointer.truncate(len);
			}
		}
		Value::Array(items) => {
			for (index, item) in items.iter().enumerate() {
				let len = pointer.len();
				pointer.push('/');
				pointer.push_str(&index.to_string());
				scan(tool, pointer, item, threshold, out);
				pointer.truncate(len);
			}
		}
		_ => {}
	}
}

/// Decide whether one string field is an interception candidate, returning
/// its decoded bytes and mime type.
fn decode_candidate(
	tool: &str,
	key: &str,
	value: &str,
	siblings: &Map<String, Value>,
	threshold: usize,
) -> Option<(Vec<u8>, String)> {
	if value.starts_with("blob://") {
		return None;
	}

	let (payload, data_uri_mime) = match parse_data_uri(value) {
		Some((mime, payload)) => (payload, Some(mime)),
		None => (value, None),
	};

	let binary_key = BINARY_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k));
	if data_uri_mime.is_none() && !binary_key && !base64_profile(payload) {
		return None;
	}

	if decoded_len(payload) <= threshold {
		return None;
	}

	let bytes = match BASE64.decode(payload.as_bytes()) {
		Ok(bytes) => bytes,
		Err(e) => {
			tracing::warn!(tool, field = key, error = %e, "candidate field is not valid base64");
			return None;
		}
	};
	// The estimate can overshoot for malformed padding; re-check the real size.
	if bytes.len() <= threshold {
		return None;
	}

	let mime = data_uri_mime
		.map(str::to_string)
		.or_else(|| sibling_mime(key, siblings))
		.unwrap_or_else(|| guess_mime(tool, key));
	Some((bytes, mime))
}

/// Split a `data:<mime>;base64,<payload>` URI.
fn parse_data_uri(value: &str) -> Option<(&str, &str)> {
	let rest = value.strip_prefix("data:")?;
	let (mime, payload) = rest.split_once(";base64,")?;
	Some((mime, payload))
}

/// Whether a string consists only of base64 alphabet characters (plus
/// padding and line breaks) with a length divisible by four.
fn base64_profile(value: &str) -> bool {
	!value.is_empty()
		&& value.len() % 4 == 0
		&& value
			.bytes()
			.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'\r' | b'\n'))
}

/// Exact decoded size of well-formed standard base64.
fn decoded_len(payload: &str) -> usize {
	let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
	(payload.len() / 4) * 3 - padding.min(2)
}

/// Mime type from an explicit sibling field, e.g. `mimeType` next to `data`.
fn sibling_mime(key: &str, siblings: &Map<String, Value>) -> Option<String> {
	let keyed = format!("{key}_mime_type");
	["mimeType", "mime_type", keyed.as_str()]
		.iter()
		.find_map(|name| siblings.get(*name))
		.and_then(Value::as_str)
		.map(str::to_string)
}

/// Fall back to field naming, then the forced-tool table, for mime
/// attribution.
fn guess_mime(tool: &str, key: &str) -> String {
	let key = key.to_ascii_lowercase();
	if key.contains("screenshot") || key.contains("image") {
		return "image/png".to_string();
	}
	if key.contains("pdf") {
		return "application/pdf".to_string();
	}
	FORCED_TOOLS
		.iter()
		.find(|(name, _)| *name == tool)
		.map_or("application/octet-stream", |(_, mime)| *mime)
		.to_string()
}

/// Escape a key for use as a JSON pointer token.
fn escape_pointer_token(key: &str) -> String {
	key.replace('~', "~0").replace('/', "~1")
}
