//! Snapshot post-processing seam.
//!
//! The real ARIA/JMESPath query engine lives outside the core; the
//! dispatcher only depends on this trait. [`LineProcessor`] is the built-in
//! implementation used when no engine is plugged in.

/// Post-processing parameters supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
	/// Optional query expression applied to the snapshot.
	pub query: Option<String>,
	/// Whether to flatten the tree structure.
	pub flatten: bool,
	/// Output format the pages are rendered in.
	pub output_format: String,
}

/// Turns a raw snapshot payload into the flat list of items to paginate.
pub trait SnapshotProcessor: Send + Sync {
	fn process(&self, raw: &str, options: &ProcessOptions) -> Vec<String>;
}

/// Line-oriented default processor.
///
/// Treats each non-blank line of the raw payload as one item, applies the
/// query as a case-insensitive substring filter, and strips indentation when
/// flattening.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProcessor;

impl SnapshotProcessor for LineProcessor {
	fn process(&self, raw: &str, options: &ProcessOptions) -> Vec<String> {
		let query = options.query.as_deref().map(str::to_ascii_lowercase);
		raw.lines()
			.filter(|line| !line.trim().is_empty())
			.filter(|line| {
				query
					.as_deref()
					.is_none_or(|q| line.to_ascii_lowercase().contains(q))
			})
			.map(|line| {
				if options.flatten {
					line.trim_start().to_string()
				} else {
					line.to_string()
				}
			})
			.collect()
	}
}
