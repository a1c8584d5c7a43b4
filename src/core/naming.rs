//! Entry keys derived from file paths

use std::path::Path;

/// Reduce a file path to the key used by the cache (its last path component).
///
/// `/tmp/job_1/block_0.npy` and `block_0.npy` map to the same entry. A
/// trailing separator is ignored, so `/a/b/` keys as `b` rather than the empty
/// string a plain split on the last `/` would give. Inputs without a usable
/// file name (empty string, `..`) are returned unchanged.
pub fn entry_key(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| file_name.to_string())
}
