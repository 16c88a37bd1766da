//! Manifest decoding and parsing
//!
//! The contents endpoint returns the manifest base64-encoded (with line
//! wrapping). Only the top-level `"dependencies"` table is extracted; all
//! other manifest sections are ignored.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::github::FileContents;

/// Manifest file name fetched from every repository
pub const MANIFEST_PATH: &str = "package.json";

#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// Decode a base64 file payload and extract the direct runtime
/// dependencies as a name -> declared-version map. A manifest without a
/// `dependencies` table yields an empty map.
pub fn parse_dependencies(
    repo: &str,
    contents: &FileContents,
) -> Result<BTreeMap<String, String>, SyncError> {
    // GitHub wraps base64 content at 60 columns
    let stripped: String = contents
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let decoded = BASE64
        .decode(stripped.as_bytes())
        .map_err(|e| SyncError::ManifestUnparseable {
            repo: repo.to_string(),
            reason: format!("invalid {} payload: {}", contents.encoding, e),
        })?;

    let manifest: PackageManifest =
        serde_json::from_slice(&decoded).map_err(|e| SyncError::ManifestUnparseable {
            repo: repo.to_string(),
            reason: e.to_string(),
        })?;

    Ok(manifest.dependencies)
}
