//! Content-addressed job definition keys
//!
//! Batch backends need a registered remote definition (container image plus
//! resource spec) before they run anything. The key identifies one such
//! definition by tool identity, tool version and the resolved destination
//! parameters, so equal inputs always map to the same remote name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::destination::DestinationParams;

/// Upper bound the batch API puts on definition names
const MAX_NAME_LEN: usize = 128;

/// Stable hash over `(tool id, tool version, destination params)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionKey {
    tool_id: String,
    digest: String,
}

#[derive(Serialize)]
struct KeyDocument<'a> {
    tool_id: &'a str,
    tool_version: &'a str,
    params: &'a DestinationParams,
}

impl DefinitionKey {
    /// Derives the key; parameter order does not matter
    pub fn derive(tool_id: &str, tool_version: &str, params: &DestinationParams) -> Self {
        let document = KeyDocument {
            tool_id,
            tool_version,
            params,
        };
        // Serialising an ordered map of plain values cannot fail
        let canonical = serde_json::to_vec(&document).unwrap_or_default();

        Self {
            tool_id: tool_id.to_string(),
            digest: format!("{:x}", Sha256::digest(&canonical)),
        }
    }

    /// Full SHA-256 hex digest
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Deterministic remote name used for lookup-before-create
    pub fn definition_name(&self) -> String {
        let tool: String = self
            .tool_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let suffix = &self.digest[..16];
        // "relay-" + tool + "-" + suffix
        let budget = MAX_NAME_LEN - 6 - 1 - suffix.len();
        let tool: String = tool.chars().take(budget).collect();

        format!("relay-{}-{}", tool, suffix)
    }
}

impl std::fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest)
    }
}
