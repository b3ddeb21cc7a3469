//! Serialization boundary for persisted issues.
//!
//! An issue is saved as a plain [`IssueRecord`] wrapped in an envelope that
//! carries the SHA-256 of the encoded body; decoding refuses a body whose
//! digest does not match.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::graph::node::{Argument, Position};
use crate::{IssueId, PositionId};

pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_id: IssueId,
    pub owner: String,
    pub name: String,
    pub next_position_id: PositionId,
    pub next_argument_id: u64,
    pub revision: u64,
    pub positions: Vec<Position>,
    pub arguments: Vec<Argument>,
    /// Last market price per canonical position.
    #[serde(default)]
    pub prices: BTreeMap<PositionId, f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    sha256: String,
    body: String,
}

pub fn body_sha256(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn encode(record: &IssueRecord) -> Result<String> {
    let body = serde_json::to_string(record)?;
    let envelope = Envelope {
        version: RECORD_VERSION,
        sha256: body_sha256(&body),
        body,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn decode(text: &str) -> Result<IssueRecord> {
    let envelope: Envelope = serde_json::from_str(text).context("issue envelope")?;
    if envelope.version != RECORD_VERSION {
        bail!("unsupported record version {}", envelope.version);
    }
    let actual = body_sha256(&envelope.body);
    if actual != envelope.sha256 {
        bail!("checksum mismatch: stored {} computed {}", envelope.sha256, actual);
    }
    let record: IssueRecord = serde_json::from_str(&envelope.body).context("issue record")?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IssueRecord {
        IssueRecord {
            issue_id: 2,
            owner: "alice".to_string(),
            name: "carbon tax".to_string(),
            next_position_id: 2,
            next_argument_id: 1,
            revision: 2,
            positions: vec![
                Position { id: 0, statement: "tax carbon".to_string(), is_leaf: false, ..Default::default() },
                Position { id: 1, statement: "emissions cause warming".to_string(), ..Default::default() },
            ],
            arguments: vec![Argument {
                id: 0,
                supports_conclusion: true,
                conclusion_id: 0,
                premise_ids: vec![1],
                created_by: "alice".to_string(),
                created_at: 1_700_000_000,
            }],
            prices: BTreeMap::from([(1, 80.0)]),
        }
    }

    #[test]
    fn test_encoded_record_decodes() {
        let record = sample();
        let text = encode(&record).unwrap();
        assert_eq!(decode(&text).unwrap(), record);
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let text = encode(&sample()).unwrap();
        let tampered = text.replace("carbon tax", "carbon cut");
        let err = decode(&tampered).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let text = encode(&sample()).unwrap().replacen("\"version\":1", "\"version\":9", 1);
        assert!(decode(&text).is_err());
    }
}
