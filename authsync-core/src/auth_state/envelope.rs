//! Versioned persistence envelope for [`AuthState`].
//!
//! Every historical layout is a variant of [`VersionedEnvelope`] with its own migration to the
//! current one. Unknown versions are rejected, never guessed at.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AuthSource, AuthState};
use crate::storage::{StorageError, StorageResult};

/// Layout written by this version of the crate.
pub const CURRENT_ENVELOPE_VERSION: u32 = 2;

/// Bookkeeping stored next to the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// When the first state of this lineage was written.
    pub created_at: u64,
    /// When this state was written.
    pub updated_at: u64,
    /// Context that wrote this state.
    pub source: AuthSource,
}

/// Current envelope layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAuthState {
    /// Always [`CURRENT_ENVELOPE_VERSION`] once decoded.
    pub version: u32,
    /// The wrapped state.
    pub state: AuthState,
    /// Write bookkeeping.
    pub metadata: EnvelopeMetadata,
}

/// Version 1 layout: no metadata block, a single save time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeV1 {
    state: AuthState,
    saved_at: u64,
}

/// Decoded envelope, keyed by its `version` field.
#[derive(Debug, Clone)]
enum VersionedEnvelope {
    V1(EnvelopeV1),
    V2(StoredAuthState),
}

impl VersionedEnvelope {
    fn parse(raw: &str) -> StorageResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| StorageError::Serialization("missing envelope version".to_string()))?;
        match version {
            1 => Ok(Self::V1(serde_json::from_value(value)?)),
            2 => Ok(Self::V2(serde_json::from_value(value)?)),
            other => Err(StorageError::UnsupportedEnvelopeVersion(other)),
        }
    }

    fn migrate(self) -> StoredAuthState {
        match self {
            Self::V1(v1) => migrate_v1(v1),
            Self::V2(current) => current,
        }
    }
}

fn migrate_v1(v1: EnvelopeV1) -> StoredAuthState {
    let source = v1.state.source;
    StoredAuthState {
        version: CURRENT_ENVELOPE_VERSION,
        state: v1.state,
        metadata: EnvelopeMetadata {
            created_at: v1.saved_at,
            updated_at: v1.saved_at,
            source,
        },
    }
}

impl StoredAuthState {
    /// Wraps `state` written at `now`. `created_at` carries over from the envelope being replaced.
    #[must_use]
    pub const fn new(state: AuthState, created_at: Option<u64>, now: u64) -> Self {
        let source = state.source;
        let created_at = match created_at {
            Some(created_at) => created_at,
            None => now,
        };
        Self {
            version: CURRENT_ENVELOPE_VERSION,
            state,
            metadata: EnvelopeMetadata {
                created_at,
                updated_at: now,
                source,
            },
        }
    }

    /// Encodes the envelope as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn serialize(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes any known envelope version and migrates it to the current layout.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for malformed payloads and
    /// [`StorageError::UnsupportedEnvelopeVersion`] for versions this build does not know.
    pub fn deserialize(raw: &str) -> StorageResult<Self> {
        VersionedEnvelope::parse(raw).map(VersionedEnvelope::migrate)
    }
}
