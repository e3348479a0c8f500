// Wrapper around a Yjs document (yrs).
//
// The coordinator treats the CRDT as a black box: apply opaque update
// bytes, encode the full state back out. No conflict resolution or
// shared-type access happens here.

use anyhow::{Context, Result};
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// One room's in-memory document state.
pub struct SessionDoc {
    doc: Doc,
}

impl SessionDoc {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Load a document from a persisted full-state snapshot.
    pub fn from_state(data: &[u8]) -> Result<Self> {
        let doc = Self::new();
        doc.apply_update(data).context("failed to hydrate document from snapshot")?;
        Ok(doc)
    }

    /// Apply an incremental binary update to the document.
    pub fn apply_update(&self, data: &[u8]) -> Result<()> {
        let update = Update::decode_v1(data).context("failed to decode Yjs update")?;
        self.doc.transact_mut().apply_update(update).context("failed to apply Yjs update")?;
        Ok(())
    }

    /// Encode the full document state as a binary blob. This is what new
    /// joiners receive and what gets flushed to durable storage.
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for SessionDoc {
    fn default() -> Self {
        Self::new()
    }
}
