//! Classified chain-sync events as sent to clients.

use serde::{Deserialize, Serialize};

/// Control frame telling clients the upstream configuration changed.
pub const REFRESH_NOTICE: &str = "refresh";

/// A classified chain-sync event.
///
/// Serialized with a `type` tag carrying the upstream wire name, so the
/// browser client sees the same shape the chain-sync tool emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A new block was applied.
    #[serde(rename = "chainsync.block")]
    Block {
        /// Normalized UTC time, or the upstream text when it did not parse.
        #[serde(default)]
        timestamp: String,
        /// Where the block sits.
        context: BlockContext,
        /// Block details.
        payload: BlockPayload,
    },

    /// The chain rolled back.
    #[serde(rename = "chainsync.rollback")]
    Rollback {
        /// Normalized UTC time, or the upstream text when it did not parse.
        #[serde(default)]
        timestamp: String,
        /// Network the rollback happened on.
        #[serde(default)]
        context: RollbackContext,
        /// The rollback point.
        payload: RollbackPayload,
    },

    /// A transaction seen in a block.
    #[serde(rename = "chainsync.transaction")]
    Transaction {
        /// Normalized UTC time, or the upstream text when it did not parse.
        #[serde(default)]
        timestamp: String,
        /// Block and position of the transaction.
        context: TransactionContext,
        /// Transaction details.
        #[serde(default)]
        payload: TransactionPayload,
    },
}

impl Event {
    /// Which kind of event this is.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Block { .. } => EventKind::Block,
            Self::Rollback { .. } => EventKind::Rollback,
            Self::Transaction { .. } => EventKind::Transaction,
        }
    }

    /// Display timestamp.
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Block { timestamp, .. }
            | Self::Rollback { timestamp, .. }
            | Self::Transaction { timestamp, .. } => timestamp,
        }
    }

    pub(crate) fn timestamp_mut(&mut self) -> &mut String {
        match self {
            Self::Block { timestamp, .. }
            | Self::Rollback { timestamp, .. }
            | Self::Transaction { timestamp, .. } => timestamp,
        }
    }
}

/// Discriminant of an [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `chainsync.block`
    Block,
    /// `chainsync.rollback`
    Rollback,
    /// `chainsync.transaction`
    Transaction,
}

impl EventKind {
    /// Every kind, in wire-tag order.
    pub const ALL: [Self; 3] = [Self::Block, Self::Rollback, Self::Transaction];

    /// Upstream wire tag, also used as the event-type filter value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "chainsync.block",
            Self::Rollback => "chainsync.rollback",
            Self::Transaction => "chainsync.transaction",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    /// Field names that belong in the `context` section.
    pub(crate) fn context_fields(self) -> &'static [&'static str] {
        match self {
            Self::Block => &["blockNumber", "slotNumber", "networkMagic"],
            Self::Rollback => &["networkMagic"],
            Self::Transaction => &[
                "blockNumber",
                "slotNumber",
                "transactionHash",
                "transactionIdx",
                "networkMagic",
            ],
        }
    }

    /// Field names that belong in the `payload` section.
    pub(crate) fn payload_fields(self) -> &'static [&'static str] {
        match self {
            Self::Block => &["blockHash", "issuerVkey", "blockBodySize", "transactionCount"],
            Self::Rollback => &["blockHash", "slotNumber"],
            Self::Transaction => &["blockHash", "fee", "ttl", "inputs", "outputs"],
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of a block event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockContext {
    /// Block height.
    pub block_number: u64,
    /// Slot the block was minted in.
    #[serde(default)]
    pub slot_number: u64,
    /// Network identifier.
    #[serde(default)]
    pub network_magic: u32,
}

/// Payload of a block event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPayload {
    /// Hex block hash.
    pub block_hash: String,
    /// Hex verification key of the issuing pool.
    #[serde(default)]
    pub issuer_vkey: String,
    /// Body size in bytes.
    #[serde(default)]
    pub block_body_size: u64,
    /// Transactions in the block.
    #[serde(default)]
    pub transaction_count: u64,
}

/// Context of a rollback event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackContext {
    /// Network identifier.
    #[serde(default)]
    pub network_magic: u32,
}

/// Point the chain rolled back to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPayload {
    /// Hash of the block rolled back to.
    pub block_hash: String,
    /// Slot rolled back to.
    pub slot_number: u64,
}

/// Context of a transaction event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    /// Height of the containing block.
    pub block_number: u64,
    /// Slot of the containing block.
    #[serde(default)]
    pub slot_number: u64,
    /// Hex transaction id.
    pub transaction_hash: String,
    /// Index within the block.
    #[serde(default)]
    pub transaction_idx: u32,
    /// Network identifier.
    #[serde(default)]
    pub network_magic: u32,
}

/// Payload of a transaction event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    /// Hash of the containing block.
    #[serde(default)]
    pub block_hash: String,
    /// Fee in lovelace.
    #[serde(default)]
    pub fee: u64,
    /// Time-to-live slot.
    #[serde(default)]
    pub ttl: u64,
    /// Spent inputs as `txid#index`.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Outputs are forwarded as-is; their shape depends on the era.
    #[serde(default)]
    pub outputs: Vec<serde_json::Value>,
}
