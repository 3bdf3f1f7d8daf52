use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::fields::{FieldChange, FieldPatch};
use crate::ids::{PatchId, RecordId, SchemaId, Stamp, StoreId, Version};

/// Field name -> patch for one record.
pub type RecordPatch = BTreeMap<String, FieldPatch>;
/// Record id -> patches for one table.
pub type TablePatch = BTreeMap<RecordId, RecordPatch>;
/// Schema id -> patches; the `content` of a transaction.
pub type PatchContent = BTreeMap<SchemaId, TablePatch>;

pub type RecordChange = BTreeMap<String, FieldChange>;
pub type TableChange = BTreeMap<RecordId, RecordChange>;
pub type ChangeContent = BTreeMap<SchemaId, TableChange>;

/// One atomic batch of field patches produced by a single transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub patch_id: PatchId,
    pub store_id: StoreId,
    pub version: Version,
    pub content: PatchContent,
}

impl Transaction {
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.version, self.store_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteTransactionMessage {
    pub transaction: Transaction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub history: History,
}

/// Inbound traffic delivered by the transport adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    RemotePatch(RemoteTransactionMessage),
    PatchHistory(HistoryMessage),
}

impl Message {
    pub fn remote(transaction: Transaction) -> Self {
        Message::RemotePatch(RemoteTransactionMessage { transaction })
    }

    pub fn history(transactions: Vec<Transaction>) -> Self {
        Message::PatchHistory(HistoryMessage {
            history: History { transactions },
        })
    }
}

/// Payload of the `changed` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedArgs {
    pub store_id: StoreId,
    pub version: Version,
    pub change: ChangeContent,
    pub patch: PatchContent,
}

/// Append-only record of every transaction applied to a datastore, in application order.
#[derive(Clone, Debug, Default)]
pub struct TransactionLog {
    transactions: Vec<Transaction>,
    applied: HashSet<PatchId>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        let applied = transactions.iter().map(|t| t.patch_id.clone()).collect();
        Self {
            transactions,
            applied,
        }
    }

    pub fn contains(&self, patch_id: &PatchId) -> bool {
        self.applied.contains(patch_id)
    }

    /// Returns `false` when a transaction with the same patch id is already logged.
    pub fn append(&mut self, transaction: Transaction) -> bool {
        if !self.applied.insert(transaction.patch_id.clone()) {
            return false;
        }
        self.transactions.push(transaction);
        true
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn since(&self, version: Version) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.version > version)
            .cloned()
            .collect()
    }

    pub fn latest_version(&self) -> Version {
        self.transactions
            .iter()
            .map(|t| t.version)
            .max()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
