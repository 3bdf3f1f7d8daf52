use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DatastoreConfig;
use crate::context::{Closed, Context, TransactionKind};
use crate::error::{Error, Result};
use crate::ids::{ElementId, PatchId, RecordId, SchemaId, Stamp, StoreId, Version, MAX_VERSION};
use crate::record::Record;
use crate::schema::Schema;
use crate::table::{Table, TableUpdate};
use crate::traits::{Adapter, Clock, LamportClock};
use crate::transaction::{
    ChangeContent, ChangedArgs, History, Message, PatchContent, TablePatch, Transaction,
    TransactionLog,
};

pub type SubscriptionId = u64;

/// Notification delivered synchronously to subscribers, in subscription order.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    Changed(ChangedArgs),
    Disposed,
}

type Subscriber = Box<dyn FnMut(&StoreEvent)>;

/// A committed local transaction, kept for undo/redo.
#[derive(Clone, Debug, PartialEq)]
struct HistoryEntry {
    patch_id: PatchId,
    change: ChangeContent,
    patch: PatchContent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub schema: Schema,
    pub records: Vec<Record>,
}

/// Complete persistent state of one replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub store_id: StoreId,
    pub version: Version,
    pub tables: BTreeMap<SchemaId, SnapshotTable>,
    pub transactions: Vec<Transaction>,
}

/// One replica of the collaborative datastore.
///
/// Owns every table, the open transaction (if any), the transaction log and the undo/redo
/// stacks. All mutation goes through a transaction: `mutate`, or an explicit
/// `begin_transaction`/`end_transaction` pair. Each committed transaction that produced
/// patches is broadcast once through the adapter and announced with a single
/// `StoreEvent::Changed`.
pub struct Datastore<A, C = LamportClock>
where
    A: Adapter,
    C: Clock,
{
    store_id: StoreId,
    adapter: A,
    clock: C,
    tables: BTreeMap<SchemaId, Table>,
    context: Context,
    log: TransactionLog,
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    undo_limit: usize,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
    caught_up: bool,
    disposed: bool,
}

impl<A, C> fmt::Debug for Datastore<A, C>
where
    A: Adapter,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("store_id", &self.store_id)
            .field("version", &self.clock.now())
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("in_transaction", &self.context.in_transaction())
            .field("transactions", &self.log.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn resolve_store_id<A: Adapter>(requested: Option<StoreId>, adapter: &mut A) -> Result<StoreId> {
    let store_id = match requested {
        Some(id) => id,
        None => adapter.create_store_id()?,
    };
    if store_id == 0 {
        return Err(Error::InvalidStoreId(store_id));
    }
    Ok(store_id)
}

type IdRenames = BTreeMap<(SchemaId, RecordId, String), HashMap<ElementId, ElementId>>;

// Pair the ids a reverted patch removed with the ids its inverse inserted, per field.
// Both sets occupy the same positions, and positions follow id order.
fn id_renames(reverted: &PatchContent, inverse: &PatchContent) -> IdRenames {
    let mut renames = IdRenames::new();
    for (schema_id, records) in reverted {
        for (record_id, fields) in records {
            for (field, patch) in fields {
                let Some(inverse_patch) = inverse
                    .get(schema_id)
                    .and_then(|records| records.get(record_id))
                    .and_then(|fields| fields.get(field))
                else {
                    continue;
                };
                let (Some(mut before), Some(mut after)) =
                    (patch.reinserted_ids(), inverse_patch.inserted_ids())
                else {
                    continue;
                };
                if before.is_empty() || before.len() != after.len() {
                    continue;
                }
                before.sort();
                after.sort();
                renames.insert(
                    (schema_id.clone(), record_id.clone(), field.clone()),
                    before.into_iter().zip(after).collect(),
                );
            }
        }
    }
    renames
}

impl<A, C> Datastore<A, C>
where
    A: Adapter,
    C: Clock,
{
    /// Create an empty replica with one table per configured schema.
    pub fn new(config: DatastoreConfig, mut adapter: A, clock: C) -> Result<Self> {
        config.validate()?;
        let store_id = resolve_store_id(config.store_id, &mut adapter)?;
        let tables = config
            .schemas
            .into_iter()
            .map(|schema| (schema.id.clone(), Table::create(schema)))
            .collect();
        Ok(Self::assemble(
            store_id,
            adapter,
            clock,
            tables,
            TransactionLog::new(),
            config.undo_limit,
        ))
    }

    /// Rebuild a replica from a snapshot.
    ///
    /// Configured schemas missing from the snapshot get empty tables; a configured schema that
    /// differs from the stored one is rejected. The undo/redo history is not persisted.
    pub fn restore(
        config: DatastoreConfig,
        adapter: A,
        mut clock: C,
        snapshot: Snapshot,
    ) -> Result<Self> {
        config.validate()?;
        if config.store_id.map_or(false, |id| id != snapshot.store_id) {
            return Err(Error::InvalidOperation(format!(
                "snapshot belongs to store {}, not {:?}",
                snapshot.store_id, config.store_id
            )));
        }
        let store_id = snapshot.store_id;
        if store_id == 0 {
            return Err(Error::InvalidStoreId(store_id));
        }

        let mut tables = BTreeMap::new();
        for (schema_id, stored) in snapshot.tables {
            if stored.schema.id != schema_id {
                return Err(Error::InconsistentState(format!(
                    "snapshot table `{schema_id}` holds schema `{}`",
                    stored.schema.id
                )));
            }
            stored.schema.validate()?;
            tables.insert(schema_id, Table::from_records(stored.schema, stored.records)?);
        }
        for schema in config.schemas {
            match tables.get(&schema.id) {
                Some(table) if table.schema() != &schema => {
                    return Err(Error::InvalidSchema(format!(
                        "schema `{}` differs from the one in the snapshot",
                        schema.id
                    )))
                }
                Some(_) => {}
                None => {
                    tables.insert(schema.id.clone(), Table::create(schema));
                }
            }
        }

        let log = TransactionLog::from_transactions(snapshot.transactions);
        clock.observe(snapshot.version.max(log.latest_version()));
        Ok(Self::assemble(store_id, adapter, clock, tables, log, config.undo_limit))
    }

    fn assemble(
        store_id: StoreId,
        adapter: A,
        clock: C,
        tables: BTreeMap<SchemaId, Table>,
        log: TransactionLog,
        undo_limit: usize,
    ) -> Self {
        let context = Context::new(Stamp::new(clock.now(), store_id));
        Self {
            store_id,
            adapter,
            clock,
            tables,
            context,
            log,
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            undo_limit,
            subscribers: Vec::new(),
            next_subscription: 0,
            caught_up: false,
            disposed: false,
        }
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Latest version this replica has produced or observed.
    pub fn version(&self) -> Version {
        self.clock.now()
    }

    pub fn in_transaction(&self) -> bool {
        self.context.in_transaction()
    }

    /// Whether a `patch-history` message has been applied.
    pub fn is_caught_up(&self) -> bool {
        self.caught_up
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn table(&self, schema_id: &str) -> Result<&Table> {
        self.tables
            .get(schema_id)
            .ok_or_else(|| Error::UnknownSchema(schema_id.to_owned()))
    }

    /// Tables in ascending schema id order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> + '_ {
        self.tables.values()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    pub fn create_table(&mut self, schema: Schema) -> Result<()> {
        self.ensure_live()?;
        schema.validate()?;
        if self.tables.contains_key(&schema.id) {
            return Err(Error::DuplicateTable(schema.id));
        }
        self.tables.insert(schema.id.clone(), Table::create(schema));
        Ok(())
    }

    /// Remove a table and return it. Undo entries referring to it become partial no-ops.
    pub fn delete_table(&mut self, schema_id: &str) -> Result<Table> {
        self.ensure_live()?;
        if self.in_transaction() {
            return Err(Error::InvalidOperation(
                "tables cannot be deleted inside a transaction".into(),
            ));
        }
        self.tables
            .remove(schema_id)
            .ok_or_else(|| Error::UnknownSchema(schema_id.to_owned()))
    }

    fn begin(&mut self, kind: TransactionKind, message: &str) -> Result<PatchId> {
        self.ensure_live()?;
        if self.context.in_transaction() {
            return Err(Error::RecursiveMutate);
        }
        if self.clock.now() >= MAX_VERSION {
            return Err(Error::VersionOverflow);
        }
        let stamp = Stamp::new(self.clock.tick(), self.store_id);
        let patch_id = self.context.begin(stamp, kind, message);
        log::debug!("store {} begins {patch_id} ({kind:?}) {message}", self.store_id);
        Ok(patch_id)
    }

    /// Open a transaction. Fails with `RecursiveMutate` if one is already open.
    pub fn begin_transaction(&mut self) -> Result<PatchId> {
        self.begin(TransactionKind::Edit, "")
    }

    /// Close the open transaction, broadcasting and announcing what it produced.
    pub fn end_transaction(&mut self) -> Result<()> {
        let closed = self.context.finish().ok_or(Error::OutsideTransaction)?;
        self.commit(closed)
    }

    /// Run `f` inside a transaction.
    ///
    /// An error returned by `f` is logged and does not roll back updates already applied;
    /// the transaction is committed either way.
    pub fn mutate<F>(&mut self, message: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin(TransactionKind::Edit, message)?;
        if let Err(e) = f(self) {
            log::error!("store {}: mutate `{message}` failed: {e}", self.store_id);
        }
        match self.context.finish() {
            Some(closed) => self.commit(closed),
            // `f` closed the transaction itself.
            None => Ok(()),
        }
    }

    /// Apply local updates to one table. Only valid inside a transaction.
    pub fn update(&mut self, schema_id: &str, updates: TableUpdate) -> Result<()> {
        self.ensure_live()?;
        if !self.context.in_transaction() {
            return Err(Error::OutsideTransaction);
        }
        let table = self
            .tables
            .get_mut(schema_id)
            .ok_or_else(|| Error::UnknownSchema(schema_id.to_owned()))?;
        table.update(&mut self.context, updates)
    }

    fn commit(&mut self, closed: Closed) -> Result<()> {
        let Closed {
            stamp,
            patch_id,
            kind,
            message,
            change,
            patch,
        } = closed;

        let mut outcome = Ok(());
        if !patch.is_empty() {
            let transaction = Transaction {
                patch_id: patch_id.clone(),
                store_id: self.store_id,
                version: stamp.version,
                content: patch.clone(),
            };
            if let Err(e) = self.adapter.broadcast(std::slice::from_ref(&transaction)) {
                log::warn!("store {}: broadcast of {patch_id} failed: {e}", self.store_id);
                outcome = Err(e);
            }
            self.log.append(transaction);

            let entry = HistoryEntry {
                patch_id: patch_id.clone(),
                change: change.clone(),
                patch: patch.clone(),
            };
            match kind {
                TransactionKind::Edit => {
                    self.push_undo(entry);
                    self.redo_stack.clear();
                }
                TransactionKind::Undo => self.redo_stack.push(entry),
                TransactionKind::Redo => self.push_undo(entry),
            }
        }

        log::debug!(
            "store {} commits {patch_id} {message}: {} table(s) changed",
            self.store_id,
            change.len()
        );
        if !change.is_empty() {
            self.emit(StoreEvent::Changed(ChangedArgs {
                store_id: self.store_id,
                version: stamp.version,
                change,
                patch,
            }));
        }
        outcome
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        if self.undo_limit == 0 {
            return;
        }
        self.undo_stack.push_back(entry);
        while self.undo_stack.len() > self.undo_limit {
            self.undo_stack.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    fn invert(&self, entry: &HistoryEntry) -> Result<BTreeMap<SchemaId, TableUpdate>> {
        let empty = TablePatch::new();
        let mut updates = BTreeMap::new();
        for (schema_id, table_change) in &entry.change {
            let Some(table) = self.tables.get(schema_id) else {
                log::warn!("cannot revert {} in deleted table `{schema_id}`", entry.patch_id);
                continue;
            };
            let table_patch = entry.patch.get(schema_id).unwrap_or(&empty);
            let update = table.invert(table_change, table_patch)?;
            if !update.is_empty() {
                updates.insert(schema_id.clone(), update);
            }
        }
        Ok(updates)
    }

    // Put back an entry whose revert never opened a transaction.
    fn shelve(&mut self, entry: HistoryEntry, kind: TransactionKind) {
        match kind {
            TransactionKind::Undo => self.undo_stack.push_back(entry),
            _ => self.redo_stack.push(entry),
        }
    }

    fn revert(&mut self, entry: HistoryEntry, kind: TransactionKind) -> Result<()> {
        let updates = match self.invert(&entry) {
            Ok(updates) => updates,
            Err(e) => {
                self.shelve(entry, kind);
                return Err(e);
            }
        };
        let message = match kind {
            TransactionKind::Undo => format!("undo {}", entry.patch_id),
            _ => format!("redo {}", entry.patch_id),
        };
        let patch_id = match self.begin(kind, &message) {
            Ok(patch_id) => patch_id,
            Err(e) => {
                self.shelve(entry, kind);
                return Err(e);
            }
        };
        for (schema_id, update) in updates {
            if let Err(e) = self.update(&schema_id, update) {
                log::error!("store {}: {message} failed on `{schema_id}`: {e}", self.store_id);
            }
        }
        let outcome = self.end_transaction();
        self.follow_reinserted_ids(&entry, &patch_id);
        outcome
    }

    /// Re-inserted elements get fresh ids; rewrite the remaining history to use them.
    fn follow_reinserted_ids(&mut self, reverted: &HistoryEntry, patch_id: &PatchId) {
        let renames = {
            let Some(replacement) = self
                .undo_stack
                .iter()
                .chain(self.redo_stack.iter())
                .find(|e| &e.patch_id == patch_id)
            else {
                return;
            };
            id_renames(&reverted.patch, &replacement.patch)
        };
        if renames.is_empty() {
            return;
        }
        for entry in self.undo_stack.iter_mut().chain(self.redo_stack.iter_mut()) {
            for ((schema_id, record_id, field), field_renames) in &renames {
                if let Some(patch) = entry
                    .patch
                    .get_mut(schema_id)
                    .and_then(|records| records.get_mut(record_id))
                    .and_then(|fields| fields.get_mut(field))
                {
                    patch.rename_ids(field_renames);
                }
            }
        }
    }

    /// Revert the most recent local transaction. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        if self.in_transaction() {
            return Err(Error::RecursiveMutate);
        }
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        self.revert(entry, TransactionKind::Undo)?;
        Ok(true)
    }

    /// Re-apply the most recently undone transaction. Returns `false` when there is nothing
    /// to redo.
    pub fn redo(&mut self) -> Result<bool> {
        self.ensure_live()?;
        if self.in_transaction() {
            return Err(Error::RecursiveMutate);
        }
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(false);
        };
        self.revert(entry, TransactionKind::Redo)?;
        Ok(true)
    }

    /// Handle inbound traffic from the adapter.
    pub fn handle_message(&mut self, message: Message) -> Result<()> {
        self.ensure_live()?;
        if self.in_transaction() {
            return Err(Error::InvalidOperation(
                "remote transactions cannot be applied inside a transaction".into(),
            ));
        }
        match message {
            Message::RemotePatch(remote) => {
                self.apply_remote(remote.transaction)?;
            }
            Message::PatchHistory(history) => {
                for transaction in history.history.transactions {
                    if let Err(e) = self.apply_remote(transaction) {
                        log::warn!("store {}: skipping history entry: {e}", self.store_id);
                    }
                }
                self.caught_up = true;
            }
        }
        Ok(())
    }

    /// Parse and handle a JSON-encoded message.
    pub fn handle_json(&mut self, json: &str) -> Result<()> {
        let message: Message = serde_json::from_str(json)?;
        self.handle_message(message)
    }

    /// Apply one remote transaction. Returns `false` for a transaction already applied.
    pub fn apply_remote(&mut self, transaction: Transaction) -> Result<bool> {
        self.ensure_live()?;
        if self.in_transaction() {
            return Err(Error::InvalidOperation(
                "remote transactions cannot be applied inside a transaction".into(),
            ));
        }
        if self.log.contains(&transaction.patch_id) {
            log::debug!(
                "store {} ignores duplicate transaction {}",
                self.store_id,
                transaction.patch_id
            );
            return Ok(false);
        }
        if transaction.store_id == 0 || transaction.version == 0 || transaction.version > MAX_VERSION {
            return Err(Error::MalformedPatch(format!(
                "transaction {} has stamp {}@{}",
                transaction.patch_id, transaction.store_id, transaction.version
            )));
        }

        let stamp = transaction.stamp();
        self.clock.observe(stamp.version);
        let mut change = ChangeContent::new();
        for (schema_id, table_patch) in &transaction.content {
            match self.tables.get_mut(schema_id) {
                Some(table) => {
                    let table_change = table.apply_patch(table_patch, stamp);
                    if !table_change.is_empty() {
                        change.insert(schema_id.clone(), table_change);
                    }
                }
                None => log::warn!(
                    "store {}: {} targets unknown table `{schema_id}`",
                    self.store_id,
                    transaction.patch_id
                ),
            }
        }

        if !change.is_empty() {
            self.emit(StoreEvent::Changed(ChangedArgs {
                store_id: transaction.store_id,
                version: transaction.version,
                change,
                patch: transaction.content.clone(),
            }));
        }
        self.log.append(transaction);
        Ok(true)
    }

    /// Every applied transaction, in application order.
    pub fn history(&self) -> History {
        History {
            transactions: self.log.transactions().to_vec(),
        }
    }

    pub fn transactions_since(&self, version: Version) -> Vec<Transaction> {
        self.log.since(version)
    }

    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + 'static,
    {
        self.next_subscription += 1;
        self.subscribers.push((self.next_subscription, Box::new(f)));
        self.next_subscription
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    fn emit(&mut self, event: StoreEvent) {
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&event);
        }
    }

    /// Announce `Disposed` once and drop every subscriber. Later mutation fails with
    /// `Disposed`; reads keep working.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.context.finish();
        self.emit(StoreEvent::Disposed);
        self.subscribers.clear();
        self.disposed = true;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            store_id: self.store_id,
            version: self.clock.now(),
            tables: self
                .tables
                .iter()
                .map(|(id, table)| {
                    (
                        id.clone(),
                        SnapshotTable {
                            schema: table.schema().clone(),
                            records: table.iter().cloned().collect(),
                        },
                    )
                })
                .collect(),
            transactions: self.log.transactions().to_vec(),
        }
    }
}
