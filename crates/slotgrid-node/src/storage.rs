//! RocksDB-backed persistent ledger.
//!
//! Implements [`LedgerStore`] using one column family per entity. Every
//! [`LedgerStore::apply`] is a single atomic [`WriteBatch`]; a mutex
//! serialises the read-check-write of concurrent committers and the lease
//! compare-and-set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use tracing::debug;

use slotgrid_core::apply::{ApplyTarget, apply_batch};
use slotgrid_core::error::{GridError, LeaseError};
use slotgrid_core::traits::{LedgerBatch, LedgerStore, is_near};
use slotgrid_core::types::{
    AreaAggregate, Balance, DepositHash, DepositRecord, Lease, LedgerEntry, Referral,
    ReferralActivation, Rejection, Slot, SlotId, UserId, UserInfo,
};

// --- Column family names ---

const CF_SLOTS: &str = "slots";
const CF_DEPOSITS: &str = "deposits";
const CF_ENTRIES: &str = "entries";
const CF_BALANCES: &str = "balances";
const CF_USERS: &str = "users";
const CF_REFERRALS: &str = "referrals";
const CF_AREAS: &str = "areas";
const CF_ACTIVATIONS: &str = "activations";
const CF_CONFIG: &str = "config";
const CF_REJECTIONS: &str = "rejections";
const CF_META: &str = "meta";

// Slot indexes, keys only. Written in the same batch as the slot.
const CF_USER_SLOTS: &str = "user_slots";
const CF_RUNNING: &str = "running_slots";
const CF_PENDING: &str = "pending_recycle";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_SLOTS,
    CF_DEPOSITS,
    CF_ENTRIES,
    CF_BALANCES,
    CF_USERS,
    CF_REFERRALS,
    CF_AREAS,
    CF_ACTIVATIONS,
    CF_CONFIG,
    CF_REJECTIONS,
    CF_META,
    CF_USER_SLOTS,
    CF_RUNNING,
    CF_PENDING,
];

// --- Metadata keys ---

const META_ENTRY_SEQ: &[u8] = b"entry_seq";
const META_ACTIVATION_SEQ: &[u8] = b"activation_seq";
const META_LEASE: &[u8] = b"lease";

fn storage_err(e: impl std::fmt::Display) -> GridError {
    GridError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, GridError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, GridError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(value)
}

/// Big-endian id key for ordered iteration.
fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Composite key: `prefix(BE) || seq(BE)`.
fn pair_key(prefix: u64, seq: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&prefix.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn read_u64(bytes: &[u8]) -> Result<u64, GridError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| GridError::Storage("invalid counter length".into()))?;
    Ok(u64::from_be_bytes(arr))
}

/// Persistent ledger backed by RocksDB.
pub struct RocksLedger {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksLedger {
    /// Open or create a ledger database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;
        debug!(path = %path.as_ref().display(), "opened ledger column families");
        Ok(Self { db, write_lock: Mutex::new(()) })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), GridError> {
        self.db.flush().map_err(storage_err)
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, GridError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GridError::Storage(format!("missing column family: {name}")))
    }

    fn get<T: bincode::Decode<()>>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, GridError> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, cf: &str, key: &[u8]) -> Result<bool, GridError> {
        let cf = self.cf_handle(cf)?;
        Ok(self.db.get_pinned_cf(cf, key).map_err(storage_err)?.is_some())
    }

    fn meta_u64(&self, key: &[u8]) -> Result<u64, GridError> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key).map_err(storage_err)? {
            Some(bytes) => read_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Decode every value of `cf` in key order, starting at `mode`, while
    /// `keep_going` holds for the raw key.
    fn scan<T: bincode::Decode<()>>(
        &self,
        cf: &str,
        mode: IteratorMode<'_>,
        keep_going: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<T>, GridError> {
        let cf = self.cf_handle(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item.map_err(storage_err)?;
            if !keep_going(&key[..]) {
                break;
            }
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Slot ids taken from the trailing 8 bytes of every key in an index CF.
    fn index_ids(&self, cf: &str, mode: IteratorMode<'_>, prefix: Option<u64>) -> Result<Vec<SlotId>, GridError> {
        let cf = self.cf_handle(cf)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, _) = item.map_err(storage_err)?;
            if let Some(p) = prefix {
                if key.len() != 16 || key[..8] != p.to_be_bytes() {
                    break;
                }
            }
            ids.push(read_u64(&key[key.len().saturating_sub(8)..])?);
        }
        Ok(ids)
    }

    fn slots_by_id(&self, ids: &[SlotId]) -> Result<Vec<Slot>, GridError> {
        let cf = self.cf_handle(CF_SLOTS)?;
        let keys: Vec<[u8; 8]> = ids.iter().map(|id| id_key(*id)).collect();
        let mut slots = Vec::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(self.db.multi_get_cf(keys.iter().map(|k| (cf, k)))) {
            match result.map_err(storage_err)? {
                Some(bytes) => slots.push(decode(&bytes)?),
                None => return Err(GridError::Storage(format!("index points at missing slot {id}"))),
            }
        }
        Ok(slots)
    }

    /// Values under an 8-byte big-endian key prefix.
    fn with_prefix<T: bincode::Decode<()>>(&self, cf: &str, prefix: u64) -> Result<Vec<T>, GridError> {
        let start = pair_key(prefix, 0);
        let expected = prefix.to_be_bytes();
        self.scan(cf, IteratorMode::From(&start, Direction::Forward), |key| {
            key.len() == 16 && key[..8] == expected
        })
    }
}

/// Write set for one [`LedgerStore::apply`] call.
///
/// Puts go to the pending [`WriteBatch`] and to a cache that later reads of
/// the same batch consult first.
struct WorkingSet<'a> {
    store: &'a RocksLedger,
    batch: WriteBatch,
    slots: BTreeMap<SlotId, Slot>,
    deposits: HashSet<DepositHash>,
    referrals: HashSet<UserId>,
    balances: HashMap<UserId, Balance>,
    areas: HashMap<UserId, AreaAggregate>,
    entry_seq: Option<u64>,
    activation_seq: Option<u64>,
}

impl<'a> WorkingSet<'a> {
    fn new(store: &'a RocksLedger) -> Self {
        Self {
            store,
            batch: WriteBatch::default(),
            slots: BTreeMap::new(),
            deposits: HashSet::new(),
            referrals: HashSet::new(),
            balances: HashMap::new(),
            areas: HashMap::new(),
            entry_seq: None,
            activation_seq: None,
        }
    }

    fn put<T: bincode::Encode>(&mut self, cf: &str, key: &[u8], value: &T) -> Result<(), GridError> {
        let bytes = encode(value)?;
        let cf = self.store.cf_handle(cf)?;
        self.batch.put_cf(cf, key, bytes);
        Ok(())
    }

    fn bump(&mut self, counter: &[u8], cached: Option<u64>) -> Result<u64, GridError> {
        let last = match cached {
            Some(v) => v,
            None => self.store.meta_u64(counter)?,
        };
        Ok(last + 1)
    }

    fn index_slot(&mut self, slot: &Slot) -> Result<(), GridError> {
        let key = id_key(slot.id);
        let user_slots = self.store.cf_handle(CF_USER_SLOTS)?;
        self.batch.put_cf(user_slots, pair_key(slot.user, slot.id), b"");
        let running = self.store.cf_handle(CF_RUNNING)?;
        if slot.is_running() {
            self.batch.put_cf(running, key, b"");
        } else {
            self.batch.delete_cf(running, key);
        }
        let pending = self.store.cf_handle(CF_PENDING)?;
        if !slot.is_running() && !slot.compacted {
            self.batch.put_cf(pending, key, b"");
        } else {
            self.batch.delete_cf(pending, key);
        }
        Ok(())
    }

    /// Write counters and hand back the batch.
    fn finish(mut self) -> Result<WriteBatch, GridError> {
        let meta = self.store.cf_handle(CF_META)?;
        if let Some(seq) = self.entry_seq {
            self.batch.put_cf(meta, META_ENTRY_SEQ, seq.to_be_bytes());
        }
        if let Some(seq) = self.activation_seq {
            self.batch.put_cf(meta, META_ACTIVATION_SEQ, seq.to_be_bytes());
        }
        Ok(self.batch)
    }
}

impl ApplyTarget for WorkingSet<'_> {
    fn slot(&mut self, id: SlotId) -> Result<Option<Slot>, GridError> {
        match self.slots.get(&id) {
            Some(slot) => Ok(Some(slot.clone())),
            None => self.store.get_slot(id),
        }
    }

    fn slots_after(&mut self, id: SlotId) -> Result<Vec<Slot>, GridError> {
        let mut merged: BTreeMap<SlotId, Slot> =
            self.store.slots_after(id)?.into_iter().map(|s| (s.id, s)).collect();
        for (sid, slot) in self.slots.range(id.saturating_add(1)..) {
            if *sid > id {
                merged.insert(*sid, slot.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    fn next_slot_id(&mut self) -> Result<SlotId, GridError> {
        let committed = self.store.next_slot_id()?;
        let staged = self.slots.keys().next_back().map_or(1, |id| id + 1);
        Ok(committed.max(staged))
    }

    fn deposit_exists(&mut self, hash: &DepositHash) -> Result<bool, GridError> {
        Ok(self.deposits.contains(hash) || self.store.contains(CF_DEPOSITS, hash.as_str().as_bytes())?)
    }

    fn referral_exists(&mut self, user: UserId) -> Result<bool, GridError> {
        Ok(self.referrals.contains(&user) || self.store.contains(CF_REFERRALS, &id_key(user))?)
    }

    fn balance(&mut self, user: UserId) -> Result<Option<Balance>, GridError> {
        match self.balances.get(&user) {
            Some(b) => Ok(Some(b.clone())),
            None => self.store.balance(user),
        }
    }

    fn area(&mut self, user: UserId) -> Result<Option<AreaAggregate>, GridError> {
        match self.areas.get(&user) {
            Some(a) => Ok(Some(a.clone())),
            None => self.store.area(user),
        }
    }

    fn next_entry_seq(&mut self) -> Result<u64, GridError> {
        let seq = self.bump(META_ENTRY_SEQ, self.entry_seq)?;
        self.entry_seq = Some(seq);
        Ok(seq)
    }

    fn put_slot(&mut self, slot: Slot) -> Result<(), GridError> {
        self.put(CF_SLOTS, &id_key(slot.id), &slot)?;
        self.index_slot(&slot)?;
        self.slots.insert(slot.id, slot);
        Ok(())
    }

    fn put_deposit(&mut self, record: DepositRecord) -> Result<(), GridError> {
        self.put(CF_DEPOSITS, record.hash.as_str().as_bytes(), &record)?;
        self.deposits.insert(record.hash);
        Ok(())
    }

    fn put_entry(&mut self, entry: LedgerEntry) -> Result<(), GridError> {
        self.put(CF_ENTRIES, &pair_key(entry.source_slot, entry.seq), &entry)
    }

    fn put_balance(&mut self, balance: Balance) -> Result<(), GridError> {
        self.put(CF_BALANCES, &id_key(balance.user), &balance)?;
        self.balances.insert(balance.user, balance);
        Ok(())
    }

    fn put_area(&mut self, area: AreaAggregate) -> Result<(), GridError> {
        self.put(CF_AREAS, &id_key(area.user), &area)?;
        self.areas.insert(area.user, area);
        Ok(())
    }

    fn put_user_info(&mut self, info: UserInfo) -> Result<(), GridError> {
        self.put(CF_USERS, &id_key(info.user), &info)
    }

    fn put_referral(&mut self, referral: Referral) -> Result<(), GridError> {
        self.put(CF_REFERRALS, &id_key(referral.user), &referral)?;
        self.referrals.insert(referral.user);
        Ok(())
    }

    fn put_activation(&mut self, activation: ReferralActivation) -> Result<(), GridError> {
        let seq = self.bump(META_ACTIVATION_SEQ, self.activation_seq)?;
        self.activation_seq = Some(seq);
        self.put(CF_ACTIVATIONS, &pair_key(activation.referrer, seq), &activation)
    }

    fn put_rejection(&mut self, rejection: Rejection) -> Result<(), GridError> {
        self.put(CF_REJECTIONS, rejection.hash.as_bytes(), &rejection)
    }
}

impl LedgerStore for RocksLedger {
    fn get_slot(&self, id: SlotId) -> Result<Option<Slot>, GridError> {
        self.get(CF_SLOTS, &id_key(id))
    }

    fn last_running_slot(&self) -> Result<Option<Slot>, GridError> {
        let cf = self.cf_handle(CF_RUNNING)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.map_err(storage_err)?;
                self.get_slot(read_u64(&key)?)
            }
            None => Ok(None),
        }
    }

    fn running_slots(&self) -> Result<Vec<Slot>, GridError> {
        let ids = self.index_ids(CF_RUNNING, IteratorMode::Start, None)?;
        self.slots_by_id(&ids)
    }

    fn user_slots(&self, user: UserId) -> Result<Vec<Slot>, GridError> {
        let start = pair_key(user, 0);
        let ids = self.index_ids(CF_USER_SLOTS, IteratorMode::From(&start, Direction::Forward), Some(user))?;
        self.slots_by_id(&ids)
    }

    fn slots_after(&self, id: SlotId) -> Result<Vec<Slot>, GridError> {
        let Some(start) = id.checked_add(1) else {
            return Ok(Vec::new());
        };
        let key = id_key(start);
        self.scan(CF_SLOTS, IteratorMode::From(&key, Direction::Forward), |_| true)
    }

    fn slots_pending_recycle(&self) -> Result<Vec<Slot>, GridError> {
        let ids = self.index_ids(CF_PENDING, IteratorMode::Start, None)?;
        self.slots_by_id(&ids)
    }

    fn running_slots_near(&self, row: u64, col: u8, span: u64) -> Result<Vec<Slot>, GridError> {
        Ok(self
            .running_slots()?
            .into_iter()
            .filter(|s| is_near(s, row, col, span))
            .collect())
    }

    fn next_slot_id(&self) -> Result<SlotId, GridError> {
        let cf = self.cf_handle(CF_SLOTS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.map_err(storage_err)?;
                Ok(read_u64(&key)? + 1)
            }
            None => Ok(1),
        }
    }

    fn deposits_by_hash(
        &self,
        hashes: &[DepositHash],
    ) -> Result<HashMap<DepositHash, DepositRecord>, GridError> {
        let cf = self.cf_handle(CF_DEPOSITS)?;
        let keys = hashes.iter().map(|h| (cf, h.as_str().as_bytes()));
        let mut found = HashMap::new();
        for (hash, result) in hashes.iter().zip(self.db.multi_get_cf(keys)) {
            if let Some(bytes) = result.map_err(storage_err)? {
                found.insert(hash.clone(), decode(&bytes)?);
            }
        }
        Ok(found)
    }

    fn referral(&self, user: UserId) -> Result<Option<Referral>, GridError> {
        self.get(CF_REFERRALS, &id_key(user))
    }

    fn user_info(&self, user: UserId) -> Result<Option<UserInfo>, GridError> {
        self.get(CF_USERS, &id_key(user))
    }

    fn area(&self, user: UserId) -> Result<Option<AreaAggregate>, GridError> {
        self.get(CF_AREAS, &id_key(user))
    }

    fn balance(&self, user: UserId) -> Result<Option<Balance>, GridError> {
        self.get(CF_BALANCES, &id_key(user))
    }

    fn entries_for_slot(&self, source: SlotId) -> Result<Vec<LedgerEntry>, GridError> {
        self.with_prefix(CF_ENTRIES, source)
    }

    fn activations(&self, referrer: UserId) -> Result<Vec<ReferralActivation>, GridError> {
        self.with_prefix(CF_ACTIVATIONS, referrer)
    }

    fn rejection(&self, hash: &str) -> Result<Option<Rejection>, GridError> {
        self.get(CF_REJECTIONS, hash.as_bytes())
    }

    fn config_values(&self, keys: &[&str]) -> Result<HashMap<String, i64>, GridError> {
        let cf = self.cf_handle(CF_CONFIG)?;
        let mut values = HashMap::new();
        for key in keys {
            if let Some(bytes) = self.db.get_cf(cf, key.as_bytes()).map_err(storage_err)? {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| GridError::Storage(format!("invalid config value for {key}")))?;
                values.insert(key.to_string(), i64::from_be_bytes(arr));
            }
        }
        Ok(values)
    }

    fn set_config_value(&self, key: &str, value: i64) -> Result<(), GridError> {
        let cf = self.cf_handle(CF_CONFIG)?;
        self.db.put_cf(cf, key.as_bytes(), value.to_be_bytes()).map_err(storage_err)
    }

    fn apply(&self, batch: LedgerBatch) -> Result<(), GridError> {
        let _guard = self.write_lock.lock();
        let mut working = WorkingSet::new(self);
        apply_batch(&mut working, batch)?;
        let write = working.finish()?;
        self.db.write(write).map_err(storage_err)
    }

    fn try_acquire_lease(&self, owner: &str, now: i64, ttl_secs: i64) -> Result<Lease, GridError> {
        let _guard = self.write_lock.lock();
        if let Some(held) = self.get::<Lease>(CF_META, META_LEASE)? {
            if held.owner != owner && !held.is_expired(now) {
                return Err(LeaseError::Held { owner: held.owner, expires_at: held.expires_at }.into());
            }
        }
        let lease = Lease { owner: owner.to_string(), expires_at: now + ttl_secs };
        let cf = self.cf_handle(CF_META)?;
        self.db.put_cf(cf, META_LEASE, encode(&lease)?).map_err(storage_err)?;
        Ok(lease)
    }

    fn release_lease(&self, owner: &str) -> Result<bool, GridError> {
        let _guard = self.write_lock.lock();
        match self.get::<Lease>(CF_META, META_LEASE)? {
            Some(held) if held.owner == owner => {
                let cf = self.cf_handle(CF_META)?;
                self.db.delete_cf(cf, META_LEASE).map_err(storage_err)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
