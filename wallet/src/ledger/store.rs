//! # LedgerStore — Durable Mint Records
//!
//! ## Tree Layout
//!
//! | Tree          | Key                | Value                  |
//! |---------------|--------------------|------------------------|
//! | `mints`       | `index` (4B BE)    | `bincode(MintRecord)`  |
//! | `commitments` | commitment (32B)   | `index` (4B BE)        |
//! | `serials`     | serial (32B)       | `index` (4B BE)        |
//! | `metadata`    | key (UTF-8)        | value (bytes)          |
//!
//! Metadata keys: `scan_tip` (`bincode(BlockRef)`) and
//! `rebuild_in_progress` (present while a rebuild has cleared the ledger but
//! not finished repopulating it).
//!
//! ## Atomicity
//!
//! Every mutation is one sled transaction across all four trees. A clear
//! writes the rebuild marker in the same transaction that deletes the
//! records, so a crash leaves either the old ledger or an empty ledger that
//! announces itself as mid-rebuild.

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use super::record::MintRecord;
use crate::chain::BlockRef;

/// Metadata key for the last applied block.
const META_SCAN_TIP: &[u8] = b"scan_tip";

/// Metadata key present while a rebuild is incomplete.
const META_REBUILD: &[u8] = b"rebuild_in_progress";

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors from the ledger store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt ledger entry: {0}")]
    Corrupt(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn map_tx_error(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(inner) => StoreError::Sled(inner),
    }
}

/// A record with its encoded value, ready to be written inside a transaction.
struct EncodedRecord {
    index: [u8; 4],
    commitment: [u8; 32],
    serial: [u8; 32],
    value: Vec<u8>,
}

impl EncodedRecord {
    fn new(record: &MintRecord) -> StoreResult<Self> {
        Ok(Self {
            index: record.index.to_be_bytes(),
            commitment: *record.commitment.as_bytes(),
            serial: *record.serial.as_bytes(),
            value: encode(record)?,
        })
    }
}

/// Everything read back from disk when a ledger opens.
#[derive(Debug, Default)]
pub struct LoadedLedger {
    /// All records, ascending by index.
    pub records: Vec<MintRecord>,
    /// Last applied block.
    pub scan_tip: Option<BlockRef>,
    /// A rebuild cleared the ledger and did not finish.
    pub rebuild_in_progress: bool,
    /// Description of the first inconsistency between the record tree and
    /// its indexes, if any.
    pub index_fault: Option<String>,
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// sled-backed persistence for a [`MintLedger`](super::MintLedger).
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: Db,
    mints: Tree,
    commitments: Tree,
    serials: Tree,
    metadata: Tree,
}

impl LedgerStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            mints: db.open_tree("mints")?,
            commitments: db.open_tree("commitments")?,
            serials: db.open_tree("serials")?,
            metadata: db.open_tree("metadata")?,
            db,
        })
    }

    /// Read the full ledger and cross-check the index trees.
    pub fn load(&self) -> StoreResult<LoadedLedger> {
        let mut loaded = LoadedLedger::default();

        for item in self.mints.iter() {
            let (key, value) = item?;
            let record: MintRecord = decode(&value)?;
            if key[..] != record.index.to_be_bytes()[..] {
                return Err(StoreError::Corrupt(format!(
                    "record for index {} stored under another key",
                    record.index
                )));
            }

            if loaded.index_fault.is_none() {
                let by_commitment = self.commitments.get(record.commitment.as_bytes())?;
                let by_serial = self.serials.get(record.serial.as_bytes())?;
                let expected = record.index.to_be_bytes();
                if by_commitment.as_deref() != Some(&expected[..])
                    || by_serial.as_deref() != Some(&expected[..])
                {
                    loaded.index_fault = Some(format!(
                        "index trees disagree with record {}",
                        record.index
                    ));
                }
            }
            loaded.records.push(record);
        }

        if loaded.index_fault.is_none()
            && (self.commitments.len() != loaded.records.len()
                || self.serials.len() != loaded.records.len())
        {
            loaded.index_fault = Some(format!(
                "{} records but {} commitment and {} serial index entries",
                loaded.records.len(),
                self.commitments.len(),
                self.serials.len()
            ));
        }

        loaded.scan_tip = match self.metadata.get(META_SCAN_TIP)? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        loaded.rebuild_in_progress = self.metadata.contains_key(META_REBUILD)?;
        Ok(loaded)
    }

    /// Insert one record with its index entries.
    pub fn insert_record(&self, record: &MintRecord) -> StoreResult<()> {
        self.write_records(std::slice::from_ref(record), None)
    }

    /// Write records (new or updated) and optionally move the scan tip, all
    /// in one transaction.
    pub fn write_records(&self, records: &[MintRecord], tip: Option<BlockRef>) -> StoreResult<()> {
        let encoded = records
            .iter()
            .map(EncodedRecord::new)
            .collect::<StoreResult<Vec<_>>>()?;
        let tip_bytes = tip.as_ref().map(encode).transpose()?;

        (&self.mints, &self.commitments, &self.serials, &self.metadata)
            .transaction(|(mints, commitments, serials, meta)| {
                for r in &encoded {
                    mints.insert(&r.index[..], r.value.as_slice())?;
                    commitments.insert(&r.commitment[..], &r.index[..])?;
                    serials.insert(&r.serial[..], &r.index[..])?;
                }
                if let Some(bytes) = &tip_bytes {
                    meta.insert(META_SCAN_TIP, bytes.as_slice())?;
                }
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(map_tx_error)?;

        self.db.flush()?;
        Ok(())
    }

    /// Delete every record and index entry, forget the scan tip, and set the
    /// rebuild marker.
    pub fn clear_all(&self) -> StoreResult<()> {
        let keys = |tree: &Tree| -> StoreResult<Vec<sled::IVec>> {
            tree.iter()
                .keys()
                .map(|k| k.map_err(StoreError::from))
                .collect()
        };
        let mint_keys = keys(&self.mints)?;
        let commitment_keys = keys(&self.commitments)?;
        let serial_keys = keys(&self.serials)?;

        (&self.mints, &self.commitments, &self.serials, &self.metadata)
            .transaction(|(mints, commitments, serials, meta)| {
                for k in &mint_keys {
                    mints.remove(k.clone())?;
                }
                for k in &commitment_keys {
                    commitments.remove(k.clone())?;
                }
                for k in &serial_keys {
                    serials.remove(k.clone())?;
                }
                meta.remove(META_SCAN_TIP)?;
                meta.insert(META_REBUILD, &[1u8][..])?;
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(map_tx_error)?;

        self.db.flush()?;
        Ok(())
    }

    /// Clear the rebuild marker and record the tip the rebuild scanned to.
    pub fn finish_rebuild(&self, tip: Option<BlockRef>) -> StoreResult<()> {
        let tip_bytes = tip.as_ref().map(encode).transpose()?;
        self.metadata
            .transaction(|meta| {
                meta.remove(META_REBUILD)?;
                match &tip_bytes {
                    Some(bytes) => meta.insert(META_SCAN_TIP, bytes.as_slice())?,
                    None => meta.remove(META_SCAN_TIP)?,
                };
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(map_tx_error)?;
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.mints.len()
    }
}
