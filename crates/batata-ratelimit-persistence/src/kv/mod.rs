// Transactional key-value handle over RocksDB
// Buckets are column families; write scopes are pessimistic transactions and
// read scopes are point-in-time snapshots.

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options,
    SnapshotWithThreadMode, Transaction, TransactionDB, TransactionDBOptions,
};
use tracing::{info, warn};

use batata_ratelimit_common::{Result, StoreError};

use crate::config::StorageConfig;

// Bucket (column family) names
pub const BUCKET_RATE_LIMIT: &str = "ratelimit";
pub const BUCKET_SERVICE: &str = "service";

/// Buckets opened by [`KvStore::open`]
pub const ALL_BUCKETS: &[&str] = &[BUCKET_RATE_LIMIT, BUCKET_SERVICE];

/// Embedded transactional key-value store
pub struct KvStore {
    db: TransactionDB,
    path: PathBuf,
    buckets: Vec<String>,
}

impl KvStore {
    /// Open (or create) the store with every bucket the rate limit store uses
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Self::open_with_buckets(config, ALL_BUCKETS)
    }

    /// Open (or create) the store with the given buckets.
    ///
    /// Missing buckets are created; a bucket not listed here is not
    /// addressable through this handle.
    pub fn open_with_buckets(config: &StorageConfig, buckets: &[&str]) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_compression_type(config.compression.into());

        let mut block_opts = BlockBasedOptions::default();
        let cache = rocksdb::Cache::new_lru_cache(config.block_cache_mb * 1024 * 1024);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);

        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        cf_opts.set_compression_type(config.compression.into());
        cf_opts.set_block_based_table_factory(&block_opts);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let cfs = buckets
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()));

        let db = TransactionDB::open_cf_descriptors(&db_opts, &txn_opts, &config.data_dir, cfs)
            .map_err(|e| {
                StoreError::storage(
                    "open",
                    format!("open rocksdb at '{}'", config.data_dir.display()),
                    e,
                )
            })?;

        info!(
            path = %config.data_dir.display(),
            buckets = ?buckets,
            "Embedded key-value store opened"
        );

        Ok(Self {
            db,
            path: config.data_dir.clone(),
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
        })
    }

    /// Directory the store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `name` was opened and its column family is present
    pub fn has_bucket(&self, name: &str) -> bool {
        self.buckets.iter().any(|b| b == name) && self.db.cf_handle(name).is_some()
    }

    fn bucket(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            StoreError::storage(
                "bucket",
                format!("bucket '{}'", name),
                std::io::Error::other("bucket not opened"),
            )
        })
    }

    /// Run `f` against one consistent snapshot of the store.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T>,
    {
        let txn = ReadTxn {
            store: self,
            snapshot: self.db.snapshot(),
        };
        f(&txn)
    }

    /// Run `f` inside one write transaction.
    ///
    /// Everything `f` writes is committed atomically when it returns `Ok`,
    /// and discarded when it returns `Err`.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&WriteTxn<'_>) -> Result<T>,
    {
        let txn = WriteTxn {
            store: self,
            txn: self.db.transaction(),
        };

        match f(&txn) {
            Ok(value) => {
                txn.txn
                    .commit()
                    .map_err(|e| StoreError::storage("commit", "commit write transaction", e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.txn.rollback() {
                    warn!("Failed to roll back write transaction: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

/// Read scope over a point-in-time snapshot
pub struct ReadTxn<'a> {
    store: &'a KvStore,
    snapshot: SnapshotWithThreadMode<'a, TransactionDB>,
}

impl ReadTxn<'_> {
    /// Whether this snapshot was taken from `store`
    pub fn is_of(&self, store: &KvStore) -> bool {
        std::ptr::eq(self.store, store)
    }

    /// Get the value stored under `key`
    pub fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.store.bucket(bucket)?;
        self.snapshot
            .get_cf(cf, key.as_bytes())
            .map_err(|e| StoreError::storage("get", key_context("get", bucket, key), e))
    }

    /// Visit every entry of `bucket` in key order, stopping at the first error.
    pub fn for_each<F>(&self, bucket: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<()>,
    {
        let cf = self.store.bucket(bucket)?;

        for item in self.snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| {
                StoreError::storage("iterate", format!("iterate bucket '{}'", bucket), e)
            })?;
            let key = std::str::from_utf8(&key).map_err(|e| {
                StoreError::consistency(
                    String::from_utf8_lossy(&key),
                    format!("key in bucket '{}' is not utf-8: {}", bucket, e),
                )
            })?;
            f(key, &value[..])?;
        }

        Ok(())
    }
}

/// Write scope over a single RocksDB transaction
pub struct WriteTxn<'a> {
    store: &'a KvStore,
    txn: Transaction<'a, TransactionDB>,
}

impl WriteTxn<'_> {
    /// Read `key` and hold an exclusive lock on it until the scope ends
    pub fn get_for_update(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.store.bucket(bucket)?;
        self.txn
            .get_for_update_cf(cf, key.as_bytes(), true)
            .map_err(|e| StoreError::storage("get", key_context("get_for_update", bucket, key), e))
    }

    pub fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let cf = self.store.bucket(bucket)?;
        self.txn
            .put_cf(cf, key.as_bytes(), value)
            .map_err(|e| StoreError::storage("put", key_context("put", bucket, key), e))
    }

    pub fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let cf = self.store.bucket(bucket)?;
        self.txn
            .delete_cf(cf, key.as_bytes())
            .map_err(|e| StoreError::storage("delete", key_context("delete", bucket, key), e))
    }
}

fn key_context(action: &str, bucket: &str, key: &str) -> String {
    format!("{} bucket '{}' key '{}'", action, bucket, key)
}
