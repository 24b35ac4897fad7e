//! RocksDB-backed repository.
//!
//! Column families:
//! - `documents`    : Document records (bincode, LZ4 compressed)
//! - `versions`     : Version records (bincode, LZ4), keyed by `doc_id:16 ‖ seq:8 BE`
//! - `version_index`: version id → versions key
//! - `invitations`  : Invitation records (bincode), keyed by invitation id
//! - `contributions`: Contribution records (bincode), keyed by `doc_id:16 ‖ user_id:16`
//!
//! Multi-record writes go through a single `WriteBatch`.
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{decode_record, encode_record, Repository, StoreError};
use crate::error::ResourceKind;
use crate::model::{Contribution, Document, Invitation, Version};

const CF_DOCUMENTS: &str = "documents";
const CF_VERSIONS: &str = "versions";
const CF_VERSION_INDEX: &str = "version_index";
const CF_INVITATIONS: &str = "invitations";
const CF_CONTRIBUTIONS: &str = "contributions";

const COLUMN_FAMILIES: &[&str] = &[
    CF_DOCUMENTS,
    CF_VERSIONS,
    CF_VERSION_INDEX,
    CF_INVITATIONS,
    CF_CONTRIBUTIONS,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Enable fsync on every write
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inkpad_data"),
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: true,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// RocksDB repository.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened document store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            // Payloads are LZ4-compressed before they reach RocksDB.
            CF_DOCUMENTS | CF_VERSIONS => {
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn version_key(document_id: Uuid, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(document_id.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn contribution_key(document_id: Uuid, user_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(document_id.as_bytes());
        key.extend_from_slice(user_id.as_bytes());
        key
    }

    fn compress<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(lz4_flex::compress_prepend_size(&encode_record(value)?))
    }

    fn decompress<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        decode_record(&raw)
    }

    /// Every `(key, value)` in `cf` whose key starts with `prefix`.
    fn scan_prefix(
        &self,
        cf: &ColumnFamily,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let mut out = Vec::new();
        let iter = self.db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn scan_all(&self, cf: &ColumnFamily) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            out.push(item?);
        }
        Ok(out)
    }

    fn invitations_where(
        &self,
        pred: impl Fn(&Invitation) -> bool,
    ) -> Result<Vec<Invitation>, StoreError> {
        let cf = self.cf(CF_INVITATIONS)?;
        let mut found = Vec::new();
        for (_, value) in self.scan_all(cf)? {
            let inv: Invitation = decode_record(&value)?;
            if pred(&inv) {
                found.push(inv);
            }
        }
        found.sort_by_key(|inv| inv.invited_at);
        Ok(found)
    }
}

impl Repository for RocksStore {
    fn load_document(&self, id: Uuid) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Self::decompress(&bytes),
            None => Err(StoreError::NotFound { kind: ResourceKind::Document, id }),
        }
    }

    fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, document.id.as_bytes(), Self::compress(document)?);
        self.write(batch)
    }

    fn delete_document(&self, id: Uuid) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        if self.db.get_cf(cf_docs, id.as_bytes())?.is_none() {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id });
        }
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_index = self.cf(CF_VERSION_INDEX)?;
        let cf_invitations = self.cf(CF_INVITATIONS)?;
        let cf_contributions = self.cf(CF_CONTRIBUTIONS)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_docs, id.as_bytes());

        for (key, value) in self.scan_prefix(cf_versions, id.as_bytes())? {
            let version: Version = Self::decompress(&value)?;
            batch.delete_cf(cf_index, version.id.as_bytes());
            batch.delete_cf(cf_versions, &key);
        }
        for inv in self.invitations_where(|inv| inv.document_id == id)? {
            batch.delete_cf(cf_invitations, inv.id.as_bytes());
        }
        for (key, _) in self.scan_prefix(cf_contributions, id.as_bytes())? {
            batch.delete_cf(cf_contributions, &key);
        }

        self.write(batch)
    }

    fn list_accessible_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut docs = Vec::new();
        for (_, value) in self.scan_all(cf)? {
            let doc: Document = Self::decompress(&value)?;
            if doc.owner_id == user_id || doc.collaborator(user_id).is_some() {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    fn load_version(&self, id: Uuid) -> Result<Version, StoreError> {
        let cf_index = self.cf(CF_VERSION_INDEX)?;
        let cf_versions = self.cf(CF_VERSIONS)?;
        let not_found = StoreError::NotFound { kind: ResourceKind::Version, id };
        let key = self.db.get_cf(cf_index, id.as_bytes())?.ok_or(not_found.clone())?;
        match self.db.get_cf(cf_versions, &key)? {
            Some(bytes) => Self::decompress(&bytes),
            None => Err(not_found),
        }
    }

    fn append_version(&self, version: &Version) -> Result<(), StoreError> {
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_index = self.cf(CF_VERSION_INDEX)?;
        let key = Self::version_key(version.document_id, version.seq);
        if self.db.get_cf(cf_versions, &key)?.is_some() {
            return Err(StoreError::Database(format!(
                "version seq {} already exists for document {}",
                version.seq, version.document_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_versions, &key, Self::compress(version)?);
        batch.put_cf(cf_index, version.id.as_bytes(), &key);
        self.write(batch)
    }

    fn list_versions(&self, document_id: Uuid) -> Result<Vec<Version>, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        self.scan_prefix(cf, document_id.as_bytes())?
            .into_iter()
            .map(|(_, value)| Self::decompress(&value))
            .collect()
    }

    fn latest_version(&self, document_id: Uuid) -> Result<Option<Version>, StoreError> {
        let cf = self.cf(CF_VERSIONS)?;
        let upper = Self::version_key(document_id, u64::MAX);
        let mut iter = self.db.iterator_cf(cf, IteratorMode::From(upper.as_slice(), Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.starts_with(document_id.as_bytes()) {
                    Ok(Some(Self::decompress(&value)?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    fn load_invitation(&self, id: Uuid) -> Result<Invitation, StoreError> {
        let cf = self.cf(CF_INVITATIONS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => decode_record(&bytes),
            None => Err(StoreError::NotFound { kind: ResourceKind::Invitation, id }),
        }
    }

    fn save_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        let cf = self.cf(CF_INVITATIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, invitation.id.as_bytes(), encode_record(invitation)?);
        self.write(batch)
    }

    fn list_invitations_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<Invitation>, StoreError> {
        self.invitations_where(|inv| inv.document_id == document_id)
    }

    fn list_invitations_for_email(&self, email: &str) -> Result<Vec<Invitation>, StoreError> {
        self.invitations_where(|inv| inv.invited_email.eq_ignore_ascii_case(email))
    }

    fn commit_acceptance(
        &self,
        invitation: &Invitation,
        document: &Document,
    ) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_invitations = self.cf(CF_INVITATIONS)?;
        if self.db.get_cf(cf_docs, document.id.as_bytes())?.is_none() {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id: document.id });
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_invitations, invitation.id.as_bytes(), encode_record(invitation)?);
        batch.put_cf(cf_docs, document.id.as_bytes(), Self::compress(document)?);
        self.write(batch)
    }

    fn commit_revert(&self, document: &Document, version: &Version) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_index = self.cf(CF_VERSION_INDEX)?;
        if self.db.get_cf(cf_docs, document.id.as_bytes())?.is_none() {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id: document.id });
        }
        let key = Self::version_key(version.document_id, version.seq);
        if self.db.get_cf(cf_versions, &key)?.is_some() {
            return Err(StoreError::Database(format!(
                "version seq {} already exists for document {}",
                version.seq, version.document_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, document.id.as_bytes(), Self::compress(document)?);
        batch.put_cf(cf_versions, &key, Self::compress(version)?);
        batch.put_cf(cf_index, version.id.as_bytes(), &key);
        self.write(batch)
    }

    fn load_contribution(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Contribution>, StoreError> {
        let cf = self.cf(CF_CONTRIBUTIONS)?;
        match self.db.get_cf(cf, Self::contribution_key(document_id, user_id))? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_contribution(&self, contribution: &Contribution) -> Result<(), StoreError> {
        let cf = self.cf(CF_CONTRIBUTIONS)?;
        let key = Self::contribution_key(contribution.document_id, contribution.user_id);
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key, encode_record(contribution)?);
        self.write(batch)
    }

    fn list_contributions(&self, document_id: Uuid) -> Result<Vec<Contribution>, StoreError> {
        let cf = self.cf(CF_CONTRIBUTIONS)?;
        self.scan_prefix(cf, document_id.as_bytes())?
            .into_iter()
            .map(|(_, value)| decode_record(&value))
            .collect()
    }
}
