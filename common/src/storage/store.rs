use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::GenesisConfig;
use crate::error::StoreError;
use crate::types::Block;

/// Number of block files kept in a single shard directory
pub const BLOCKS_PER_SHARD: u64 = 1000;

/// Persistent bookkeeping about the chain held by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub genesis_hash: String,
    pub genesis_height: u64,
    pub genesis_time: DateTime<Utc>,
    /// Height of the last block written, absent until production starts
    pub head_height: Option<u64>,
    /// Height of the latest final block known to the store
    pub final_height: Option<u64>,
}

/// Stores blocks as pretty-printed JSON files sharded by height
pub struct BlockStore {
    /// Root directory of the store
    root_dir: PathBuf,
    /// Directory holding the block shards
    blocks_dir: PathBuf,
    /// Location of the metadata file
    meta_path: PathBuf,
    /// In-memory copy of the metadata, mirrored to disk on every write
    meta: RwLock<StoreMeta>,
}

impl BlockStore {
    pub fn new(root_dir: impl AsRef<Path>, genesis: &GenesisConfig) -> Self {
        let root_dir = root_dir.as_ref().to_path_buf();

        Self {
            blocks_dir: root_dir.join("blocks"),
            meta_path: root_dir.join("meta.json"),
            root_dir,
            meta: RwLock::new(StoreMeta {
                genesis_hash: genesis.hash.clone(),
                genesis_height: genesis.height,
                genesis_time: genesis.time,
                head_height: None,
                final_height: None,
            }),
        }
    }

    /// Creates the directory layout, then either loads the existing metadata
    /// or seeds a fresh store with the genesis block
    pub fn initialize(&self) -> Result<(), StoreError> {
        debug!(dir = %self.root_dir.display(), "Creating store directories");
        fs::create_dir_all(&self.blocks_dir)?;

        if self.meta_path.exists() {
            let data = fs::read(&self.meta_path)?;
            let meta: StoreMeta = serde_json::from_slice(&data)?;
            info!(
                genesis_height = meta.genesis_height,
                head_height = ?meta.head_height,
                final_height = ?meta.final_height,
                "Loaded existing store"
            );
            *self.meta.write() = meta;
            return Ok(());
        }

        let genesis = {
            let mut meta = self.meta.write();
            meta.final_height = Some(meta.genesis_height);
            Block::genesis(meta.genesis_hash.clone(), meta.genesis_height, meta.genesis_time)
        };

        info!(height = genesis.height(), "Seeding fresh store with genesis block");
        self.write_json(&self.block_path(genesis.height()), &genesis)?;
        self.write_meta()
    }

    /// Persists a block.
    ///
    /// Canonical blocks advance the head and final pointers. Fork siblings are
    /// kept next to them under a hash-suffixed name and leave the pointers
    /// untouched, so they can never become the head.
    pub fn write_block(&self, block: &Block) -> Result<(), StoreError> {
        if !block.is_canonical() {
            debug!(block = %block.block_ref(), "Storing fork block");
            return self.write_json(&self.fork_block_path(block.height(), block.hash()), block);
        }

        self.write_json(&self.block_path(block.height()), block)?;

        {
            let mut meta = self.meta.write();
            meta.head_height = Some(block.height());

            let final_num = block.header.finality.num;
            if meta.final_height.map_or(true, |current| final_num > current) {
                meta.final_height = Some(final_num);
            }
        }

        self.write_meta()
    }

    /// Reads the block at `height`, `None` if it was never written
    pub fn read_block(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let data = match fs::read(self.block_path(height)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Reads the last block written, `None` before production starts
    pub fn current_block(&self) -> Result<Option<Block>, StoreError> {
        match self.meta.read().head_height {
            Some(height) => self.read_block(height),
            None => Ok(None),
        }
    }

    /// Snapshot of the store metadata
    pub fn meta(&self) -> StoreMeta {
        self.meta.read().clone()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Location of the file holding the block at `height`
    pub fn block_path(&self, height: u64) -> PathBuf {
        self.shard_dir(height).join(format!("{}.json", height))
    }

    /// Location of a fork block file, beside the canonical block of its height
    pub fn fork_block_path(&self, height: u64, hash: &str) -> PathBuf {
        self.shard_dir(height).join(format!("{}-{}.json", height, hash))
    }

    fn shard_dir(&self, height: u64) -> PathBuf {
        self.blocks_dir
            .join(format!("{:010}", height / BLOCKS_PER_SHARD * BLOCKS_PER_SHARD))
    }

    fn write_json(&self, path: &Path, block: &Block) -> Result<(), StoreError> {
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }

        let raw = serde_json::to_vec_pretty(block)?;
        fs::write(path, raw)?;
        Ok(())
    }

    fn write_meta(&self) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(&*self.meta.read())?;
        fs::write(&self.meta_path, raw)?;
        Ok(())
    }
}
