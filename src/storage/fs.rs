//! Directory-backed chunk store
//!
//! Layout: `<root>/data/<aa>/<hash>` and `<root>/meta/<aa>/<hash>`, where
//! `aa` is the first hash byte in hex and `<hash>` the full hex hash.
//! Extra data directories use the `<dir>/<aa>/<hash>` layout.
//!
//! The id index is built once at open; enumeration pages over it.

use super::{page, ChunkStore};
use crate::common::{blake3_hash, ChunkId, ChunkKind, Error, Result};
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";

pub struct FsChunkStore {
    data_dirs: Vec<PathBuf>,
    meta_dirs: Vec<PathBuf>,
    data_ids: Vec<ChunkId>,
    meta_ids: Vec<ChunkId>,
}

impl FsChunkStore {
    /// Open a store rooted at `root`, indexing every chunk file found
    pub fn open(root: &Path, extra_data_dirs: &[PathBuf]) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "chunk root is not a directory: {}",
                root.display()
            )));
        }

        let mut data_dirs = vec![root.join(DATA_DIR)];
        data_dirs.extend(extra_data_dirs.iter().cloned());
        let meta_dirs = vec![root.join(META_DIR)];

        let data_ids = Self::build_index(&data_dirs)?;
        let meta_ids = Self::build_index(&meta_dirs)?;

        tracing::info!(
            "FsChunkStore opened: {} data chunks in {} dirs, {} meta chunks",
            data_ids.len(),
            data_dirs.len(),
            meta_ids.len()
        );

        Ok(Self {
            data_dirs,
            meta_dirs,
            data_ids,
            meta_ids,
        })
    }

    /// Path a chunk is stored at under `dir`
    pub fn chunk_path(dir: &Path, id: &ChunkId) -> PathBuf {
        dir.join(id.prefix()).join(id.to_hex())
    }

    /// Write a chunk file under `root` (setup helper; the engine never writes)
    pub fn write_chunk(root: &Path, kind: ChunkKind, content: &[u8]) -> Result<ChunkId> {
        let id = ChunkId::for_bytes(content);
        let dir = match kind {
            ChunkKind::Data => root.join(DATA_DIR),
            ChunkKind::Meta => root.join(META_DIR),
        };
        let path = Self::chunk_path(&dir, &id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(id)
    }

    fn dirs(&self, kind: ChunkKind) -> &[PathBuf] {
        match kind {
            ChunkKind::Data => &self.data_dirs,
            ChunkKind::Meta => &self.meta_dirs,
        }
    }

    fn ids(&self, kind: ChunkKind) -> &[ChunkId] {
        match kind {
            ChunkKind::Data => &self.data_ids,
            ChunkKind::Meta => &self.meta_ids,
        }
    }

    fn build_index(dirs: &[PathBuf]) -> Result<Vec<ChunkId>> {
        let mut ids = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                tracing::debug!("Skipping missing chunk directory {:?}", dir);
                continue;
            }
            for prefix in fs::read_dir(dir)? {
                let prefix = prefix?;
                if !prefix.file_type()?.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(prefix.path())? {
                    let entry = entry?;
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else {
                        continue;
                    };
                    match ChunkId::from_hex(name, entry.metadata()?.len()) {
                        Ok(id) => ids.push(id),
                        Err(_) => tracing::debug!("Ignoring non-chunk file {:?}", entry.path()),
                    }
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn find(&self, id: &ChunkId, kind: ChunkKind) -> Option<PathBuf> {
        self.dirs(kind)
            .iter()
            .map(|dir| Self::chunk_path(dir, id))
            .find(|path| path.is_file())
    }
}

impl ChunkStore for FsChunkStore {
    fn enumerate(&self, kind: ChunkKind, offset: usize, limit: usize) -> Result<Vec<ChunkId>> {
        Ok(page(self.ids(kind), offset, limit))
    }

    fn read_chunk(&self, id: &ChunkId, kind: ChunkKind) -> Result<Option<Bytes>> {
        let Some(path) = self.find(id, kind) else {
            return Ok(None);
        };
        let content = fs::read(&path)?;
        if !id.matches(&content) {
            return Err(Error::ChecksumMismatch {
                expected: id.to_hex(),
                actual: blake3_hash(&content),
            });
        }
        Ok(Some(Bytes::from(content)))
    }

    fn contains(&self, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        Ok(self.find(id, kind).is_some())
    }

    fn total_count(&self, kind: ChunkKind) -> Result<u64> {
        Ok(self.ids(kind).len() as u64)
    }
}
