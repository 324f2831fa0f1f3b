use anyhow::Result;
use async_trait::async_trait;
use chunkvault_anvil::ChunkPos;
use fastnbt::Value;

pub mod anvil;
pub mod config;
pub mod document;
pub mod nbt_json;

pub use anvil::{AnvilChunkStorage, ChunkStream, StoredChunk};
pub use config::StorageConfig;

/// Asynchronous, document oriented chunk storage.
///
/// Documents are NBT compounds. Implementations own the `xPos`/`zPos`
/// fields: they are written from the position on save and removed on load.
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Whether a chunk is stored at `pos`.
    async fn exists(&self, pos: ChunkPos) -> Result<bool>;

    /// Load a chunk.
    /// Returns None if nothing readable is stored at `pos`.
    async fn load(&self, pos: ChunkPos) -> Result<Option<Value>>;

    /// Save a chunk, replacing any previous version.
    async fn save(&self, pos: ChunkPos, doc: &Value) -> Result<()>;

    /// Delete a chunk. Returns whether one was stored.
    async fn delete(&self, pos: ChunkPos) -> Result<bool>;
}
