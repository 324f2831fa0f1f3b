//! Chunk documents as stored in region files.
//!
//! Saved chunks always carry their own coordinates in `xPos`/`zPos`, taken
//! from the position they were saved under rather than whatever the caller
//! left in the document. They are removed again on load.

use anyhow::{Context, Result};
use chunkvault_anvil::ChunkPos;
use fastnbt::Value;

pub const X_FIELD: &str = "xPos";
pub const Z_FIELD: &str = "zPos";

/// Copy `doc`, stamp the coordinates of `pos` into it and encode it as NBT.
pub fn encode(pos: ChunkPos, doc: &Value) -> Result<Vec<u8>> {
    let Value::Compound(fields) = doc else {
        anyhow::bail!("Chunk {:?}: document root must be a compound", pos);
    };
    let mut fields = fields.clone();
    fields.insert(X_FIELD.to_string(), Value::Int(pos.x));
    fields.insert(Z_FIELD.to_string(), Value::Int(pos.z));
    fastnbt::to_bytes(&Value::Compound(fields)).with_context(|| format!("Failed to encode chunk {:?}", pos))
}

/// Decode NBT bytes and strip the stamped coordinates.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut doc: Value = fastnbt::from_bytes(bytes).context("Failed to decode chunk NBT")?;
    match &mut doc {
        Value::Compound(fields) => {
            fields.remove(X_FIELD);
            fields.remove(Z_FIELD);
        }
        _ => anyhow::bail!("Chunk NBT root is not a compound"),
    }
    Ok(doc)
}

/// Coordinates recorded inside an encoded chunk, if present.
pub fn stored_coords(bytes: &[u8]) -> Option<ChunkPos> {
    let Ok(Value::Compound(root)) = fastnbt::from_bytes::<Value>(bytes) else {
        return None;
    };
    let x = root.get(X_FIELD)?.as_i64()? as i32;
    let z = root.get(Z_FIELD)?.as_i64()? as i32;
    Some(ChunkPos::new(x, z))
}
