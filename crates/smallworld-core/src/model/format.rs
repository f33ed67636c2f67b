//! On-disk layout of the frozen model artifact.
//!
//! A model file is a single self-describing binary blob laid out so that a
//! memory-mapped reopen can serve adjacency and vector reads directly from
//! the mapping: every numeric section starts at an 8-byte-aligned offset and
//! neighbor/vector data are plain little-endian arrays addressable by byte
//! offset. Zero-copy mapped access therefore assumes a little-endian host;
//! the owned load path decodes explicitly and is portable.
//!
//! # Layout
//!
//! ```text
//! header    : magic "SWIX" | version | metric | dim | item count |
//!             max level | entry point | section offsets | file length
//! levels    : u32 per item (the item's max layer)
//! adjacency : per layer: ids_len u64 | (n+1) u64 offset table | u32 ids
//! tombstone : length-prefixed roaring bitmap
//! vectors   : item count x dim f32, fixed stride
//! ```

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use roaring::RoaringBitmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub(crate) const MAGIC: [u8; 4] = *b"SWIX";
pub(crate) const VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 96;

/// Parsed fixed-size header.
#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub metric: DistanceMetric,
    pub dim: usize,
    pub item_count: usize,
    pub max_level: usize,
    pub entry_point: Option<NodeId>,
    pub levels_off: usize,
    pub adjacency_off: usize,
    pub tombstone_off: usize,
    pub vectors_off: usize,
}

/// Byte positions of one layer's adjacency block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LevelIndex {
    /// Start of the (n+1)-entry u64 offset table.
    pub offsets_off: usize,
    /// Start of the u32 neighbor-id array.
    pub ids_off: usize,
    /// Number of u32 entries in the neighbor-id array.
    pub ids_len: usize,
}

pub(crate) fn pad8(len: usize) -> usize {
    (8 - (len % 8)) % 8
}

fn read_u32(buf: &[u8], off: usize) -> Result<u32> {
    let bytes: [u8; 4] = buf
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Format(format!("truncated file: read at offset {off}")))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(buf: &[u8], off: usize) -> Result<u64> {
    let bytes: [u8; 8] = buf
        .get(off..off + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Format(format!("truncated file: read at offset {off}")))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Unchecked little-endian u64 read; offsets are validated at load time.
pub(crate) fn u64_at(buf: &[u8], off: usize) -> u64 {
    debug_assert!(off + 8 <= buf.len());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

/// Reinterprets a 4-aligned byte range as a u32 slice.
pub(crate) fn u32_slice(buf: &[u8], off: usize, len: usize) -> &[u32] {
    assert!(
        off % std::mem::align_of::<u32>() == 0,
        "offset {off} is not u32-aligned"
    );
    assert!(off + len * 4 <= buf.len(), "u32 slice out of bounds");
    // SAFETY: bounds and alignment are asserted above; the mapping (or owned
    // buffer) outlives the returned slice via the borrow on `buf`.
    unsafe { std::slice::from_raw_parts(buf.as_ptr().add(off).cast::<u32>(), len) }
}

/// Reinterprets a 4-aligned byte range as an f32 slice.
pub(crate) fn f32_slice(buf: &[u8], off: usize, len: usize) -> &[f32] {
    assert!(
        off % std::mem::align_of::<f32>() == 0,
        "offset {off} is not f32-aligned"
    );
    assert!(off + len * 4 <= buf.len(), "f32 slice out of bounds");
    // SAFETY: bounds and alignment are asserted above; see u32_slice.
    unsafe { std::slice::from_raw_parts(buf.as_ptr().add(off).cast::<f32>(), len) }
}

/// Parses and validates the fixed header against the actual byte length.
pub(crate) fn parse_header(buf: &[u8]) -> Result<Header> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Format(format!(
            "file too short for header: {} bytes",
            buf.len()
        )));
    }
    if buf[0..4] != MAGIC {
        return Err(Error::Format("bad magic; not a smallworld model".into()));
    }
    let version = read_u32(buf, 4)?;
    if version != VERSION {
        return Err(Error::Format(format!(
            "unsupported format version {version} (expected {VERSION})"
        )));
    }
    let metric = DistanceMetric::from_code(buf[8])?;
    let dim = read_u32(buf, 12)? as usize;
    let item_count = read_u64(buf, 16)? as usize;
    let max_level = read_u32(buf, 24)? as usize;
    let has_entry = read_u32(buf, 28)? != 0;
    let entry_raw = read_u64(buf, 32)? as usize;
    let levels_off = read_u64(buf, 40)? as usize;
    let adjacency_off = read_u64(buf, 48)? as usize;
    let tombstone_off = read_u64(buf, 56)? as usize;
    let vectors_off = read_u64(buf, 64)? as usize;
    let file_len = read_u64(buf, 72)? as usize;

    if file_len != buf.len() {
        return Err(Error::Format(format!(
            "file length mismatch: header says {file_len}, actual {}",
            buf.len()
        )));
    }
    if dim == 0 {
        return Err(Error::Format("zero dimension in header".into()));
    }
    let vectors_len = item_count
        .checked_mul(dim)
        .and_then(|e| e.checked_mul(4))
        .ok_or_else(|| Error::Format("vector section size overflow".into()))?;
    if vectors_off % 8 != 0 || vectors_off + vectors_len > file_len {
        return Err(Error::Format("vector section out of bounds".into()));
    }
    if levels_off + item_count * 4 > file_len || adjacency_off > file_len {
        return Err(Error::Format("section offsets out of bounds".into()));
    }
    let entry_point = if has_entry {
        if entry_raw >= item_count {
            return Err(Error::Format(format!(
                "entry point {entry_raw} out of range ({item_count} items)"
            )));
        }
        Some(entry_raw)
    } else {
        None
    };

    Ok(Header {
        metric,
        dim,
        item_count,
        max_level,
        entry_point,
        levels_off,
        adjacency_off,
        tombstone_off,
        vectors_off,
    })
}

/// Walks the per-layer adjacency blocks, validating each offset table.
pub(crate) fn parse_level_index(buf: &[u8], header: &Header) -> Result<Vec<LevelIndex>> {
    let n = header.item_count;
    let mut index = Vec::with_capacity(header.max_level + 1);
    let mut block = header.adjacency_off;

    for level in 0..=header.max_level {
        let ids_len = read_u64(buf, block)? as usize;
        let offsets_off = block + 8;
        let ids_off = offsets_off + (n + 1) * 8;
        let ids_end = ids_off
            .checked_add(ids_len * 4)
            .ok_or_else(|| Error::Format("adjacency block size overflow".into()))?;
        if ids_end > header.tombstone_off {
            return Err(Error::Format(format!(
                "adjacency block for layer {level} out of bounds"
            )));
        }

        // The offset table must be monotone and end at ids_len so accessors
        // can slice without per-read validation.
        let mut prev = 0usize;
        for i in 0..=n {
            let off = read_u64(buf, offsets_off + i * 8)? as usize;
            if off < prev || off > ids_len {
                return Err(Error::Format(format!(
                    "corrupt adjacency offsets at layer {level}, item {i}"
                )));
            }
            prev = off;
        }
        if prev != ids_len {
            return Err(Error::Format(format!(
                "adjacency offsets do not cover layer {level}"
            )));
        }

        // Every stored neighbor id must resolve to an item, or the first
        // traversal touching the edge would read past the vector section.
        for i in 0..ids_len {
            let id = read_u32(buf, ids_off + i * 4)? as usize;
            if id >= n {
                return Err(Error::Format(format!(
                    "neighbor id {id} out of range at layer {level} ({n} items)"
                )));
            }
        }

        index.push(LevelIndex {
            offsets_off,
            ids_off,
            ids_len,
        });
        block = ids_end + pad8(ids_end);
    }
    Ok(index)
}

/// Reads the tombstone section.
pub(crate) fn parse_tombstones(buf: &[u8], header: &Header) -> Result<RoaringBitmap> {
    let len = read_u64(buf, header.tombstone_off)? as usize;
    let start = header.tombstone_off + 8;
    let bytes = buf
        .get(start..start + len)
        .ok_or_else(|| Error::Format("truncated tombstone section".into()))?;
    RoaringBitmap::deserialize_from(bytes)
        .map_err(|e| Error::Format(format!("corrupt tombstone section: {e}")))
}

/// View of a frozen graph that the writer serializes from. Implemented by
/// [`Model`](super::Model) over both its owned and mapped representations.
pub(crate) trait FrozenGraph {
    fn metric(&self) -> DistanceMetric;
    fn dimension(&self) -> usize;
    fn item_count(&self) -> usize;
    fn max_level(&self) -> usize;
    fn entry_point(&self) -> Option<NodeId>;
    fn node_level(&self, id: NodeId) -> usize;
    fn neighbors(&self, level: usize, id: NodeId) -> &[u32];
    fn vector(&self, id: NodeId) -> &[f32];
    fn deleted(&self) -> &RoaringBitmap;
}

/// Serializes a frozen graph into the model artifact at `path`.
pub(crate) fn write_file<G: FrozenGraph>(graph: &G, path: &Path) -> Result<()> {
    let n = graph.item_count();
    let dim = graph.dimension();

    let mut tombstone_bytes = Vec::new();
    graph.deleted().serialize_into(&mut tombstone_bytes)?;

    // Section size computation, mirroring the reader's walk.
    let levels_off = HEADER_LEN;
    let levels_bytes = n * 4;
    let adjacency_off = levels_off + levels_bytes + pad8(levels_off + levels_bytes);

    let mut adjacency_bytes = 0usize;
    let mut per_level_ids: Vec<usize> = Vec::with_capacity(graph.max_level() + 1);
    for level in 0..=graph.max_level() {
        let ids_len: usize = (0..n).map(|id| graph.neighbors(level, id).len()).sum();
        per_level_ids.push(ids_len);
        let block = 8 + (n + 1) * 8 + ids_len * 4;
        adjacency_bytes += block + pad8(adjacency_off + adjacency_bytes + block);
    }

    let tombstone_off = adjacency_off + adjacency_bytes;
    let tombstone_block = 8 + tombstone_bytes.len();
    let vectors_off = tombstone_off + tombstone_block + pad8(tombstone_off + tombstone_block);
    let file_len = vectors_off + n * dim * 4;

    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    // Header.
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&[graph.metric().code(), 0, 0, 0])?;
    w.write_all(&(dim as u32).to_le_bytes())?;
    w.write_all(&(n as u64).to_le_bytes())?;
    w.write_all(&(graph.max_level() as u32).to_le_bytes())?;
    w.write_all(&u32::from(graph.entry_point().is_some()).to_le_bytes())?;
    w.write_all(&(graph.entry_point().unwrap_or(0) as u64).to_le_bytes())?;
    w.write_all(&(levels_off as u64).to_le_bytes())?;
    w.write_all(&(adjacency_off as u64).to_le_bytes())?;
    w.write_all(&(tombstone_off as u64).to_le_bytes())?;
    w.write_all(&(vectors_off as u64).to_le_bytes())?;
    w.write_all(&(file_len as u64).to_le_bytes())?;
    w.write_all(&[0u8; 16])?;

    // Levels.
    for id in 0..n {
        w.write_all(&(graph.node_level(id) as u32).to_le_bytes())?;
    }
    write_padding(&mut w, pad8(levels_off + levels_bytes))?;

    // Adjacency blocks, layer 0 first.
    let mut written = adjacency_off;
    for (level, &ids_len) in per_level_ids.iter().enumerate() {
        w.write_all(&(ids_len as u64).to_le_bytes())?;
        let mut running = 0u64;
        for id in 0..n {
            w.write_all(&running.to_le_bytes())?;
            running += graph.neighbors(level, id).len() as u64;
        }
        w.write_all(&running.to_le_bytes())?;
        for id in 0..n {
            for &neighbor in graph.neighbors(level, id) {
                w.write_all(&neighbor.to_le_bytes())?;
            }
        }
        let block = 8 + (n + 1) * 8 + ids_len * 4;
        write_padding(&mut w, pad8(written + block))?;
        written += block + pad8(written + block);
    }

    // Tombstones.
    w.write_all(&(tombstone_bytes.len() as u64).to_le_bytes())?;
    w.write_all(&tombstone_bytes)?;
    write_padding(&mut w, pad8(tombstone_off + tombstone_block))?;

    // Vectors, fixed stride.
    for id in 0..n {
        for &component in graph.vector(id) {
            w.write_all(&component.to_le_bytes())?;
        }
    }

    w.flush()?;
    Ok(())
}

fn write_padding<W: Write>(w: &mut W, pad: usize) -> Result<()> {
    const ZEROS: [u8; 8] = [0u8; 8];
    w.write_all(&ZEROS[..pad])?;
    Ok(())
}
