/*!
The chromosome B+ tree: an on-disk map from chromosome name to the dense
numeric id and length used everywhere else in the file.

Keys are the names NUL-padded to a fixed `key_size`; values are always 8
bytes (`id: u32`, `length: u32`). The root node immediately follows the
32-byte header.
*/
use std::io::{Seek, Write};

use crate::bbi::{ChromInfo, CHROM_TREE_MAGIC};
use crate::error::{Result, TrackError};
use crate::utils::output::OrderedDataOutput;
use crate::utils::rom::RomBuffer;

#[derive(Clone, Debug)]
pub(crate) struct BptHeader {
    pub block_size: u32,
    pub key_size: u32,
    pub val_size: u32,
    pub item_count: u64,
    pub root_offset: u64,
}

#[derive(Clone, Debug)]
pub struct BPlusTree {
    pub(crate) header: BptHeader,
}

impl BPlusTree {
    pub(crate) fn read(data: &mut RomBuffer, offset: u64) -> Result<BPlusTree> {
        data.set_position(offset);
        let magic = data.get_u32()?;
        if magic != CHROM_TREE_MAGIC {
            return Err(TrackError::Format("chromosome B+ tree"));
        }
        let block_size = data.get_u32()?;
        let key_size = data.get_u32()?;
        let val_size = data.get_u32()?;
        if val_size != 8 {
            return Err(TrackError::Format("chromosome B+ tree"));
        }
        let item_count = data.get_u64()?;
        let _reserved = data.get_u64()?;
        let root_offset = data.position();
        Ok(BPlusTree {
            header: BptHeader {
                block_size,
                key_size,
                val_size,
                item_count,
                root_offset,
            },
        })
    }

    /// Looks up `(id, length)` for a chromosome name. Names longer than the
    /// tree's key size cannot be present.
    pub(crate) fn find(&self, data: &mut RomBuffer, name: &str) -> Result<Option<(u32, u32)>> {
        let key_size = self.header.key_size as usize;
        if name.len() > key_size {
            return Ok(None);
        }
        let mut key = vec![0u8; key_size];
        key[..name.len()].copy_from_slice(name.as_bytes());

        let mut offset = self.header.root_offset;
        loop {
            data.set_position(offset);
            let is_leaf = data.get_u8()?;
            let _reserved = data.get_u8()?;
            let count = data.get_u16()? as usize;

            if is_leaf == 1 {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let k = data.get_bytes(key_size)?;
                    let id = data.get_u32()?;
                    let length = data.get_u32()?;
                    entries.push((k, id, length));
                }
                return Ok(
                    match entries.binary_search_by(|e| e.0.as_slice().cmp(&key[..])) {
                        Ok(i) => Some((entries[i].1, entries[i].2)),
                        Err(_) => None,
                    },
                );
            }

            let mut keys = Vec::with_capacity(count);
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(data.get_bytes(key_size)?);
                children.push(data.get_u64()?);
            }
            // Descend into the rightmost child whose first key <= key.
            let next = keys.partition_point(|k| k.as_slice() <= &key[..]);
            if next == 0 {
                return Ok(None);
            }
            offset = children[next - 1];
        }
    }

    /// All chromosomes in key order.
    pub(crate) fn traverse(&self, data: &mut RomBuffer) -> Result<Vec<ChromInfo>> {
        let mut chroms = Vec::with_capacity(self.header.item_count as usize);
        self.traverse_node(data, self.header.root_offset, &mut chroms)?;
        Ok(chroms)
    }

    fn traverse_node(
        &self,
        data: &mut RomBuffer,
        offset: u64,
        chroms: &mut Vec<ChromInfo>,
    ) -> Result<()> {
        let key_size = self.header.key_size as usize;
        data.set_position(offset);
        let is_leaf = data.get_u8()?;
        let _reserved = data.get_u8()?;
        let count = data.get_u16()? as usize;

        if is_leaf == 1 {
            for _ in 0..count {
                let key = data.get_bytes(key_size)?;
                let id = data.get_u32()?;
                let length = data.get_u32()?;
                let name = match std::str::from_utf8(&key) {
                    Ok(s) => s.trim_end_matches('\0').to_owned(),
                    Err(_) => return Err(TrackError::Format("chromosome B+ tree")),
                };
                chroms.push(ChromInfo { name, length, id });
            }
        } else {
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                data.skip(key_size as u64)?;
                children.push(data.get_u64()?);
            }
            for child in children {
                self.traverse_node(data, child, chroms)?;
            }
        }
        Ok(())
    }

    /// Writes a balanced tree over `chroms` at the current output position.
    /// Leaves are grouped by sorted name; nodes hold at most `block_size`
    /// children. Nodes are laid out root first, then level by level, using
    /// offsets computed before anything is written.
    pub(crate) fn write<W: Write + Seek>(
        out: &mut OrderedDataOutput<W>,
        chroms: &[ChromInfo],
        block_size: u32,
    ) -> Result<()> {
        let mut sorted: Vec<&ChromInfo> = chroms.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in sorted.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(TrackError::DuplicateKey(pair[0].name.clone()));
            }
        }

        let n = sorted.len();
        let bs = block_size as usize;
        let key_size = sorted.iter().map(|c| c.name.len()).max().unwrap_or(1) as u32;

        out.write_u32(CHROM_TREE_MAGIC)?;
        out.write_u32(block_size)?;
        out.write_u32(key_size)?;
        out.write_u32(8)?;
        out.write_u64(n as u64)?;
        out.write_u64(0)?;

        // Node counts per level, leaves at index 0.
        let mut level_sizes = vec![(n.max(1) + bs - 1) / bs];
        while *level_sizes.last().unwrap() > 1 {
            let below = *level_sizes.last().unwrap();
            level_sizes.push((below + bs - 1) / bs);
        }
        let levels = level_sizes.len();
        let child_count = |level: usize, node: usize| -> usize {
            let below = if level == 0 { n } else { level_sizes[level - 1] };
            bs.min(below - node * bs)
        };
        // First leaf entry under node `node` of `level`.
        let first_entry = |level: usize, node: usize| -> usize { node * bs.pow(level as u32 + 1) };

        let mut offsets: Vec<Vec<u64>> = vec![Vec::new(); levels];
        let mut off = out.tell()?;
        for level in (0..levels).rev() {
            for node in 0..level_sizes[level] {
                offsets[level].push(off);
                off += 4 + child_count(level, node) as u64 * (key_size as u64 + 8);
            }
        }

        let mut key_buf = vec![0u8; key_size as usize];
        for level in (0..levels).rev() {
            for node in 0..level_sizes[level] {
                let count = child_count(level, node);
                out.write_u8(if level == 0 { 1 } else { 0 })?;
                out.write_u8(0)?;
                out.write_u16(count as u16)?;
                for child in (node * bs)..(node * bs + count) {
                    let entry = if level == 0 {
                        child
                    } else {
                        first_entry(level - 1, child)
                    };
                    key_buf.fill(0);
                    let name = sorted[entry].name.as_bytes();
                    key_buf[..name.len()].copy_from_slice(name);
                    out.write_all(&key_buf)?;
                    if level == 0 {
                        out.write_u32(sorted[child].id)?;
                        out.write_u32(sorted[child].length)?;
                    } else {
                        out.write_u64(offsets[level - 1][child])?;
                    }
                }
            }
        }
        Ok(())
    }
}
