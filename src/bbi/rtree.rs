/*!
The 1-D R+ tree over genomic intervals, mapping `(chrom, start, end)`
ranges to the file offset and size of their data block.

Leaf bounding boxes may overlap, so a block found by the traversal can
still contain records outside the query; filtering those is the record
decoder's job, not the tree's.
*/
use std::collections::{HashMap, VecDeque};
use std::io::{Seek, Write};

use smallvec::SmallVec;

use crate::bbi::CIR_TREE_MAGIC;
use crate::error::{Result, TrackError};
use crate::utils::output::OrderedDataOutput;
use crate::utils::rom::RomBuffer;

#[derive(Clone, Debug)]
pub(crate) struct RTreeHeader {
    pub block_size: u32,
    pub item_count: u64,
    pub start_chrom_ix: u32,
    pub start_base: u32,
    pub end_chrom_ix: u32,
    pub end_base: u32,
    pub end_data_offset: u64,
    pub items_per_slot: u32,
    pub root_offset: u64,
}

/// One indexed data block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RTreeLeaf {
    pub start_chrom_ix: u32,
    pub start_base: u32,
    pub end_chrom_ix: u32,
    pub end_base: u32,
    pub data_offset: u64,
    pub data_size: u64,
}

#[derive(Copy, Clone, Debug)]
struct RTreeChild {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    child_offset: u64,
}

#[derive(Clone, Debug)]
enum RTreeNode {
    Leaf(Vec<RTreeLeaf>),
    Internal(Vec<RTreeChild>),
}

/// An entry spanning `[start_chrom_ix..end_chrom_ix]` overlaps the query
/// when the query chromosome falls in that inclusive range and the base
/// bounds do not exclude it on the boundary chromosomes.
fn entry_overlaps(
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    chrom_ix: u32,
    start: u32,
    end: u32,
) -> bool {
    (start_chrom_ix..=end_chrom_ix).contains(&chrom_ix)
        && (start_chrom_ix < chrom_ix || start_base < end)
        && (end_chrom_ix > chrom_ix || end_base > start)
}

#[derive(Clone, Debug)]
pub struct RTreeIndex {
    pub(crate) header: RTreeHeader,
    prefetched: HashMap<u64, RTreeNode>,
}

impl RTreeIndex {
    pub(crate) fn read(data: &mut RomBuffer, offset: u64) -> Result<RTreeIndex> {
        data.set_position(offset);
        let magic = data.get_u32()?;
        if magic != CIR_TREE_MAGIC {
            return Err(TrackError::Format("R+ tree"));
        }
        let block_size = data.get_u32()?;
        let item_count = data.get_u64()?;
        let start_chrom_ix = data.get_u32()?;
        let start_base = data.get_u32()?;
        let end_chrom_ix = data.get_u32()?;
        let end_base = data.get_u32()?;
        let end_data_offset = data.get_u64()?;
        let items_per_slot = data.get_u32()?;
        let _reserved = data.get_u32()?;
        let root_offset = data.position();
        Ok(RTreeIndex {
            header: RTreeHeader {
                block_size,
                item_count,
                start_chrom_ix,
                start_base,
                end_chrom_ix,
                end_base,
                end_data_offset,
                items_per_slot,
                root_offset,
            },
            prefetched: HashMap::new(),
        })
    }

    fn read_node(data: &mut RomBuffer, offset: u64) -> Result<RTreeNode> {
        data.set_position(offset);
        let is_leaf = data.get_u8()?;
        let _reserved = data.get_u8()?;
        let count = data.get_u16()? as usize;
        if is_leaf == 1 {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(RTreeLeaf {
                    start_chrom_ix: data.get_u32()?,
                    start_base: data.get_u32()?,
                    end_chrom_ix: data.get_u32()?,
                    end_base: data.get_u32()?,
                    data_offset: data.get_u64()?,
                    data_size: data.get_u64()?,
                });
            }
            Ok(RTreeNode::Leaf(entries))
        } else {
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(RTreeChild {
                    start_chrom_ix: data.get_u32()?,
                    start_base: data.get_u32()?,
                    end_chrom_ix: data.get_u32()?,
                    end_base: data.get_u32()?,
                    child_offset: data.get_u64()?,
                });
            }
            Ok(RTreeNode::Internal(children))
        }
    }

    /// Materializes every internal node in memory so later traversals only
    /// touch the file for leaf nodes.
    pub(crate) fn prefetch(&mut self, data: &mut RomBuffer) -> Result<()> {
        let mut remaining = vec![self.header.root_offset];
        while let Some(offset) = remaining.pop() {
            let node = Self::read_node(data, offset)?;
            if let RTreeNode::Internal(children) = &node {
                for child in children {
                    remaining.push(child.child_offset);
                }
                self.prefetched.insert(offset, node);
            }
        }
        Ok(())
    }

    /// Calls `consumer` with every leaf entry overlapping the query, in
    /// on-disk order.
    pub(crate) fn find_overlapping_blocks(
        &self,
        data: &mut RomBuffer,
        chrom_ix: u32,
        start: u32,
        end: u32,
        consumer: &mut dyn FnMut(RTreeLeaf),
    ) -> Result<()> {
        let mut remaining = VecDeque::with_capacity(64);
        remaining.push_front(self.header.root_offset);
        while let Some(offset) = remaining.pop_front() {
            let read_node;
            let node = match self.prefetched.get(&offset) {
                Some(node) => node,
                None => {
                    read_node = Self::read_node(data, offset)?;
                    &read_node
                }
            };
            match node {
                RTreeNode::Leaf(entries) => {
                    for entry in entries {
                        if entry_overlaps(
                            entry.start_chrom_ix,
                            entry.start_base,
                            entry.end_chrom_ix,
                            entry.end_base,
                            chrom_ix,
                            start,
                            end,
                        ) {
                            consumer(*entry);
                        }
                    }
                }
                RTreeNode::Internal(children) => {
                    let mut hits: SmallVec<[u64; 4]> = SmallVec::new();
                    for child in children {
                        if entry_overlaps(
                            child.start_chrom_ix,
                            child.start_base,
                            child.end_chrom_ix,
                            child.end_base,
                            chrom_ix,
                            start,
                            end,
                        ) {
                            hits.push(child.child_offset);
                        }
                    }
                    for child in hits.into_iter().rev() {
                        remaining.push_front(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects the overlapping leaves into a `Vec`, preserving order.
    pub(crate) fn overlapping_blocks(
        &self,
        data: &mut RomBuffer,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<Vec<RTreeLeaf>> {
        let mut blocks = Vec::new();
        self.find_overlapping_blocks(data, chrom_ix, start, end, &mut |leaf| blocks.push(leaf))?;
        Ok(blocks)
    }

    /// Bulk-loads a tree over `leaves` (sorted by start chromosome and
    /// base) at the current output position. Nodes are laid out root
    /// first, then level by level, from an offset table computed up front.
    pub(crate) fn write<W: Write + Seek>(
        out: &mut OrderedDataOutput<W>,
        leaves: &[RTreeLeaf],
        block_size: u32,
        items_per_slot: u32,
        end_data_offset: u64,
        item_count: u64,
    ) -> Result<()> {
        debug_assert!(leaves
            .windows(2)
            .all(|w| (w[0].start_chrom_ix, w[0].start_base)
                <= (w[1].start_chrom_ix, w[1].start_base)));

        let n = leaves.len();
        let bs = block_size as usize;

        // Bounding boxes for every node, bottom-up. `bounds[0]` is per
        // leaf node, higher levels follow.
        let node_bounds = |spans: &[(u32, u32, u32, u32)]| -> Vec<(u32, u32, u32, u32)> {
            spans
                .chunks(bs)
                .map(|chunk| {
                    let (s_ci, s_b) = (chunk[0].0, chunk[0].1);
                    let (e_ci, e_b) = chunk
                        .iter()
                        .map(|c| (c.2, c.3))
                        .max()
                        .expect("chunks are never empty");
                    (s_ci, s_b, e_ci, e_b)
                })
                .collect()
        };

        let leaf_spans: Vec<(u32, u32, u32, u32)> = leaves
            .iter()
            .map(|l| (l.start_chrom_ix, l.start_base, l.end_chrom_ix, l.end_base))
            .collect();
        let mut level_bounds = vec![node_bounds(&leaf_spans)];
        while level_bounds.last().unwrap().len() > 1 {
            let next = node_bounds(level_bounds.last().unwrap());
            level_bounds.push(next);
        }
        let levels = level_bounds.len();

        let (start_chrom_ix, start_base, end_chrom_ix, end_base) = level_bounds
            .last()
            .unwrap()
            .first()
            .copied()
            .unwrap_or((0, 0, 0, 0));

        out.write_u32(CIR_TREE_MAGIC)?;
        out.write_u32(block_size)?;
        out.write_u64(item_count)?;
        out.write_u32(start_chrom_ix)?;
        out.write_u32(start_base)?;
        out.write_u32(end_chrom_ix)?;
        out.write_u32(end_base)?;
        out.write_u64(end_data_offset)?;
        out.write_u32(items_per_slot)?;
        out.write_u32(0)?;

        if leaves.is_empty() {
            out.write_u8(1)?;
            out.write_u8(0)?;
            out.write_u16(0)?;
            return Ok(());
        }

        let child_count = |level: usize, node: usize| -> usize {
            let below = if level == 0 {
                n
            } else {
                level_bounds[level - 1].len()
            };
            bs.min(below - node * bs)
        };

        let mut offsets: Vec<Vec<u64>> = vec![Vec::new(); levels];
        let mut off = out.tell()?;
        for level in (0..levels).rev() {
            let entry_size = if level == 0 { 32 } else { 24 };
            for node in 0..level_bounds[level].len() {
                offsets[level].push(off);
                off += 4 + child_count(level, node) as u64 * entry_size;
            }
        }

        for level in (0..levels).rev() {
            for node in 0..level_bounds[level].len() {
                let count = child_count(level, node);
                out.write_u8(if level == 0 { 1 } else { 0 })?;
                out.write_u8(0)?;
                out.write_u16(count as u16)?;
                for child in (node * bs)..(node * bs + count) {
                    if level == 0 {
                        let leaf = &leaves[child];
                        out.write_u32(leaf.start_chrom_ix)?;
                        out.write_u32(leaf.start_base)?;
                        out.write_u32(leaf.end_chrom_ix)?;
                        out.write_u32(leaf.end_base)?;
                        out.write_u64(leaf.data_offset)?;
                        out.write_u64(leaf.data_size)?;
                    } else {
                        let (s_ci, s_b, e_ci, e_b) = level_bounds[level - 1][child];
                        out.write_u32(s_ci)?;
                        out.write_u32(s_b)?;
                        out.write_u32(e_ci)?;
                        out.write_u32(e_b)?;
                        out.write_u64(offsets[level - 1][child])?;
                    }
                }
            }
        }
        Ok(())
    }
}
