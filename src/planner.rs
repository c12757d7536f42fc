//! Request planning
//!
//! Groups, coalesces and packs tags into the minimum number of PDU-bounded
//! requests. The planner enforces three budgets per batch: encoded request
//! size, projected response size (both bounded by the negotiated PDU size)
//! and the protocol cap of 20 items per PDU.
//!
//! With optimization enabled, BIT tags sharing a byte collapse into one
//! BYTE read and byte-addressable tags whose ranges touch or overlap merge
//! into coalesced BYTE blocks; every original tag keeps a mapping
//! `(planned item, byte offset)` so results can be re-sliced into the
//! caller's order.

use std::collections::HashMap;

use tracing::debug;

use crate::constants::{
    CHUNK_OVERHEAD, MAX_ITEMS_PER_PDU, READ_REQ_ITEM_SIZE, READ_REQ_OVERHEAD,
    READ_RES_ITEM_OVERHEAD, READ_RES_OVERHEAD, WRITE_DATA_ITEM_OVERHEAD, WRITE_REQ_ITEM_SIZE,
    WRITE_REQ_OVERHEAD, WRITE_RES_OVERHEAD,
};
use crate::error::{S7Error, S7Result};
use crate::tag::{DataType, Tag};

/// One original tag mapped into a planned item.
#[derive(Debug, Clone)]
pub struct ItemSlice {
    /// Position in the caller's tag list.
    pub index: usize,
    /// The original tag.
    pub tag: Tag,
    /// Byte offset of the tag's range inside the planned item payload.
    pub offset: usize,
}

/// One on-wire item of a planned read, with its result mapping.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    /// The tag actually sent to the PLC (possibly a coalesced BYTE block).
    pub tag: Tag,
    /// Original tags served by this item.
    pub slices: Vec<ItemSlice>,
}

impl PlannedItem {
    fn direct(index: usize, tag: Tag) -> Self {
        Self {
            tag,
            slices: vec![ItemSlice {
                index,
                tag,
                offset: 0,
            }],
        }
    }

    /// True when the item is exactly one original tag, read as-is.
    pub fn is_direct(&self) -> bool {
        self.slices.len() == 1 && self.slices[0].tag == self.tag && self.slices[0].offset == 0
    }
}

/// One READ_VAR request worth of items.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    /// Items in request order.
    pub items: Vec<PlannedItem>,
}

/// Planner output for a read operation.
#[derive(Debug, Default)]
pub struct ReadPlan {
    /// Ordered batches, one request each.
    pub batches: Vec<ReadBatch>,
    /// Oversized STRING/WSTRING tags to be read in chunks, with their
    /// original positions.
    pub chunked: Vec<(usize, Tag)>,
}

/// Largest single-item payload for the given PDU size; also the slice size
/// used for chunked string reads.
pub fn max_item_payload(pdu_size: u16) -> usize {
    (pdu_size as usize).saturating_sub(CHUNK_OVERHEAD)
}

/// Response-side cost of one read item: header plus payload padded to an
/// even boundary.
fn read_item_response_cost(size: usize) -> usize {
    READ_RES_ITEM_OVERHEAD + ceil_even(size)
}

fn ceil_even(n: usize) -> usize {
    n + (n & 1)
}

/// Types that may be coalesced into BYTE blocks. Strings are excluded:
/// their payload carries a length header that must stay item-aligned.
fn is_mergeable(data_type: DataType) -> bool {
    !data_type.is_string()
}

/// Plan a read of `tags` against the negotiated PDU size.
///
/// Oversized strings are diverted into [`ReadPlan::chunked`]; any other tag
/// whose response cannot fit a single PDU fails with [`S7Error::Pdu`].
pub fn plan_read(tags: &[Tag], pdu_size: u16, optimize: bool) -> S7Result<ReadPlan> {
    let max_payload = max_item_payload(pdu_size);
    let mut plan = ReadPlan::default();
    let mut work: Vec<PlannedItem> = Vec::with_capacity(tags.len());

    for (index, tag) in tags.iter().enumerate() {
        if tag.size() > max_payload {
            if tag.data_type().is_string() {
                plan.chunked.push((index, *tag));
                continue;
            }
            return Err(S7Error::Pdu {
                tag: tag.to_string(),
                required: tag.size(),
                available: max_payload,
            });
        }
        work.push(PlannedItem::direct(index, *tag));
    }

    if optimize {
        work = bucket_bits(work);
        work.sort_by_key(|item| {
            (
                item.tag.memory_area().code(),
                item.tag.db_number(),
                item.tag.start(),
            )
        });
    }

    pack_read_items(&mut plan, work, pdu_size, optimize, max_payload);

    debug!(
        tags = tags.len(),
        batches = plan.batches.len(),
        chunked = plan.chunked.len(),
        optimize,
        "planned read"
    );
    Ok(plan)
}

/// Collapse BIT tags that share a byte into a single BYTE read; single
/// bits stay bit reads.
fn bucket_bits(work: Vec<PlannedItem>) -> Vec<PlannedItem> {
    let mut buckets: HashMap<(u8, u16, u32), Vec<PlannedItem>> = HashMap::new();
    let mut result: Vec<PlannedItem> = Vec::with_capacity(work.len());
    let mut bucket_order: Vec<(u8, u16, u32)> = Vec::new();

    for item in work {
        if item.tag.data_type() == DataType::Bit {
            let key = (
                item.tag.memory_area().code(),
                item.tag.db_number(),
                item.tag.start(),
            );
            let bucket = buckets.entry(key).or_default();
            if bucket.is_empty() {
                bucket_order.push(key);
            }
            bucket.push(item);
        } else {
            result.push(item);
        }
    }

    for key in bucket_order {
        let mut bucket = buckets.remove(&key).unwrap_or_default();
        if bucket.len() == 1 {
            result.push(bucket.remove(0));
            continue;
        }
        let first = &bucket[0].tag;
        // Validated fields carried over from an already-valid bit tag.
        let packed = Tag::new(
            first.memory_area(),
            first.db_number(),
            DataType::Byte,
            first.start(),
            0,
            1,
        );
        let packed = match packed {
            Ok(tag) => tag,
            Err(_) => {
                result.extend(bucket);
                continue;
            }
        };
        let slices = bucket
            .into_iter()
            .flat_map(|item| item.slices)
            .collect::<Vec<_>>();
        result.push(PlannedItem {
            tag: packed,
            slices,
        });
    }

    result
}

/// Greedily pack work items into batches, merging adjacent ranges when
/// optimization is on.
fn pack_read_items(
    plan: &mut ReadPlan,
    work: Vec<PlannedItem>,
    pdu_size: u16,
    optimize: bool,
    max_payload: usize,
) {
    let pdu = pdu_size as usize;
    let mut batch = ReadBatch::default();
    let mut request_size = READ_REQ_OVERHEAD;
    let mut response_size = READ_RES_OVERHEAD;

    for item in work {
        let item_request = READ_REQ_ITEM_SIZE;
        let item_response = read_item_response_cost(item.tag.size());

        if batch.items.is_empty() {
            request_size += item_request;
            response_size += item_response;
            batch.items.push(item);
            continue;
        }

        let fits = request_size + item_request <= pdu
            && response_size + item_response <= pdu
            && batch.items.len() < MAX_ITEMS_PER_PDU;

        if !fits {
            plan.batches.push(std::mem::take(&mut batch));
            request_size = READ_REQ_OVERHEAD + item_request;
            response_size = READ_RES_OVERHEAD + item_response;
            batch.items.push(item);
            continue;
        }

        if optimize {
            if let Some(prev) = batch.items.last_mut() {
                if let Some(merged) = try_merge(prev, &item, max_payload) {
                    let delta = read_item_response_cost(merged.tag.size())
                        - read_item_response_cost(prev.tag.size());
                    if response_size + delta <= pdu {
                        response_size += delta;
                        *prev = merged;
                        continue;
                    }
                }
            }
        }

        request_size += item_request;
        response_size += item_response;
        batch.items.push(item);
    }

    if !batch.items.is_empty() {
        plan.batches.push(batch);
    }
}

/// Merge two planned items into one coalesced BYTE block when they share
/// area/DB, are both byte-addressable and their ranges touch or overlap.
fn try_merge(prev: &PlannedItem, next: &PlannedItem, max_payload: usize) -> Option<PlannedItem> {
    if prev.tag.memory_area() != next.tag.memory_area()
        || prev.tag.db_number() != next.tag.db_number()
        || !is_mergeable(prev.tag.data_type())
        || !is_mergeable(next.tag.data_type())
    {
        return None;
    }

    let prev_start = prev.tag.start() as usize;
    let prev_end = prev_start + prev.tag.size();
    let next_start = next.tag.start() as usize;
    let next_end = next_start + next.tag.size();

    // Adjacent or overlapping only; any positive gap keeps the items apart.
    if next_start > prev_end {
        return None;
    }

    let merged_start = prev_start.min(next_start);
    let merged_end = prev_end.max(next_end);
    let merged_len = merged_end - merged_start;
    if merged_len > max_payload {
        return None;
    }

    let merged_tag = Tag::new(
        prev.tag.memory_area(),
        prev.tag.db_number(),
        DataType::Byte,
        merged_start as u32,
        0,
        u16::try_from(merged_len).ok()?,
    )
    .ok()?;

    let mut slices = Vec::with_capacity(prev.slices.len() + next.slices.len());
    for slice in prev.slices.iter().chain(next.slices.iter()) {
        slices.push(ItemSlice {
            index: slice.index,
            tag: slice.tag,
            offset: slice.tag.start() as usize - merged_start,
        });
    }

    Some(PlannedItem {
        tag: merged_tag,
        slices,
    })
}

/// Plan a write of `tags` into batches of original indices.
///
/// Each item costs its 12-byte spec plus a 4-byte data header plus the
/// (pad-rounded) payload on the request side and one return-code byte on
/// the response side. Writes are never chunked; an oversized tag fails.
pub fn plan_write(tags: &[Tag], pdu_size: u16) -> S7Result<Vec<Vec<usize>>> {
    let pdu = pdu_size as usize;
    let available = pdu
        .saturating_sub(WRITE_REQ_OVERHEAD + WRITE_REQ_ITEM_SIZE + WRITE_DATA_ITEM_OVERHEAD);

    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut batch: Vec<usize> = Vec::new();
    let mut request_size = WRITE_REQ_OVERHEAD;
    let mut response_size = WRITE_RES_OVERHEAD;

    for (index, tag) in tags.iter().enumerate() {
        let size = tag.size();
        if size > available {
            return Err(S7Error::Pdu {
                tag: tag.to_string(),
                required: size,
                available,
            });
        }

        let item_request = WRITE_REQ_ITEM_SIZE + WRITE_DATA_ITEM_OVERHEAD + ceil_even(size);
        let fits = batch.is_empty()
            || (request_size + item_request <= pdu
                && response_size + 1 <= pdu
                && batch.len() < MAX_ITEMS_PER_PDU);

        if !fits {
            batches.push(std::mem::take(&mut batch));
            request_size = WRITE_REQ_OVERHEAD;
            response_size = WRITE_RES_OVERHEAD;
        }
        request_size += item_request;
        response_size += 1;
        batch.push(index);
    }

    if !batch.is_empty() {
        batches.push(batch);
    }

    debug!(tags = tags.len(), batches = batches.len(), "planned write");
    Ok(batches)
}
