//! The heap page layout.
//!
//! A page is exactly `page_size()` bytes: a slot bitmap header followed by
//! `num_slots` fixed-size tuple slots. Slot `i`'s bit is bit `i % 8` of
//! header byte `i / 8`, least significant bit first. The bitmap is the sole
//! source of truth for occupancy; bytes in unused slots are ignored.

use std::sync::Arc;

use crate::errors::DbError;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::{page_size, PageId, RecordId};

/// Number of tuple slots on a page of `tuple_size`-byte tuples. Each slot
/// costs its tuple bytes plus one header bit.
pub fn slots_per_page(tuple_size: usize) -> usize {
    (page_size() * 8) / (tuple_size * 8 + 1)
}

fn header_len(num_slots: usize) -> usize {
    num_slots.div_ceil(8)
}

#[derive(Debug)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    data: Box<[u8]>,
    tuple_size: usize,
    num_slots: usize,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    /// Parses a page from its on-disk bytes. `data` must be exactly
    /// `page_size()` bytes.
    pub fn new(id: PageId, desc: Arc<TupleDesc>, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), page_size());
        let tuple_size = desc.tuple_size();
        let num_slots = slots_per_page(tuple_size);
        Self {
            id,
            desc,
            data: data.into_boxed_slice(),
            tuple_size,
            num_slots,
            dirtied_by: None,
        }
    }

    /// The bytes of a page with no tuples on it.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; page_size()]
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.data[slot / 8] >> (slot % 8) & 1 == 1
    }

    pub fn free_slots(&self) -> usize {
        (0..self.num_slots).filter(|&i| !self.is_slot_used(i)).count()
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        if used {
            self.data[slot / 8] |= 1 << (slot % 8);
        } else {
            self.data[slot / 8] &= !(1 << (slot % 8));
        }
    }

    fn slot_offset(&self, slot: usize) -> usize {
        header_len(self.num_slots) + slot * self.tuple_size
    }

    fn read_slot(&self, slot: usize) -> Tuple {
        let offset = self.slot_offset(slot);
        let mut tuple = Tuple::read_from(&self.desc, &self.data[offset..offset + self.tuple_size]);
        tuple.set_record_id(Some(RecordId::new(self.id, slot)));
        tuple
    }

    /// Iterates the tuples on used slots, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Tuple> + '_ {
        (0..self.num_slots)
            .filter(|&slot| self.is_slot_used(slot))
            .map(|slot| self.read_slot(slot))
    }

    /// Writes `t` into the lowest unused slot and points its record id
    /// there. Fails with `PageFull` when no slot is free and with
    /// `NotMatchingSchema` when the tuple's schema differs from the page's.
    pub fn insert_tuple(&mut self, t: &mut Tuple) -> Result<(), DbError> {
        if **t.desc() != *self.desc {
            return Err(DbError::NotMatchingSchema);
        }
        let slot = (0..self.num_slots)
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::PageFull)?;
        let offset = self.slot_offset(slot);
        t.write_to(&mut self.data[offset..offset + self.tuple_size]);
        self.set_slot(slot, true);
        t.set_record_id(Some(RecordId::new(self.id, slot)));
        Ok(())
    }

    /// Clears the slot bit of `t`. The tuple must carry a record id naming
    /// this page and a used slot; its bytes are left in place.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<(), DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotOnPage)?;
        if rid.page_id != self.id || rid.slot >= self.num_slots || !self.is_slot_used(rid.slot) {
            return Err(DbError::TupleNotOnPage);
        }
        self.set_slot(rid.slot, false);
        Ok(())
    }

    pub fn mark_dirty(&mut self, tx: Option<TransactionId>) {
        self.dirtied_by = tx;
    }

    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Serializes the page: bitmap, then the used slots' bytes. Unused slot
    /// bytes and the page tail are zero, so two pages with equal content
    /// serialize identically.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; page_size()];
        let header = header_len(self.num_slots);
        out[..header].copy_from_slice(&self.data[..header]);
        for slot in (0..self.num_slots).filter(|&i| self.is_slot_used(i)) {
            let offset = self.slot_offset(slot);
            out[offset..offset + self.tuple_size]
                .copy_from_slice(&self.data[offset..offset + self.tuple_size]);
        }
        out
    }

    /// Replaces the page content with an earlier snapshot and marks it
    /// clean. Used to undo an aborted transaction's writes.
    pub fn restore_from(&mut self, snapshot: &[u8]) {
        debug_assert_eq!(snapshot.len(), self.data.len());
        self.data.copy_from_slice(snapshot);
        self.dirtied_by = None;
    }
}
