//! Buffer pool
//!
//! Two fixed free lists (input and output) allocated once at construction,
//! plus a ledger of which slots are currently lent to the client or to the
//! worker. Exhaustion is backpressure, never an error. Every method here runs
//! under the pipeline mutex.

use crate::error::{Error, Result};
use crate::pipeline::slots::{InputSlot, OutputSlot, SlotId};
use serde::Serialize;
use uuid::Uuid;

/// Where the slots of one pool currently are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SlotCounts {
    pub capacity: usize,
    pub free: usize,
    /// Pending queue (inputs) or ready queue (outputs)
    pub queued: usize,
    pub client: usize,
    pub worker: usize,
}

impl SlotCounts {
    /// Sum over every location; always equals `capacity`
    pub fn total(&self) -> usize {
        self.free + self.queued + self.client + self.worker
    }
}

pub(crate) struct BufferPool {
    id: Uuid,
    input_capacity: usize,
    output_capacity: usize,
    free_inputs: Vec<InputSlot>,
    free_outputs: Vec<OutputSlot>,
    /// Index of the input the client acquired but has not submitted yet
    dequeued_input: Option<usize>,
    client_outputs: Vec<bool>,
    worker_inputs: usize,
    worker_outputs: usize,
}

impl BufferPool {
    pub(crate) fn new(input_capacity: usize, output_capacity: usize, initial_input_size: usize) -> Self {
        let id = Uuid::new_v4();
        let free_inputs = (0..input_capacity)
            .map(|index| InputSlot::new(SlotId { pool: id, index }, initial_input_size))
            .collect();
        let free_outputs = (0..output_capacity)
            .map(|index| OutputSlot::new(SlotId { pool: id, index }))
            .collect();

        Self {
            id,
            input_capacity,
            output_capacity,
            free_inputs,
            free_outputs,
            dequeued_input: None,
            client_outputs: vec![false; output_capacity],
            worker_inputs: 0,
            worker_outputs: 0,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    fn owns(&self, id: SlotId, capacity: usize) -> bool {
        id.pool == self.id && id.index < capacity
    }

    pub(crate) fn input_counts(&self, queued: usize) -> SlotCounts {
        SlotCounts {
            capacity: self.input_capacity,
            free: self.free_inputs.len(),
            queued,
            client: usize::from(self.dequeued_input.is_some()),
            worker: self.worker_inputs,
        }
    }

    pub(crate) fn output_counts(&self, queued: usize) -> SlotCounts {
        SlotCounts {
            capacity: self.output_capacity,
            free: self.free_outputs.len(),
            queued,
            client: self.client_outputs.iter().filter(|held| **held).count(),
            worker: self.worker_outputs,
        }
    }

    pub(crate) fn has_free_output(&self) -> bool {
        !self.free_outputs.is_empty()
    }

    // ===== Client side =====

    /// Lend a free input to the client; at most one may be outstanding
    pub(crate) fn acquire_input(&mut self, epoch: u64) -> Result<Option<InputSlot>> {
        if let Some(index) = self.dequeued_input {
            return Err(Error::ProtocolMisuse(format!(
                "input slot {} is still dequeued; submit or discard it first",
                index
            )));
        }
        let Some(mut slot) = self.free_inputs.pop() else {
            return Ok(None);
        };
        slot.set_epoch(epoch);
        self.dequeued_input = Some(slot.id().index);
        Ok(Some(slot))
    }

    /// Take back the client's dequeued input (before queueing or freeing it)
    pub(crate) fn reclaim_dequeued_input(&mut self, slot: &InputSlot) -> Result<()> {
        if !self.owns(slot.id(), self.input_capacity) {
            return Err(Error::ProtocolMisuse(
                "input slot was not acquired from this decoder".to_string(),
            ));
        }
        if self.dequeued_input != Some(slot.id().index) {
            return Err(Error::ProtocolMisuse(format!(
                "input slot {} is not the one last acquired",
                slot.id().index
            )));
        }
        self.dequeued_input = None;
        Ok(())
    }

    pub(crate) fn lend_output_to_client(&mut self, slot: &OutputSlot) {
        self.client_outputs[slot.id().index] = true;
    }

    pub(crate) fn reclaim_client_output(&mut self, slot: &OutputSlot) -> Result<()> {
        let id = slot.id();
        if !self.owns(id, self.output_capacity) {
            return Err(Error::ProtocolMisuse(
                "output slot was not produced by this decoder".to_string(),
            ));
        }
        if !std::mem::replace(&mut self.client_outputs[id.index], false) {
            return Err(Error::ProtocolMisuse(format!(
                "output slot {} is not held by the client",
                id.index
            )));
        }
        Ok(())
    }

    // ===== Worker side =====

    pub(crate) fn lend_input_to_worker(&mut self) {
        self.worker_inputs += 1;
    }

    pub(crate) fn reclaim_worker_input(&mut self) {
        debug_assert!(self.worker_inputs > 0, "worker returned an input it never held");
        self.worker_inputs = self.worker_inputs.saturating_sub(1);
    }

    pub(crate) fn take_free_output(&mut self) -> Option<OutputSlot> {
        let slot = self.free_outputs.pop()?;
        self.worker_outputs += 1;
        Some(slot)
    }

    pub(crate) fn lend_outputs_to_worker(&mut self, count: usize) {
        self.worker_outputs += count;
    }

    pub(crate) fn reclaim_worker_output(&mut self) {
        debug_assert!(self.worker_outputs > 0, "worker returned an output it never held");
        self.worker_outputs = self.worker_outputs.saturating_sub(1);
    }

    // ===== Free lists =====

    pub(crate) fn release_input(&mut self, mut slot: InputSlot) {
        slot.clear();
        self.free_inputs.push(slot);
        debug_assert!(self.free_inputs.len() <= self.input_capacity);
    }

    pub(crate) fn release_output(&mut self, mut slot: OutputSlot) {
        slot.clear();
        self.free_outputs.push(slot);
        debug_assert!(self.free_outputs.len() <= self.output_capacity);
    }

    /// Free outputs still pinning a native frame (teardown only)
    pub(crate) fn free_outputs_mut(&mut self) -> impl Iterator<Item = &mut OutputSlot> {
        self.free_outputs.iter_mut()
    }
}
