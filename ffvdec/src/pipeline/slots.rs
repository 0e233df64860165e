//! Input and output slots
//!
//! Slots are preallocated once per decoder and move between the free pool,
//! the queues, the client and the worker. A slot carries only its
//! `(pool id, index)` identity, never a handle back into the pool: returning
//! a slot is a pool operation taking the slot by value.

use crate::format::StreamFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// How decoded frames are handed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Decode for timing only, no frame payload
    None,
    /// Planar YUV copied into the slot's buffer
    #[default]
    Yuv,
    /// Opaque native frame, rendered through `FrameRenderer`
    SurfaceYuv,
}

/// Identity of a slot within one decoder's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId {
    pub(crate) pool: Uuid,
    pub(crate) index: usize,
}

/// Opaque reference to a frame held inside the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFrameRef(pub u64);

/// Buffer flags shared by input and output slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub end_of_stream: bool,
    pub first_sample: bool,
}

/// Encoded input unit
#[derive(Debug)]
pub struct InputSlot {
    id: SlotId,
    epoch: u64,
    data: Vec<u8>,
    timestamp_us: i64,
    flags: BufferFlags,
}

impl InputSlot {
    pub(crate) fn new(id: SlotId, initial_capacity: usize) -> Self {
        Self {
            id,
            epoch: 0,
            data: Vec::with_capacity(initial_capacity),
            timestamp_us: 0,
            flags: BufferFlags::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the payload with `bytes`
    ///
    /// The preallocated buffer is reused; it only grows when the unit is
    /// larger than anything this slot carried before.
    pub fn write(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Direct access for callers that fill the buffer incrementally
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn set_timestamp_us(&mut self, timestamp_us: i64) {
        self.timestamp_us = timestamp_us;
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn set_end_of_stream(&mut self) {
        self.flags.end_of_stream = true;
    }

    pub fn is_first_sample(&self) -> bool {
        self.flags.first_sample
    }

    pub fn set_first_sample(&mut self, first_sample: bool) {
        self.flags.first_sample = first_sample;
    }

    pub(crate) fn id(&self) -> SlotId {
        self.id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.timestamp_us = 0;
        self.flags = BufferFlags::default();
    }
}

/// Engine-writable part of an output slot
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    /// Set by the engine when the frame must not be shown
    pub should_be_skipped: bool,
    data: Vec<u8>,
    strides: [u32; 3],
    native: Option<NativeFrameRef>,
}

impl FrameBuffer {
    /// Size the buffer for a planar YUV 4:2:0 frame
    ///
    /// Returns false when the requested geometry cannot be addressed.
    pub fn init_for_yuv_frame(&mut self, width: u32, height: u32, y_stride: u32, uv_stride: u32) -> bool {
        if width == 0 || height == 0 || y_stride < width || uv_stride < width.div_ceil(2) {
            return false;
        }
        let uv_height = u64::from(height.div_ceil(2));
        let y_len = u64::from(y_stride) * u64::from(height);
        let uv_len = u64::from(uv_stride) * uv_height;
        let total = match uv_len
            .checked_mul(2)
            .and_then(|chroma| y_len.checked_add(chroma))
            .and_then(|total| usize::try_from(total).ok())
        {
            Some(total) if total <= i32::MAX as usize => total,
            _ => return false,
        };

        self.width = width;
        self.height = height;
        self.strides = [y_stride, uv_stride, uv_stride];
        self.data.clear();
        self.data.resize(total, 0);
        true
    }

    /// Attach an engine-owned frame instead of copying planes
    pub fn init_for_private_frame(&mut self, width: u32, height: u32, native: NativeFrameRef) {
        self.width = width;
        self.height = height;
        self.strides = [0; 3];
        self.data.clear();
        self.native = Some(native);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn strides(&self) -> [u32; 3] {
        self.strides
    }

    /// Y (0), U (1) or V (2) plane of a YUV frame
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let range = self.plane_range(index)?;
        self.data.get(range)
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let range = self.plane_range(index)?;
        self.data.get_mut(range)
    }

    pub fn native_frame(&self) -> Option<NativeFrameRef> {
        self.native
    }

    pub fn take_native_frame(&mut self) -> Option<NativeFrameRef> {
        self.native.take()
    }

    fn plane_range(&self, index: usize) -> Option<std::ops::Range<usize>> {
        if self.data.is_empty() || index > 2 {
            return None;
        }
        let y_len = self.strides[0] as usize * self.height as usize;
        let uv_len = self.strides[1] as usize * self.height.div_ceil(2) as usize;
        let start = match index {
            0 => 0,
            1 => y_len,
            _ => y_len + uv_len,
        };
        let len = if index == 0 { y_len } else { uv_len };
        Some(start..start + len)
    }

    /// Reset metadata and payload. The native frame reference survives so
    /// the worker can hand it back to the engine before the slot is reused.
    pub(crate) fn clear(&mut self) {
        self.timestamp_us = 0;
        self.width = 0;
        self.height = 0;
        self.should_be_skipped = false;
        self.data.clear();
        self.strides = [0; 3];
    }
}

/// Decoded output unit
#[derive(Debug)]
pub struct OutputSlot {
    id: SlotId,
    flags: BufferFlags,
    skipped_count: u32,
    mode: OutputMode,
    format: Option<Arc<StreamFormat>>,
    frame: FrameBuffer,
}

impl OutputSlot {
    pub(crate) fn new(id: SlotId) -> Self {
        Self {
            id,
            flags: BufferFlags::default(),
            skipped_count: 0,
            mode: OutputMode::default(),
            format: None,
            frame: FrameBuffer::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn timestamp_us(&self) -> i64 {
        self.frame.timestamp_us
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn is_first_sample(&self) -> bool {
        self.flags.first_sample
    }

    pub fn should_be_skipped(&self) -> bool {
        self.frame.should_be_skipped
    }

    /// Outputs dropped since the previous delivered output
    pub fn skipped_count(&self) -> u32 {
        self.skipped_count
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn format(&self) -> Option<&StreamFormat> {
        self.format.as_deref()
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub(crate) fn id(&self) -> SlotId {
        self.id
    }

    pub(crate) fn frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    pub(crate) fn mark_end_of_stream(&mut self) {
        self.flags.end_of_stream = true;
    }

    pub(crate) fn mark_first_sample(&mut self) {
        self.flags.first_sample = true;
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.frame.should_be_skipped = true;
    }

    pub(crate) fn prepare_delivery(
        &mut self,
        skipped_count: u32,
        mode: OutputMode,
        format: Option<Arc<StreamFormat>>,
    ) {
        self.skipped_count = skipped_count;
        self.mode = mode;
        self.format = format;
    }

    pub(crate) fn clear(&mut self) {
        self.flags = BufferFlags::default();
        self.skipped_count = 0;
        self.mode = OutputMode::default();
        self.format = None;
        self.frame.clear();
    }
}
