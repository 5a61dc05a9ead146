use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    response::graphql_error::{GraphQLError, GraphQLErrorPathSegment},
    utils::consts::COMMA,
};

/// A patch discovered while resolving, waiting to be resolved after the response it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingPatch {
    pub index: usize,
    pub path: Vec<GraphQLErrorPathSegment>,
    /// Serialized data that was in scope where the patch was discovered.
    pub data: Bytes,
}

/// Accumulates the serialized output of one node: its data, the comma separated error objects
/// it produced, and the patches discovered below it.
#[derive(Debug, Default)]
pub struct BufPair {
    pub data: BytesMut,
    pub errors: BytesMut,
    pub patches: Vec<PendingPatch>,
}

impl BufPair {
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.errors.clear();
        self.patches.clear();
    }

    pub fn write_error(&mut self, error: &GraphQLError) {
        if !self.errors.is_empty() {
            self.errors.put(COMMA);
        }
        error.write_to(&mut self.errors);
    }

    /// Appends already serialized, comma separated error objects.
    pub fn write_raw_errors(&mut self, errors: &[u8]) {
        if errors.is_empty() {
            return;
        }
        if !self.errors.is_empty() {
            self.errors.put(COMMA);
        }
        self.errors.extend_from_slice(errors);
    }
}

/// Moves everything out of `from` into `to`. A comma is put in front of the data only when
/// `prefix_data_with_comma` is set and there is data to move.
pub fn merge_buf_pairs(from: &mut BufPair, to: &mut BufPair, prefix_data_with_comma: bool) {
    if from.has_data() {
        if prefix_data_with_comma {
            to.data.put(COMMA);
        }
        to.data.extend_from_slice(&from.data);
        from.data.clear();
    }
    merge_buf_pair_errors(from, to);
    to.patches.append(&mut from.patches);
}

/// Moves the errors of `from` into `to`, leaving data and patches where they are.
pub fn merge_buf_pair_errors(from: &mut BufPair, to: &mut BufPair) {
    if from.has_errors() {
        to.write_raw_errors(&from.errors);
        from.errors.clear();
    }
}

pub trait Poolable: Default + Send {
    fn reset(&mut self);
}

impl Poolable for BufPair {
    fn reset(&mut self) {
        BufPair::reset(self);
    }
}

impl Poolable for BytesMut {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A free list of reusable buffers.
pub struct Pool<T: Poolable> {
    items: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Poolable> Pool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        Pooled { pool: self, item }
    }

    pub fn idle(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, mut item: T) {
        item.reset();
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() < self.max_idle {
            items.push(item);
        }
    }
}

/// Exclusive handle to a pooled item. The item is reset and returned on drop, on every exit path.
pub struct Pooled<'p, T: Poolable> {
    pool: &'p Pool<T>,
    item: T,
}

impl<T: Poolable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Poolable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.item));
    }
}

/// The pools shared by every resolution of one resolver.
pub struct Pools {
    pub buf_pairs: Pool<BufPair>,
    pub scratch: Pool<BytesMut>,
}

impl Pools {
    pub fn new(max_idle: usize) -> Self {
        Self {
            buf_pairs: Pool::new(max_idle),
            scratch: Pool::new(max_idle),
        }
    }

    pub fn buf_pair(&self) -> Pooled<'_, BufPair> {
        self.buf_pairs.acquire()
    }

    pub fn scratch(&self) -> Pooled<'_, BytesMut> {
        self.scratch.acquire()
    }
}
