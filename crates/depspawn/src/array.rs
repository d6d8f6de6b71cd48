//! Shared N-dimensional arrays with sub-block access
//!
//! Tasks that touch disjoint blocks of one [`SharedArray`] are independent
//! and may run at the same time. Element storage is guarded by a range lock,
//! so views of overlapping blocks never coexist even when a caller bypasses
//! dependency tracking with `ignore`.

use crate::access::{Classifier, TaskArg};
use crate::descriptor::{AccessMode, ObjectDescriptor, ObjectId, Region};
use crate::error::SpawnError;
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Index, IndexMut, Range};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors building an array
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    /// Element count does not match the shape
    #[error("shape {shape:?} needs {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Requested shape
        shape: Vec<usize>,
        /// Elements implied by the shape
        expected: usize,
        /// Elements supplied
        actual: usize,
    },
}

/// Regions currently lent out by one array
#[derive(Default)]
struct RangeLock {
    held: Mutex<Vec<Held>>,
    released: Condvar,
    next_token: AtomicU64,
}

struct Held {
    token: u64,
    region: Region,
    mode: AccessMode,
}

impl RangeLock {
    fn blocked(held: &[Held], region: &Region, mode: AccessMode) -> bool {
        held.iter()
            .any(|l| l.mode.conflicts_with(mode) && l.region.overlaps(region))
    }

    /// Lease a region, blocking while a conflicting lease is out
    fn acquire(&self, object: ObjectId, region: &Region, mode: AccessMode) -> u64 {
        let mut held = self.held.lock();
        if Self::blocked(&held, region, mode) {
            warn!(%object, %region, ?mode, "block access contended; array is used outside its declared accesses");
            while Self::blocked(&held, region, mode) {
                self.released.wait(&mut held);
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.push(Held {
            token,
            region: region.clone(),
            mode,
        });
        token
    }

    fn release(&self, token: u64) {
        self.held.lock().retain(|l| l.token != token);
        self.released.notify_all();
    }
}

struct ArrayInner<T> {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Box<[UnsafeCell<T>]>,
    leases: RangeLock,
}

// Element access goes through leases from `leases`; a write lease excludes
// every other lease on overlapping elements.
unsafe impl<T: Send + Sync> Sync for ArrayInner<T> {}

impl<T> ArrayInner<T> {
    fn new(shape: Vec<usize>, data: Vec<T>) -> Self {
        let mut strides = vec![1; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }
        Self {
            shape,
            strides,
            data: data.into_iter().map(UnsafeCell::new).collect(),
            leases: RangeLock::default(),
        }
    }

    fn offset(&self, index: &[usize]) -> usize {
        index.iter().zip(&self.strides).map(|(i, s)| i * s).sum()
    }
}

/// Handle to a shared N-dimensional array stored in row-major order
pub struct SharedArray<T> {
    inner: Arc<ArrayInner<T>>,
}

impl<T> Clone for SharedArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SharedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedArray")
            .field("id", &self.id())
            .field("shape", &self.inner.shape)
            .finish()
    }
}

impl<T> From<Vec<T>> for SharedArray<T> {
    fn from(data: Vec<T>) -> Self {
        Self {
            inner: Arc::new(ArrayInner::new(vec![data.len()], data)),
        }
    }
}

impl<T> SharedArray<T> {
    /// Build an array from row-major data
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<Self, ArrayError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ArrayError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            inner: Arc::new(ArrayInner::new(shape.to_vec(), data)),
        })
    }

    /// Build an array by evaluating `f` at every index
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let full = Region::full(shape);
        let data = IndexIter::new(&full).map(|index| f(&index)).collect();
        Self {
            inner: Arc::new(ArrayInner::new(shape.to_vec(), data)),
        }
    }

    /// Identity used for dependency tracking
    pub fn id(&self) -> ObjectId {
        ObjectId::of(Arc::as_ptr(&self.inner))
    }

    /// Extent of every dimension
    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.inner.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Check if the array holds no element
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Region covering the whole array
    pub fn full_region(&self) -> Region {
        Region::full(&self.inner.shape)
    }

    /// Select a sub-block
    ///
    /// The region is validated when the block is passed to a spawn.
    pub fn block(&self, region: impl Into<Region>) -> ArrayBlock<T> {
        ArrayBlock {
            array: self.clone(),
            region: region.into(),
        }
    }

    /// Select a range of the first dimension, all of the others
    pub fn rows(&self, rows: Range<usize>) -> ArrayBlock<T> {
        let mut ranges = vec![rows];
        ranges.extend(self.inner.shape.iter().skip(1).map(|&len| 0..len));
        self.block(Region::new(ranges))
    }

    /// Declare a read of the whole array
    pub fn read(&self) -> ArrayRead<T> {
        self.block(self.full_region()).read()
    }

    /// Declare a write of the whole array
    pub fn write(&self) -> ArrayWrite<T> {
        self.block(self.full_region()).write()
    }

    /// View the whole array outside any task
    ///
    /// Not tracked; blocks while a task holds a conflicting view.
    pub fn view(&self) -> ArrayView<T> {
        ArrayView::lease(self.clone(), self.full_region())
    }

    /// Mutable view of the whole array outside any task
    pub fn view_mut(&self) -> ArrayViewMut<T> {
        ArrayViewMut::lease(self.clone(), self.full_region())
    }

    /// Take the elements back if this is the last handle
    pub fn try_unwrap(self) -> Result<Vec<T>, Self> {
        Arc::try_unwrap(self.inner)
            .map(|inner| {
                inner
                    .data
                    .into_vec()
                    .into_iter()
                    .map(UnsafeCell::into_inner)
                    .collect()
            })
            .map_err(|inner| Self { inner })
    }
}

impl<T: Clone> SharedArray<T> {
    /// Array of the given shape with every element set to `value`
    pub fn filled(shape: &[usize], value: T) -> Self {
        let len = shape.iter().product();
        Self {
            inner: Arc::new(ArrayInner::new(shape.to_vec(), vec![value; len])),
        }
    }

    /// Copy all elements out in row-major order
    pub fn to_vec(&self) -> Vec<T> {
        self.view().iter().cloned().collect()
    }
}

/// Sub-block of a [`SharedArray`]
pub struct ArrayBlock<T> {
    array: SharedArray<T>,
    region: Region,
}

impl<T> Clone for ArrayBlock<T> {
    fn clone(&self) -> Self {
        Self {
            array: self.array.clone(),
            region: self.region.clone(),
        }
    }
}

impl<T> fmt::Debug for ArrayBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayBlock({}{})", self.array.id(), self.region)
    }
}

impl<T> ArrayBlock<T> {
    /// Array the block belongs to
    pub fn array(&self) -> &SharedArray<T> {
        &self.array
    }

    /// Covered region
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Select a sub-block in array coordinates
    pub fn block(&self, region: impl Into<Region>) -> ArrayBlock<T> {
        self.array.block(region)
    }

    /// Declare a read of this block
    pub fn read(&self) -> ArrayRead<T> {
        ArrayRead {
            block: self.clone(),
        }
    }

    /// Declare a write of this block
    pub fn write(&self) -> ArrayWrite<T> {
        ArrayWrite {
            block: self.clone(),
        }
    }

    /// Declare a read of this block without leasing it at bind time
    pub fn claim_read(&self) -> ArrayClaim<T> {
        ArrayClaim {
            block: self.clone(),
            mode: AccessMode::Read,
        }
    }

    /// Declare a write of this block without leasing it at bind time
    pub fn claim_write(&self) -> ArrayClaim<T> {
        ArrayClaim {
            block: self.clone(),
            mode: AccessMode::Write,
        }
    }

    fn classify_as(&self, cx: &mut Classifier, mode: AccessMode, claimed: bool) {
        let object = self.array.id();
        if let Err(reason) = self.region.check_within(self.array.shape()) {
            cx.reject(SpawnError::InvalidRegion { object, reason });
            return;
        }
        let desc = ObjectDescriptor::region(object, self.region.clone(), mode);
        if claimed {
            cx.claim(desc);
        } else {
            cx.access(desc);
        }
    }
}

/// Read access to a block
pub struct ArrayRead<T> {
    block: ArrayBlock<T>,
}

/// Write access to a block
pub struct ArrayWrite<T> {
    block: ArrayBlock<T>,
}

/// Declared block access that binds to the bare block
pub struct ArrayClaim<T> {
    block: ArrayBlock<T>,
    mode: AccessMode,
}

impl<T> fmt::Debug for ArrayRead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayRead({:?})", self.block)
    }
}

impl<T> fmt::Debug for ArrayWrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayWrite({:?})", self.block)
    }
}

impl<T: Send + Sync + 'static> TaskArg for ArrayRead<T> {
    type Bound = ArrayView<T>;

    fn classify(&self, cx: &mut Classifier) {
        self.block.classify_as(cx, AccessMode::Read, false);
    }

    fn bind(self) -> ArrayView<T> {
        ArrayView::lease(self.block.array, self.block.region)
    }
}

impl<T: Send + Sync + 'static> TaskArg for ArrayWrite<T> {
    type Bound = ArrayViewMut<T>;

    fn classify(&self, cx: &mut Classifier) {
        self.block.classify_as(cx, AccessMode::Write, false);
    }

    fn bind(self) -> ArrayViewMut<T> {
        ArrayViewMut::lease(self.block.array, self.block.region)
    }
}

impl<T: Send + Sync + 'static> TaskArg for ArrayClaim<T> {
    type Bound = ArrayBlock<T>;

    fn classify(&self, cx: &mut Classifier) {
        self.block.classify_as(cx, self.mode, true);
    }

    fn bind(self) -> ArrayBlock<T> {
        self.block
    }
}

/// Row-major iterator over the indices of a region
struct IndexIter {
    ranges: Vec<Range<usize>>,
    next: Option<Vec<usize>>,
}

impl IndexIter {
    fn new(region: &Region) -> Self {
        let next = if region.is_empty() {
            None
        } else {
            Some(region.ranges().iter().map(|r| r.start).collect())
        };
        Self {
            ranges: region.ranges().to_vec(),
            next,
        }
    }
}

impl Iterator for IndexIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for d in (0..self.ranges.len()).rev() {
            following[d] += 1;
            if following[d] < self.ranges[d].end {
                self.next = Some(following);
                break;
            }
            following[d] = self.ranges[d].start;
        }
        Some(current)
    }
}

/// Leased region shared by both view kinds
struct Lease<T> {
    array: Arc<ArrayInner<T>>,
    region: Region,
    token: u64,
}

impl<T> Lease<T> {
    /// Lease `region`; panics if it does not fit the array
    ///
    /// Offsets are only confined to the region when every range lies inside
    /// its dimension, so an oversized region could reach cells another lease
    /// holds.
    fn new(array: SharedArray<T>, region: Region, mode: AccessMode) -> Self {
        let object = array.id();
        if let Err(reason) = region.check_within(array.shape()) {
            panic!("cannot lease region {region} of {object}: {reason}");
        }
        let token = array.inner.leases.acquire(object, &region, mode);
        Self {
            array: array.inner,
            region,
            token,
        }
    }

    fn offset_of(&self, index: &[usize]) -> Option<usize> {
        self.region
            .contains_index(index)
            .then(|| self.array.offset(index))
    }

    fn cell(&self, index: &[usize]) -> &UnsafeCell<T> {
        match self.offset_of(index) {
            Some(offset) => &self.array.data[offset],
            None => panic!("index {index:?} outside block {}", self.region),
        }
    }

    /// Flat storage range if the region is contiguous in row-major order
    fn contiguous(&self) -> Option<Range<usize>> {
        if self.region.is_empty() {
            return Some(0..0);
        }
        let ranges = self.region.ranges();
        let first_wide = ranges.iter().position(|r| r.len() > 1).unwrap_or(ranges.len());
        let tail_full = ranges
            .iter()
            .zip(&self.array.shape)
            .skip(first_wide + 1)
            .all(|(r, &len)| r.start == 0 && r.end == len);
        if !tail_full {
            return None;
        }
        let start: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        let start = self.array.offset(&start);
        Some(start..start + self.region.len())
    }

    fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        IndexIter::new(&self.region).map(move |index| self.array.offset(&index))
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.array.leases.release(self.token);
    }
}

/// Shared view of a block, held for the duration of a task body
pub struct ArrayView<T> {
    lease: Lease<T>,
}

/// Exclusive view of a block, held for the duration of a task body
pub struct ArrayViewMut<T> {
    lease: Lease<T>,
}

impl<T> ArrayView<T> {
    fn lease(array: SharedArray<T>, region: Region) -> Self {
        Self {
            lease: Lease::new(array, region, AccessMode::Read),
        }
    }

    /// Covered region, in array coordinates
    pub fn region(&self) -> &Region {
        &self.lease.region
    }

    /// Shape of the whole array
    pub fn shape(&self) -> &[usize] {
        &self.lease.array.shape
    }

    /// Element at `index`, if it lies inside the block
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        let offset = self.lease.offset_of(index)?;
        // SAFETY: the read lease excludes writers of this element.
        Some(unsafe { &*self.lease.array.data[offset].get() })
    }

    /// Elements as a slice when the block is contiguous
    pub fn as_slice(&self) -> Option<&[T]> {
        let range = self.lease.contiguous()?;
        let cells = &self.lease.array.data[range];
        // SAFETY: `UnsafeCell<T>` has the layout of `T`; the lease covers the range.
        Some(unsafe { std::slice::from_raw_parts(cells.as_ptr() as *const T, cells.len()) })
    }

    /// Elements in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let data = &self.lease.array.data;
        // SAFETY: the read lease excludes writers of every element in the block.
        self.lease.offsets().map(move |o| unsafe { &*data[o].get() })
    }
}

impl<T> ArrayViewMut<T> {
    fn lease(array: SharedArray<T>, region: Region) -> Self {
        Self {
            lease: Lease::new(array, region, AccessMode::Write),
        }
    }

    /// Covered region, in array coordinates
    pub fn region(&self) -> &Region {
        &self.lease.region
    }

    /// Shape of the whole array
    pub fn shape(&self) -> &[usize] {
        &self.lease.array.shape
    }

    /// Element at `index`, if it lies inside the block
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        let offset = self.lease.offset_of(index)?;
        // SAFETY: the write lease is exclusive on this element.
        Some(unsafe { &*self.lease.array.data[offset].get() })
    }

    /// Mutable element at `index`, if it lies inside the block
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        let offset = self.lease.offset_of(index)?;
        // SAFETY: the write lease is exclusive and `&mut self` prevents aliasing.
        Some(unsafe { &mut *self.lease.array.data[offset].get() })
    }

    /// Overwrite the element at `index`; panics outside the block
    pub fn set(&mut self, index: &[usize], value: T) {
        self[index] = value;
    }

    /// Overwrite every element of the block
    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        for item in self.iter_mut() {
            *item = value.clone();
        }
    }

    /// Elements as a slice when the block is contiguous
    pub fn as_slice(&self) -> Option<&[T]> {
        let range = self.lease.contiguous()?;
        let cells = &self.lease.array.data[range];
        // SAFETY: `UnsafeCell<T>` has the layout of `T`; the lease covers the range.
        Some(unsafe { std::slice::from_raw_parts(cells.as_ptr() as *const T, cells.len()) })
    }

    /// Elements as a mutable slice when the block is contiguous
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        let range = self.lease.contiguous()?;
        let cells = &self.lease.array.data[range];
        // SAFETY: as above, and the write lease is exclusive.
        Some(unsafe { std::slice::from_raw_parts_mut(cells.as_ptr() as *mut T, cells.len()) })
    }

    /// Elements in row-major order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let data = &self.lease.array.data;
        // SAFETY: the write lease is exclusive on every element in the block.
        self.lease.offsets().map(move |o| unsafe { &*data[o].get() })
    }

    /// Mutable elements in row-major order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        let data = &self.lease.array.data;
        // SAFETY: offsets of distinct indices are distinct, so no element is
        // yielded twice; the write lease is exclusive.
        self.lease.offsets().map(move |o| unsafe { &mut *data[o].get() })
    }
}

impl<T, const N: usize> Index<[usize; N]> for ArrayView<T> {
    type Output = T;

    fn index(&self, index: [usize; N]) -> &T {
        // SAFETY: the read lease excludes writers of this element.
        unsafe { &*self.lease.cell(&index).get() }
    }
}

impl<T> Index<usize> for ArrayView<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self[[index]]
    }
}

impl<T> Index<&[usize]> for ArrayViewMut<T> {
    type Output = T;

    fn index(&self, index: &[usize]) -> &T {
        // SAFETY: the write lease is exclusive on this element.
        unsafe { &*self.lease.cell(index).get() }
    }
}

impl<T> IndexMut<&[usize]> for ArrayViewMut<T> {
    fn index_mut(&mut self, index: &[usize]) -> &mut T {
        // SAFETY: the write lease is exclusive and `&mut self` prevents aliasing.
        unsafe { &mut *self.lease.cell(index).get() }
    }
}

impl<T, const N: usize> Index<[usize; N]> for ArrayViewMut<T> {
    type Output = T;

    fn index(&self, index: [usize; N]) -> &T {
        &self[&index[..]]
    }
}

impl<T, const N: usize> IndexMut<[usize; N]> for ArrayViewMut<T> {
    fn index_mut(&mut self, index: [usize; N]) -> &mut T {
        &mut self[&index[..]]
    }
}

impl<T> Index<usize> for ArrayViewMut<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self[[index]]
    }
}

impl<T> IndexMut<usize> for ArrayViewMut<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self[[index]]
    }
}

impl<T> fmt::Debug for ArrayView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayView({})", self.lease.region)
    }
}

impl<T> fmt::Debug for ArrayViewMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayViewMut({})", self.lease.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_from_vec_checks_shape() {
        let err = SharedArray::from_vec(&[2, 3], vec![0; 5]).unwrap_err();
        assert_eq!(
            err,
            ArrayError::ShapeMismatch {
                shape: vec![2, 3],
                expected: 6,
                actual: 5
            }
        );
        let a = SharedArray::from_vec(&[2, 3], (0..6).collect()).unwrap();
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn test_row_major_layout() {
        let a = SharedArray::from_fn(&[3, 4], |ix| ix[0] * 10 + ix[1]);
        let view = a.view();
        assert_eq!(view[[0, 0]], 0);
        assert_eq!(view[[1, 2]], 12);
        assert_eq!(view[[2, 3]], 23);
        assert_eq!(view.as_slice().unwrap()[5], 11);
    }

    #[test]
    fn test_block_view_is_confined() {
        let a = SharedArray::from_fn(&[4, 4], |ix| ix[0] * 4 + ix[1]);
        let view = a.block([1..3, 1..3]).read().bind();

        assert_eq!(view.get(&[1, 1]), Some(&5));
        assert_eq!(view.get(&[0, 0]), None);
        assert_eq!(view.iter().copied().collect::<Vec<_>>(), vec![5, 6, 9, 10]);
        assert!(view.as_slice().is_none());
    }

    #[test]
    fn test_contiguous_rows() {
        let a = SharedArray::from_fn(&[4, 3], |ix| ix[0] * 3 + ix[1]);
        let mut rows = a.rows(1..3).write().bind();
        let slice = rows.as_mut_slice().unwrap();
        assert_eq!(slice, &[3, 4, 5, 6, 7, 8]);
        slice[0] = 100;
        drop(rows);

        // A single partial row is contiguous too
        let part = a.block([2..3, 1..3]).read().bind();
        assert_eq!(part.as_slice().unwrap(), &[7, 8]);
        drop(part);

        assert_eq!(a.to_vec()[3], 100);
    }

    #[test]
    fn test_write_view_mutation() {
        let a = SharedArray::filled(&[6], 0i32);
        {
            let mut low = a.block(0..3).write().bind();
            let mut high = a.block(3..6).write().bind();
            low.fill(1);
            high[4] = 7;
            high.set(&[5], 9);
            for x in high.iter_mut() {
                *x += 1;
            }
        }
        assert_eq!(a.to_vec(), vec![1, 1, 1, 1, 8, 10]);
    }

    #[test]
    #[should_panic(expected = "outside block")]
    fn test_index_outside_block_panics() {
        let a = SharedArray::filled(&[6], 0i32);
        let view = a.block(0..3).read().bind();
        let _ = view[4];
    }

    #[test]
    #[should_panic(expected = "exceeds extent")]
    fn test_bind_rejects_oversized_region() {
        let a = SharedArray::filled(&[4, 4], 0u8);
        // Row 0, columns 4..8 would alias row 1 in storage
        let _view = a.block([0..1, 0..8]).write().bind();
    }

    #[test]
    #[should_panic(expected = "does not match array rank")]
    fn test_bind_rejects_rank_mismatch() {
        let a = SharedArray::filled(&[4, 4], 0u8);
        let _view = a.block(0..2).read().bind();
    }

    #[test]
    fn test_adjacent_row_leases_do_not_alias() {
        let a = SharedArray::filled(&[4, 4], 0u8);
        let mut first = a.block([0..1, 0..4]).write().bind();
        let mut second = a.block([1..2, 0..4]).write().bind();
        let p = first.get_mut(&[0, 3]).map(|x| x as *mut u8);
        let q = second.get_mut(&[1, 0]).map(|x| x as *mut u8);
        assert!(p.is_some() && q.is_some());
        assert_ne!(p, q);
        assert!(first.get_mut(&[1, 1]).is_none());
    }

    #[test]
    fn test_overlapping_write_lease_waits() {
        let a = SharedArray::filled(&[10], 0u32);
        let held = a.block(0..5).write().bind();

        let (tx, rx) = mpsc::channel();
        let other = a.clone();
        let handle = thread::spawn(move || {
            let mut view = other.block(4..6).write().bind();
            view[4] = 42;
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(a.to_vec()[4], 42);
    }

    #[test]
    fn test_claim_binds_block() {
        let a = SharedArray::filled(&[8, 8], 0u8);
        let block = a.rows(0..4).claim_write().bind();
        assert_eq!(block.region(), &Region::from([0..4, 0..8]));
        assert_eq!(block.array().id(), a.id());
    }

    #[test]
    fn test_try_unwrap() {
        let a = SharedArray::from(vec![1, 2, 3]);
        let b = a.clone();
        let a = a.try_unwrap().unwrap_err();
        drop(b);
        assert_eq!(a.try_unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_index_iter_order() {
        let all: Vec<_> = IndexIter::new(&Region::from([0..2, 1..3])).collect();
        assert_eq!(all, vec![vec![0, 1], vec![0, 2], vec![1, 1], vec![1, 2]]);
        assert_eq!(IndexIter::new(&Region::from(2..2)).count(), 0);
    }
}
