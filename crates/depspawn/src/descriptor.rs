//! Object descriptors: identity, extent and access mode of a task argument
//!
//! Conflict detection between tasks is defined entirely on descriptors.

use std::fmt;
use std::ops::Range;

/// Identity of a tracked object
///
/// The address of the shared allocation that backs the object. A task drops
/// its argument handles when its body returns but stays registered until its
/// subtasks finish, so a new allocation can reuse the id of an object that is
/// still registered. Reuse only adds a spurious edge; it never removes one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of the allocation behind `ptr`
    pub(crate) fn of<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr as *const () as usize)
    }

    /// Create an id from a raw value
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Get the raw value
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How a task touches an argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    /// Private copy; never creates a dependency
    None,
    /// Shared read access
    Read,
    /// Exclusive read-write access
    Write,
}

impl AccessMode {
    /// Check if this mode writes
    pub fn is_write(self) -> bool {
        self == AccessMode::Write
    }

    /// Whether two accesses to overlapping storage must be ordered
    pub fn conflicts_with(self, other: AccessMode) -> bool {
        if self == AccessMode::None || other == AccessMode::None {
            return false;
        }
        self.is_write() || other.is_write()
    }
}

/// N-dimensional half-open box of element indices
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    ranges: Vec<Range<usize>>,
}

impl Region {
    /// Create a region from one range per dimension
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self { ranges }
    }

    /// Region covering a whole array of the given shape
    pub fn full(shape: &[usize]) -> Self {
        Self {
            ranges: shape.iter().map(|&len| 0..len).collect(),
        }
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.ranges.len()
    }

    /// Per-dimension ranges
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Number of elements in the region
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| r.end.saturating_sub(r.start)).product()
    }

    /// Check if the region holds no element
    pub fn is_empty(&self) -> bool {
        self.ranges.iter().any(|r| r.start >= r.end)
    }

    /// Check whether two regions share at least one element
    ///
    /// Regions of different rank are assumed to overlap.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.rank() != other.rank() {
            return true;
        }
        self.ranges
            .iter()
            .zip(&other.ranges)
            .all(|(a, b)| a.start < b.end && b.start < a.end)
    }

    /// Check whether `other` lies entirely inside this region
    pub fn contains(&self, other: &Region) -> bool {
        if other.is_empty() {
            return true;
        }
        self.rank() == other.rank()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(a, b)| a.start <= b.start && b.end <= a.end)
    }

    /// Check whether an index lies inside the region
    pub fn contains_index(&self, index: &[usize]) -> bool {
        index.len() == self.rank()
            && self.ranges.iter().zip(index).all(|(r, i)| r.contains(i))
    }

    /// Check that the region fits an array of the given shape
    pub(crate) fn check_within(&self, shape: &[usize]) -> Result<(), String> {
        if self.rank() != shape.len() {
            return Err(format!(
                "rank {} does not match array rank {}",
                self.rank(),
                shape.len()
            ));
        }
        for (dim, (range, &len)) in self.ranges.iter().zip(shape).enumerate() {
            if range.start > range.end {
                return Err(format!(
                    "dimension {dim}: start {} is past end {}",
                    range.start, range.end
                ));
            }
            if range.end > len {
                return Err(format!(
                    "dimension {dim}: range {}..{} exceeds extent {len}",
                    range.start, range.end
                ));
            }
        }
        Ok(())
    }
}

impl From<Range<usize>> for Region {
    fn from(range: Range<usize>) -> Self {
        Self::new(vec![range])
    }
}

impl<const N: usize> From<[Range<usize>; N]> for Region {
    fn from(ranges: [Range<usize>; N]) -> Self {
        Self::new(ranges.into())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", r.start, r.end)?;
        }
        write!(f, "]")
    }
}

/// Part of an object covered by an access
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Extent {
    /// The whole object
    Whole,
    /// A sub-block of an array-like object
    Region(Region),
}

impl Extent {
    /// Check whether two extents of the same object overlap
    pub fn overlaps(&self, other: &Extent) -> bool {
        match (self, other) {
            (Extent::Region(a), Extent::Region(b)) => a.overlaps(b),
            _ => true,
        }
    }
}

/// Normalized description of one dependency-relevant argument
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectDescriptor {
    /// Object identity
    pub object: ObjectId,
    /// Part of the object touched
    pub extent: Extent,
    /// Access mode
    pub mode: AccessMode,
}

impl ObjectDescriptor {
    /// Descriptor covering a whole object
    pub fn whole(object: ObjectId, mode: AccessMode) -> Self {
        Self {
            object,
            extent: Extent::Whole,
            mode,
        }
    }

    /// Descriptor covering a sub-block of an array
    pub fn region(object: ObjectId, region: Region, mode: AccessMode) -> Self {
        Self {
            object,
            extent: Extent::Region(region),
            mode,
        }
    }

    /// Check whether two descriptors touch common storage
    pub fn overlaps(&self, other: &ObjectDescriptor) -> bool {
        self.object == other.object && self.extent.overlaps(&other.extent)
    }

    /// Check whether two descriptors must be ordered
    pub fn conflicts_with(&self, other: &ObjectDescriptor) -> bool {
        self.mode.conflicts_with(other.mode) && self.overlaps(other)
    }
}

/// Coalesced, identity-ordered descriptors of one task
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSet {
    descriptors: Vec<ObjectDescriptor>,
}

impl DescriptorSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, dropping `None` accesses and merging duplicates
    ///
    /// Accesses to the same object with the same extent collapse into one
    /// descriptor with the strongest mode. Distinct sub-blocks of one array stay
    /// separate.
    pub fn coalesce(descriptors: impl IntoIterator<Item = ObjectDescriptor>) -> Self {
        let mut merged: Vec<ObjectDescriptor> = Vec::new();
        for desc in descriptors {
            if desc.mode == AccessMode::None {
                continue;
            }
            match merged
                .iter_mut()
                .find(|d| d.object == desc.object && d.extent == desc.extent)
            {
                Some(existing) => existing.mode = existing.mode.max(desc.mode),
                None => merged.push(desc),
            }
        }
        merged.sort_by_key(|d| d.object);
        Self { descriptors: merged }
    }

    /// Iterate over the descriptors
    pub fn iter(&self) -> std::slice::Iter<'_, ObjectDescriptor> {
        self.descriptors.iter()
    }

    /// Distinct object ids, ascending
    pub fn objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.descriptors.iter().map(|d| d.object).collect();
        ids.dedup();
        ids
    }

    /// Descriptors touching one object
    pub fn for_object(&self, object: ObjectId) -> impl Iterator<Item = &ObjectDescriptor> {
        self.descriptors.iter().filter(move |d| d.object == object)
    }

    /// Check whether any descriptor conflicts with `other`
    pub fn conflicts_with(&self, other: &ObjectDescriptor) -> bool {
        self.descriptors.iter().any(|d| d.conflicts_with(other))
    }

    /// Same set with every access downgraded to a read
    pub fn as_reads(&self) -> Self {
        Self::coalesce(self.descriptors.iter().cloned().map(|mut d| {
            d.mode = d.mode.min(AccessMode::Read);
            d
        }))
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> IntoIterator for &'a DescriptorSet {
    type Item = &'a ObjectDescriptor;
    type IntoIter = std::slice::Iter<'a, ObjectDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}
