//! Shared whole-object handles
//!
//! A [`Shared<T>`] is a cheaply clonable handle to one tracked object. Passing
//! `x.read()` or `x.write()` to a spawn declares the access and hands the body
//! a guard that derefs to the value.

use crate::access::{Classifier, TaskArg};
use crate::descriptor::{AccessMode, ObjectDescriptor, ObjectId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::warn;

/// Handle to a tracked object
pub struct Shared<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Shared");
        d.field("id", &self.id());
        match self.inner.try_read() {
            Some(value) => d.field("value", &&*value),
            None => d.field("value", &format_args!("<locked>")),
        };
        d.finish()
    }
}

impl<T> Shared<T> {
    /// Wrap a value
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Identity used for dependency tracking
    pub fn id(&self) -> ObjectId {
        ObjectId::of(Arc::as_ptr(&self.inner))
    }

    /// Check whether two handles refer to the same object
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Declare a read access
    pub fn read(&self) -> Read<T> {
        Read {
            shared: self.clone(),
        }
    }

    /// Declare a write access
    pub fn write(&self) -> Write<T> {
        Write {
            shared: self.clone(),
        }
    }

    /// Declare a read access without locking at bind time
    ///
    /// The body receives the handle itself and can pass it on to child
    /// tasks, which are ordered after every earlier writer of the object.
    pub fn claim_read(&self) -> Claim<T> {
        Claim {
            shared: self.clone(),
            mode: AccessMode::Read,
        }
    }

    /// Declare a write access without locking at bind time
    pub fn claim_write(&self) -> Claim<T> {
        Claim {
            shared: self.clone(),
            mode: AccessMode::Write,
        }
    }

    /// Lock for reading outside any task
    ///
    /// Not tracked; meant for sequential phases such as after `wait()`.
    pub fn get(&self) -> ReadGuard<T> {
        ReadGuard(self.inner.read_arc())
    }

    /// Lock for writing outside any task
    pub fn get_mut(&self) -> WriteGuard<T> {
        WriteGuard(self.inner.write_arc())
    }

    /// Take the value back if this is the last handle
    pub fn try_unwrap(self) -> Result<T, Self> {
        Arc::try_unwrap(self.inner)
            .map(RwLock::into_inner)
            .map_err(|inner| Self { inner })
    }

    fn acquire_read(&self) -> ReadGuard<T> {
        if let Some(guard) = self.inner.try_read_arc() {
            return ReadGuard(guard);
        }
        warn!(object = %self.id(), "read access contended; object is used outside its declared accesses");
        ReadGuard(self.inner.read_arc())
    }

    fn acquire_write(&self) -> WriteGuard<T> {
        if let Some(guard) = self.inner.try_write_arc() {
            return WriteGuard(guard);
        }
        warn!(object = %self.id(), "write access contended; object is used outside its declared accesses");
        WriteGuard(self.inner.write_arc())
    }
}

impl<T: Clone> Shared<T> {
    /// Copy the current value out
    pub fn snapshot(&self) -> T {
        self.inner.read().clone()
    }
}

/// Read access to a [`Shared`] object
pub struct Read<T> {
    shared: Shared<T>,
}

/// Write access to a [`Shared`] object
pub struct Write<T> {
    shared: Shared<T>,
}

/// Declared access that binds to the bare handle
pub struct Claim<T> {
    shared: Shared<T>,
    mode: AccessMode,
}

impl<T> Clone for Read<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Read<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Read({})", self.shared.id())
    }
}

impl<T> fmt::Debug for Write<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Write({})", self.shared.id())
    }
}

impl<T> fmt::Debug for Claim<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Claim({}, {:?})", self.shared.id(), self.mode)
    }
}

impl<T: Send + Sync + 'static> TaskArg for Read<T> {
    type Bound = ReadGuard<T>;

    fn classify(&self, cx: &mut Classifier) {
        cx.access(ObjectDescriptor::whole(self.shared.id(), AccessMode::Read));
    }

    fn bind(self) -> ReadGuard<T> {
        self.shared.acquire_read()
    }
}

impl<T: Send + Sync + 'static> TaskArg for Write<T> {
    type Bound = WriteGuard<T>;

    fn classify(&self, cx: &mut Classifier) {
        cx.access(ObjectDescriptor::whole(self.shared.id(), AccessMode::Write));
    }

    fn bind(self) -> WriteGuard<T> {
        self.shared.acquire_write()
    }
}

impl<T: Send + Sync + 'static> TaskArg for Claim<T> {
    type Bound = Shared<T>;

    fn classify(&self, cx: &mut Classifier) {
        cx.claim(ObjectDescriptor::whole(self.shared.id(), self.mode));
    }

    fn bind(self) -> Shared<T> {
        self.shared
    }
}

/// Shared borrow held for the duration of a task body
pub struct ReadGuard<T>(ArcRwLockReadGuard<RawRwLock, T>);

/// Exclusive borrow held for the duration of a task body
pub struct WriteGuard<T>(ArcRwLockWriteGuard<RawRwLock, T>);

impl<T> Deref for ReadGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Deref for WriteGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for WriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Debug> fmt::Debug for WriteGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::classify;

    #[test]
    fn test_identity_follows_allocation() {
        let a = Shared::new(1u32);
        let b = a.clone();
        let c = Shared::new(1u32);

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_bind_read_and_write() {
        let a = Shared::new(vec![1, 2, 3]);

        {
            let mut guard = a.write().bind();
            guard.push(4);
        }
        let guard = a.read().bind();
        assert_eq!(*guard, vec![1, 2, 3, 4]);

        // Concurrent readers are fine
        let second = a.read().bind();
        assert_eq!(second.len(), 4);
    }

    #[test]
    fn test_claim_declares_mode_and_binds_handle() {
        let a = Shared::new(0i64);

        let set = classify(&a.claim_write(), true).unwrap();
        let desc = set.iter().next().unwrap();
        assert_eq!(desc.mode, AccessMode::Write);

        let handle = a.claim_read().bind();
        assert!(handle.ptr_eq(&a));
    }

    #[test]
    fn test_try_unwrap() {
        let a = Shared::new(String::from("x"));
        let b = a.clone();

        let a = a.try_unwrap().unwrap_err();
        drop(b);
        assert_eq!(a.try_unwrap().unwrap(), "x");
    }

    #[test]
    fn test_get_and_snapshot() {
        let a = Shared::new(5u8);
        *a.get_mut() += 1;
        assert_eq!(*a.get(), 6);
        assert_eq!(a.snapshot(), 6);
        assert!(format!("{:?}", a).contains('6'));
    }
}
