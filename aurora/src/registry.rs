// Typed handle registries
//
// Every GPU resource the backend owns is stored in one of these
// tables and referenced from the outside through a plain u32 index.
// The index is wrapped in a handle typed by a marker so an image
// handle can never be passed where a buffer handle is expected,
// and uniform/storage buffer handles stay distinct even though
// both registries store the same object type.

use std::fmt;
use std::marker::PhantomData;

/// Sentinel index used by unset handles
pub const INVALID_HANDLE_INDEX: u32 = u32::MAX;

/// A typed index into one of the backend's resource registries.
///
/// Handles are cheap to copy and carry no lifetime. A freed handle's
/// index is recycled by the next create call, so holding on to stale
/// handles is a caller bug the registry asserts against where it can.
pub struct Handle<M> {
    index: u32,
    _marker: PhantomData<M>,
}

impl<M> Handle<M> {
    pub fn new(index: u32) -> Self {
        Self {
            index: index,
            _marker: PhantomData,
        }
    }

    /// An unset handle. Accessing a registry with this panics.
    pub fn invalid() -> Self {
        Self::new(INVALID_HANDLE_INDEX)
    }

    pub fn is_valid(&self) -> bool {
        self.index != INVALID_HANDLE_INDEX
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

// Manual impls so we don't require M: Copy/Clone/..
impl<M> Copy for Handle<M> {}
impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<M> PartialEq for Handle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<M> Eq for Handle<M> {}
impl<M> std::hash::Hash for Handle<M> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<M> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}
impl<M> Default for Handle<M> {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Handle→object table with free index recycling
///
/// Slots of destroyed objects are kept as `None` and their indices
/// pushed on a free list. The most recently freed index is handed
/// back first, which keeps the table dense and makes resize (which
/// destroys and recreates under the same index) work.
pub struct Registry<M, T> {
    entries: Vec<Option<T>>,
    free_indices: Vec<u32>,
    _marker: PhantomData<M>,
}

impl<M, T> Registry<M, T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_indices: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn add(&mut self, value: T) -> Handle<M> {
        if let Some(index) = self.free_indices.pop() {
            assert!(self.entries[index as usize].is_none());
            self.entries[index as usize] = Some(value);
            return Handle::new(index);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Some(value));
        Handle::new(index)
    }

    /// Removes the object and recycles its index
    pub fn remove(&mut self, handle: Handle<M>) -> T {
        let entry = self.entries[handle.index() as usize]
            .take()
            .expect("Registry: removing a dead handle");
        self.free_indices.push(handle.index());
        entry
    }

    /// Replace the object under an existing handle, returning the old one
    pub fn replace(&mut self, handle: Handle<M>, value: T) -> T {
        let slot = &mut self.entries[handle.index() as usize];
        assert!(slot.is_some(), "Registry: replacing a dead handle");
        std::mem::replace(slot, Some(value)).unwrap()
    }

    pub fn get(&self, handle: Handle<M>) -> &T {
        self.entries[handle.index() as usize]
            .as_ref()
            .expect("Registry: accessing a dead handle")
    }

    pub fn get_mut(&mut self, handle: Handle<M>) -> &mut T {
        self.entries[handle.index() as usize]
            .as_mut()
            .expect("Registry: accessing a dead handle")
    }

    pub fn contains(&self, handle: Handle<M>) -> bool {
        handle.is_valid()
            && (handle.index() as usize) < self.entries.len()
            && self.entries[handle.index() as usize].is_some()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.entries.len() - self.free_indices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<M>, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|v| (Handle::new(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<M>, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.as_mut().map(|v| (Handle::new(i as u32), v)))
    }

    /// Iterate over the handles of all live objects
    pub fn handles(&self) -> Vec<Handle<M>> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Drain every live object out of the table, for shutdown
    pub fn drain(&mut self) -> Vec<T> {
        self.free_indices.clear();
        self.entries.drain(..).filter_map(|e| e).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum TestTag {}

    #[test]
    fn recycles_most_recent_index() {
        let mut reg: Registry<TestTag, u32> = Registry::new();
        let a = reg.add(1);
        let b = reg.add(2);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);

        // create-destroy-create yields the same index
        reg.remove(b);
        let c = reg.add(3);
        assert_eq!(c.index(), 1);
        assert_eq!(*reg.get(c), 3);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    #[should_panic]
    fn dead_handle_access_panics() {
        let mut reg: Registry<TestTag, u32> = Registry::new();
        let a = reg.add(1);
        reg.remove(a);
        reg.get(a);
    }

    #[test]
    fn invalid_handle_is_not_contained() {
        let reg: Registry<TestTag, u32> = Registry::new();
        assert!(!reg.contains(Handle::invalid()));
    }
}
