//! Reference-counted resource cache
//!
//! Name-keyed cache shared by the texture, material and geometry systems.
//! Resources live in a [`SlotMap`], so a handle to a destroyed resource can
//! never alias whatever later reuses its slot. Device-side teardown stays with
//! the owning system: the cache hands a released resource back to the caller
//! instead of destroying it.

use std::collections::HashMap;

use slotmap::{Key, SlotMap};

use crate::render::api::{RenderError, RenderResult};

/// Book-keeping for one cached name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef<K> {
    /// Outstanding acquisitions
    pub reference_count: u32,
    /// Slot holding the resource
    pub handle: K,
    /// Destroy once the count drops to zero
    pub auto_release: bool,
}

/// Outcome of [`ResourceCache::release`]
#[derive(Debug)]
pub enum Release<R> {
    /// Still referenced, or kept resident
    Retained,
    /// Count reached zero with auto-release; the caller destroys the resource
    Evicted(R),
    /// Nothing was released
    Ignored,
}

/// Name-keyed, reference-counted resource table
#[derive(Debug)]
pub struct ResourceCache<K: Key, R> {
    kind: &'static str,
    capacity: usize,
    resources: SlotMap<K, R>,
    names: HashMap<String, ResourceRef<K>>,
    defaults: HashMap<String, K>,
}

impl<K: Key, R> ResourceCache<K, R> {
    /// Create an empty cache holding at most `capacity` resources
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            resources: SlotMap::with_capacity_and_key(capacity),
            names: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    /// Register an always-resident default resource
    ///
    /// Defaults take a slot but bypass reference counting.
    pub fn register_default(&mut self, name: impl Into<String>, resource: R) -> RenderResult<K> {
        let name = name.into();
        self.ensure_free_slot()?;
        let handle = self.resources.insert(resource);
        log::debug!("Registered default {} '{}'", self.kind, name);
        self.defaults.insert(name, handle);
        Ok(handle)
    }

    fn ensure_free_slot(&self) -> RenderResult<()> {
        if self.resources.len() >= self.capacity {
            log::error!("{} cache is full ({} slots)", self.kind, self.capacity);
            return Err(RenderError::ResourceExhausted { kind: self.kind, capacity: self.capacity });
        }
        Ok(())
    }

    /// Acquire `name`, invoking `load` on a miss
    ///
    /// A hit only increments the reference count; the `auto_release` of the
    /// first acquisition is kept. A full cache or a failed load leaves every
    /// entry untouched.
    pub fn acquire<F>(&mut self, name: &str, auto_release: bool, load: F) -> RenderResult<K>
    where
        F: FnOnce() -> RenderResult<R>,
    {
        if let Some(&handle) = self.defaults.get(name) {
            return Ok(handle);
        }
        if let Some(entry) = self.names.get_mut(name) {
            entry.reference_count += 1;
            log::trace!("{} '{}' reference count now {}", self.kind, name, entry.reference_count);
            return Ok(entry.handle);
        }

        self.ensure_free_slot()?;
        let resource = load().map_err(|e| {
            log::error!("Failed to load {} '{}': {}", self.kind, name, e);
            e
        })?;
        let handle = self.resources.insert(resource);
        self.names.insert(
            name.to_string(),
            ResourceRef {
                reference_count: 1,
                handle,
                auto_release,
            },
        );
        log::debug!("Loaded {} '{}' (auto_release: {})", self.kind, name, auto_release);
        Ok(handle)
    }

    /// Drop one reference to `name`
    ///
    /// Releasing a default, an unknown name, or a name already at zero logs a
    /// warning and does nothing.
    pub fn release(&mut self, name: &str) -> Release<R> {
        if self.defaults.contains_key(name) {
            log::warn!("Ignoring release of default {} '{}'", self.kind, name);
            return Release::Ignored;
        }
        let Some(entry) = self.names.get_mut(name) else {
            log::warn!("Release of unknown {} '{}'", self.kind, name);
            return Release::Ignored;
        };
        if entry.reference_count == 0 {
            log::warn!("Release of {} '{}' which has no references", self.kind, name);
            return Release::Ignored;
        }

        entry.reference_count -= 1;
        if entry.reference_count > 0 || !entry.auto_release {
            return Release::Retained;
        }

        let handle = entry.handle;
        self.names.remove(name);
        match self.resources.remove(handle) {
            Some(resource) => {
                log::debug!("Released {} '{}'", self.kind, name);
                Release::Evicted(resource)
            }
            None => Release::Ignored,
        }
    }

    /// Remove `name` regardless of its reference count
    ///
    /// Used for resources that are never auto-released. Defaults cannot be removed.
    pub fn remove(&mut self, name: &str) -> Option<R> {
        if self.defaults.contains_key(name) {
            log::warn!("Ignoring removal of default {} '{}'", self.kind, name);
            return None;
        }
        let entry = self.names.remove(name)?;
        if entry.reference_count > 0 {
            log::warn!(
                "Removing {} '{}' with {} outstanding references",
                self.kind,
                name,
                entry.reference_count
            );
        }
        self.resources.remove(entry.handle)
    }

    /// Remove every resource, defaults included, for teardown
    pub fn drain(&mut self) -> Vec<R> {
        self.names.clear();
        self.defaults.clear();
        self.resources.drain().map(|(_, resource)| resource).collect()
    }

    /// A live resource
    pub fn get(&self, handle: K) -> Option<&R> {
        self.resources.get(handle)
    }

    /// A live resource, mutably
    pub fn get_mut(&mut self, handle: K) -> Option<&mut R> {
        self.resources.get_mut(handle)
    }

    /// Handle of a cached or default name
    pub fn handle(&self, name: &str) -> Option<K> {
        self.defaults
            .get(name)
            .copied()
            .or_else(|| self.names.get(name).map(|entry| entry.handle))
    }

    /// Reference count of a cached name (`None` for defaults and unknown names)
    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.names.get(name).map(|entry| entry.reference_count)
    }

    /// Whether `name` is one of the defaults
    pub fn is_default(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// Resident resources, defaults included
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing is resident
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Maximum resident resources
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate live resources
    pub fn iter(&self) -> impl Iterator<Item = (K, &R)> {
        self.resources.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    slotmap::new_key_type! {
        struct TestId;
    }

    fn load(value: u32) -> impl FnOnce() -> RenderResult<u32> {
        move || Ok(value)
    }

    #[test]
    fn test_auto_release_evicts_at_zero() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 4);
        let handle = cache.acquire("x", true, load(7)).unwrap();
        for _ in 0..2 {
            assert_eq!(cache.acquire("x", true, || panic!("cached resource reloaded")).unwrap(), handle);
        }
        assert_eq!(cache.reference_count("x"), Some(3));

        assert!(matches!(cache.release("x"), Release::Retained));
        assert!(matches!(cache.release("x"), Release::Retained));
        assert!(matches!(cache.release("x"), Release::Evicted(7)));
        assert!(cache.get(handle).is_none());
        assert!(cache.handle("x").is_none());
    }

    #[test]
    fn test_no_auto_release_stays_resident() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 4);
        let handle = cache.acquire("x", false, load(1)).unwrap();
        cache.acquire("x", true, load(2)).unwrap();

        assert!(matches!(cache.release("x"), Release::Retained));
        assert!(matches!(cache.release("x"), Release::Retained));
        assert_eq!(cache.reference_count("x"), Some(0));
        assert_eq!(cache.get(handle), Some(&1));

        assert!(matches!(cache.release("x"), Release::Ignored));
        assert_eq!(cache.remove("x"), Some(1));
    }

    #[test]
    fn test_full_cache_leaves_entries_untouched() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 2);
        let a = cache.acquire("a", true, load(1)).unwrap();
        cache.acquire("b", true, load(2)).unwrap();

        let result = cache.acquire("c", true, load(3));
        assert!(matches!(result, Err(RenderError::ResourceExhausted { kind: "test", capacity: 2 })));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.reference_count("a"), Some(1));
        assert_eq!(cache.get(a), Some(&1));
        assert!(cache.handle("c").is_none());
    }

    #[test]
    fn test_failed_load_rolls_back() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 2);
        let result = cache.acquire("bad", true, || Err(RenderError::not_found("file", "bad.png")));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.handle("bad").is_none());
    }

    #[test]
    fn test_defaults_bypass_counting() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 2);
        let default = cache.register_default("default", 0).unwrap();

        assert_eq!(cache.acquire("default", true, load(9)).unwrap(), default);
        assert!(cache.reference_count("default").is_none());
        assert!(matches!(cache.release("default"), Release::Ignored));
        assert!(cache.remove("default").is_none());
        assert_eq!(cache.get(default), Some(&0));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 1);
        let old = cache.acquire("a", true, load(1)).unwrap();
        assert!(matches!(cache.release("a"), Release::Evicted(1)));
        let new = cache.acquire("b", true, load(2)).unwrap();

        assert_ne!(old, new);
        assert!(cache.get(old).is_none());
        assert_eq!(cache.get(new), Some(&2));
    }

    #[test]
    fn test_release_unknown_is_ignored() {
        let mut cache: ResourceCache<TestId, u32> = ResourceCache::new("test", 1);
        assert!(matches!(cache.release("missing"), Release::Ignored));
    }
}
