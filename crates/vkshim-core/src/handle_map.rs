use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::Handle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::CoreError;
use crate::module_data::ModuleData;

/// Layer-private record for one application-visible handle.
///
/// `handle` is what the application holds; `driver` is what the next link in
/// the chain understands. They are equal for objects registered by identity
/// and differ for objects wrapped with a layer-issued id.
pub struct HandleRecord<H, R> {
    handle: H,
    driver: H,
    data: ModuleData,
    state: R,
}

impl<H: Handle + Copy, R> HandleRecord<H, R> {
    fn new(handle: H, driver: H, state: R) -> Self {
        Self {
            handle,
            driver,
            data: ModuleData::new(),
            state,
        }
    }

    /// The handle the application holds.
    pub fn handle(&self) -> H {
        self.handle
    }

    /// The handle understood by the next layer or driver.
    pub fn driver(&self) -> H {
        self.driver
    }

    pub fn is_wrapped(&self) -> bool {
        self.handle.as_raw() != self.driver.as_raw()
    }

    /// Per-module private state attached to this object.
    pub fn data(&self) -> &ModuleData {
        &self.data
    }

    pub fn state(&self) -> &R {
        &self.state
    }
}

impl<H, R> Deref for HandleRecord<H, R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.state
    }
}

/// Thread-safe map from application handles to their records.
///
/// Lookups take a shard read lock only; registration and destruction lock a
/// single shard, so distinct objects never contend on one global lock.
pub struct HandleMap<H, R> {
    kind: &'static str,
    records: DashMap<u64, Arc<HandleRecord<H, R>>>,
    /// Counter for generating unique application handles
    next_id: AtomicU64,
}

impl<H: Handle + Copy, R> HandleMap<H, R> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            records: DashMap::new(),
            // Start well above 0 to avoid confusion with VK_NULL_HANDLE
            next_id: AtomicU64::new(0x1000),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn invalid(&self, raw: u64) -> CoreError {
        CoreError::InvalidHandle {
            kind: self.kind,
            raw,
        }
    }

    /// Track an object whose application handle is the driver handle itself.
    pub fn register(&self, handle: H, state: R) -> Result<Arc<HandleRecord<H, R>>, CoreError> {
        let raw = handle.as_raw();
        if raw == 0 {
            return Err(self.invalid(raw));
        }
        match self.records.entry(raw) {
            Entry::Occupied(_) => Err(CoreError::DuplicateHandle {
                kind: self.kind,
                raw,
            }),
            Entry::Vacant(slot) => {
                let record = Arc::new(HandleRecord::new(handle, handle, state));
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    /// Return the record for `handle`, registering it by identity if this is
    /// the first time it is seen.
    pub fn get_or_register(
        &self,
        handle: H,
        make: impl FnOnce() -> R,
    ) -> Result<Arc<HandleRecord<H, R>>, CoreError> {
        self.get_or_try_register(handle, || Ok::<R, CoreError>(make()))
    }

    /// Like `get_or_register`, with a fallible `make`. `make` runs at most
    /// once per handle even when threads race: it is called while the
    /// handle's shard is locked, so it must not use this map. A failed
    /// `make` registers nothing.
    pub fn get_or_try_register<E: From<CoreError>>(
        &self,
        handle: H,
        make: impl FnOnce() -> Result<R, E>,
    ) -> Result<Arc<HandleRecord<H, R>>, E> {
        if let Ok(existing) = self.get(handle) {
            return Ok(existing);
        }
        let raw = handle.as_raw();
        if raw == 0 {
            return Err(self.invalid(raw).into());
        }
        match self.records.entry(raw) {
            Entry::Occupied(slot) => Ok(Arc::clone(slot.get())),
            Entry::Vacant(slot) => {
                let record = Arc::new(HandleRecord::new(handle, handle, make()?));
                slot.insert(Arc::clone(&record));
                Ok(record)
            }
        }
    }

    /// Issue a fresh application handle standing in for `driver`.
    pub fn wrap(&self, driver: H, state: R) -> Result<Arc<HandleRecord<H, R>>, CoreError> {
        if driver.as_raw() == 0 {
            return Err(self.invalid(0));
        }
        let handle = H::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(HandleRecord::new(handle, driver, state));
        self.records.insert(handle.as_raw(), record.clone());
        Ok(record)
    }

    /// Look up the record for an application handle.
    pub fn get(&self, handle: H) -> Result<Arc<HandleRecord<H, R>>, CoreError> {
        let raw = handle.as_raw();
        self.records
            .get(&raw)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| self.invalid(raw))
    }

    /// Translate an application handle to the handle the next link understands.
    pub fn unwrap(&self, handle: H) -> Result<H, CoreError> {
        let raw = handle.as_raw();
        self.records
            .get(&raw)
            .map(|r| r.driver)
            .ok_or_else(|| self.invalid(raw))
    }

    /// Remove the record for `handle`. After this returns no lookup of the
    /// handle can succeed.
    pub fn destroy(&self, handle: H) -> Result<Arc<HandleRecord<H, R>>, CoreError> {
        let raw = handle.as_raw();
        self.records
            .remove(&raw)
            .map(|(_, r)| r)
            .ok_or_else(|| self.invalid(raw))
    }

    pub fn contains(&self, handle: H) -> bool {
        self.records.contains_key(&handle.as_raw())
    }

    /// Return number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of all live application handles.
    pub fn handles(&self) -> Vec<H> {
        self.records.iter().map(|r| r.handle).collect()
    }
}
