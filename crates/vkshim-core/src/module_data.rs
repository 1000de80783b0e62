use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

type Slot = Arc<dyn Any + Send + Sync>;

/// Typed private state attached to a handle record, one slot per emulation
/// module. Slots live exactly as long as the record that owns them.
#[derive(Default)]
pub struct ModuleData {
    slots: RwLock<HashMap<&'static str, Slot>>,
}

impl ModuleData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `module`, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&self, module: &'static str, value: T) {
        self.slots.write().insert(module, Arc::new(value));
    }

    /// Fetch the value stored by `module`, if it has the requested type.
    pub fn get<T: Any + Send + Sync>(&self, module: &'static str) -> Option<Arc<T>> {
        let slot = self.slots.read().get(module)?.clone();
        slot.downcast::<T>().ok()
    }

    pub fn remove(&self, module: &'static str) -> bool {
        self.slots.write().remove(module).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl fmt::Debug for ModuleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        f.debug_set().entries(slots.keys()).finish()
    }
}
