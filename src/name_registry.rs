use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use lazy_static::lazy_static;
use parking_lot::Mutex;

/// Member-name interning for compact records.
///
/// Field and method names observed by the instrumentation are interned once
/// into 16-bit ids; records carry the id in their packed slot and text
/// sinks resolve it back when formatting. The registry is shared by all
/// producer threads.

lazy_static! {
    /// Maps static member names to their ids. Each name is stored once no
    /// matter how many call sites mention it.
    static ref NAME_REGISTRY: Mutex<HashMap<&'static str, u16>> = Mutex::new(HashMap::new());

    /// Next id to hand out. Starts at 1; id 0 is reserved for "unnamed".
    static ref NEXT_ID: AtomicU16 = AtomicU16::new(1);
}

/// Interns `name` and returns its id. Registering the same name again
/// returns the same id.
pub fn register_name(name: &'static str) -> u16 {
    let mut registry = NAME_REGISTRY.lock();
    if let Some(&id) = registry.get(name) {
        return id;
    }
    let id = allocate_id(&NEXT_ID);
    registry.insert(name, id);
    id
}

/// Wrapping back to the reserved id 0 would silently alias existing names.
fn allocate_id(counter: &AtomicU16) -> u16 {
    let id = counter.fetch_add(1, Ordering::Relaxed);
    assert_ne!(id, 0, "member name registry exhausted");
    id
}

/// Resolves an id back to its name. `None` for id 0 or an id that was never
/// issued.
pub fn lookup_name(id: u16) -> Option<&'static str> {
    if id == 0 {
        return None;
    }
    let registry = NAME_REGISTRY.lock();
    registry
        .iter()
        .find(|(_, &stored)| stored == id)
        .map(|(&name, _)| name)
}
