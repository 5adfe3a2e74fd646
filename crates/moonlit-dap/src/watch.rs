//! Watch snapshots published by the interpreter thread.

use std::sync::Arc;

use crate::source::SourceRef;
use crate::value::DebugValue;

/// Category of runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchType {
    /// Active call frames, innermost first.
    CallStack,
    /// Locals of the current frame.
    Locals,
    /// User-defined watch expressions.
    Watches,
    /// The interpreter's value stack.
    VStack,
    /// Coroutines; the last entry is the running one.
    Threads,
}

impl WatchType {
    /// Every watch type, in storage order.
    pub const ALL: [WatchType; 5] = [
        WatchType::CallStack,
        WatchType::Locals,
        WatchType::Watches,
        WatchType::VStack,
        WatchType::Threads,
    ];

    fn index(self) -> usize {
        match self {
            WatchType::CallStack => 0,
            WatchType::Locals => 1,
            WatchType::Watches => 2,
            WatchType::VStack => 3,
            WatchType::Threads => 4,
        }
    }
}

/// One row of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchItem {
    /// Frame, variable, or coroutine name.
    pub name: String,
    /// Current value, when the row has one.
    pub value: Option<DebugValue>,
    /// Source range the row refers to.
    pub location: Option<SourceRef>,
}

impl WatchItem {
    /// A row with a name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            location: None,
        }
    }

    /// Attach a value.
    pub fn with_value(mut self, value: DebugValue) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach a source location.
    pub fn with_location(mut self, location: SourceRef) -> Self {
        self.location = Some(location);
        self
    }
}

/// Latest snapshot per watch type. Snapshots are replaced whole, so a
/// reader holding an `Arc` never sees a partially-written list.
#[derive(Debug, Default)]
pub struct WatchSnapshots {
    lists: [Arc<Vec<WatchItem>>; 5],
}

impl WatchSnapshots {
    /// Replace the snapshot for `watch_type`.
    pub fn replace(&mut self, watch_type: WatchType, items: Vec<WatchItem>) {
        self.lists[watch_type.index()] = Arc::new(items);
    }

    /// The current snapshot for `watch_type`.
    pub fn get(&self, watch_type: WatchType) -> Arc<Vec<WatchItem>> {
        Arc::clone(&self.lists[watch_type.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_snapshots_start_empty() {
        let snaps = WatchSnapshots::default();
        for t in WatchType::ALL {
            assert!(snaps.get(t).is_empty());
        }
    }

    #[test]
    fn watch_replace_does_not_disturb_readers() {
        let mut snaps = WatchSnapshots::default();
        snaps.replace(WatchType::Locals, vec![WatchItem::named("a")]);
        let held = snaps.get(WatchType::Locals);

        snaps.replace(
            WatchType::Locals,
            vec![WatchItem::named("b"), WatchItem::named("c")],
        );
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].name, "a");
        assert_eq!(snaps.get(WatchType::Locals).len(), 2);
        assert!(snaps.get(WatchType::CallStack).is_empty());
    }

    #[test]
    fn watch_item_builders() {
        let item = WatchItem::named("x").with_value(DebugValue::Boolean(true));
        assert_eq!(item.value, Some(DebugValue::Boolean(true)));
        assert!(item.location.is_none());
    }
}
