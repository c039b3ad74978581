// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use crate::executor::Executor;
use crate::listener::ListenerId;
use crate::property::{ChangeListener, Property, SyncProperty};

/// A property whose value never changes.
///
/// Listeners are accepted and dropped; they never fire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ConstProperty<T>(T);

impl<T> ConstProperty<T> {
    /// Wraps `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrows the value.
    #[must_use]
    #[inline]
    pub const fn get(&self) -> &T {
        &self.0
    }
}

impl<T: Clone> Property<T> for ConstProperty<T> {
    fn value(&self) -> T {
        self.0.clone()
    }

    fn may_change(&self) -> bool {
        false
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn remove_change_listener(&self, _id: ListenerId) -> bool {
        false
    }
}

impl<T: Clone + Send + Sync> SyncProperty<T> for ConstProperty<T> {
    fn add_boxed_listener(
        &self,
        _executor: Option<Arc<dyn Executor>>,
        _listener: ChangeListener<T>,
    ) -> ListenerId {
        ListenerId::next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn constant_never_changes_and_ignores_listeners() {
        let prop = ConstProperty::new("fixed");
        let fired = Arc::new(AtomicBool::new(false));
        let sink = fired.clone();
        let id = prop.add_change_listener(move |_, _| sink.store(true, Ordering::SeqCst));
        assert!(!prop.may_change());
        assert!(prop.is_concurrent());
        assert_eq!(prop.value(), "fixed");
        assert_eq!(*prop.get(), "fixed");
        assert!(!prop.remove_change_listener(id));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
