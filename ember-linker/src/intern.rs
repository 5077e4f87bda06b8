use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// The global string intern table. Resolved string constants are funneled
/// through here so that repeated resolutions of the same text share one
/// allocation.
#[derive(Debug, Default)]
pub struct InternTable {
    strings: Mutex<HashSet<Arc<str>>>,
}
impl InternTable {
    #[must_use]
    pub fn new() -> InternTable {
        InternTable::default()
    }

    pub fn intern(&self, text: &str) -> Arc<str> {
        let mut strings = self
            .strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = strings.get(text) {
            return existing.clone();
        }
        let value: Arc<str> = Arc::from(text);
        strings.insert(value.clone());
        value
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_shares_storage() {
        let table = InternTable::new();
        let a = table.intern("hello");
        let b = table.intern("hello");
        assert!(Arc::ptr_eq(&a, &b));
        let c = table.intern("world");
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(table.len(), 2);
    }
}
