use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use ember_base::descriptor::Descriptor;
use ember_base::id::DescriptorHash;

use crate::class::ClassRef;
use crate::loader::{loader_key, ClassLoader, LoaderRef};

type Bucket = SmallVec<[ClassRef; 1]>;

/// One loader's class table, keyed by the descriptor's deterministic hash.
/// Entries present before a zygote fork are kept in a separate frozen map so
/// later inserts do not dirty those pages.
#[derive(Debug, Default)]
pub struct ClassTable {
    frozen: HashMap<DescriptorHash, Bucket>,
    live: HashMap<DescriptorHash, Bucket>,
}
impl ClassTable {
    #[must_use]
    pub fn new() -> ClassTable {
        ClassTable::default()
    }

    #[must_use]
    pub fn lookup(&self, descriptor: &Descriptor, hash: DescriptorHash) -> Option<ClassRef> {
        let probe = |map: &HashMap<DescriptorHash, Bucket>| {
            map.get(&hash)?
                .iter()
                .find(|c| c.descriptor() == descriptor)
                .cloned()
        };
        probe(&self.live).or_else(|| probe(&self.frozen))
    }

    /// Compare-and-insert. Returns the existing record on collision; the
    /// caller surrenders its own record and adopts the returned one.
    pub fn insert(&mut self, class: &ClassRef) -> Option<ClassRef> {
        let hash = class.descriptor_hash();
        if let Some(existing) = self.lookup(class.descriptor(), hash) {
            return Some(existing);
        }
        self.live.entry(hash).or_default().push(class.clone());
        None
    }

    /// Replace the record for a descriptor (the temp-to-final swap), returning
    /// the record that was displaced.
    pub fn update(&mut self, class: &ClassRef) -> Option<ClassRef> {
        let hash = class.descriptor_hash();
        for map in [&mut self.live, &mut self.frozen] {
            if let Some(bucket) = map.get_mut(&hash) {
                if let Some(slot) = bucket
                    .iter_mut()
                    .find(|c| c.descriptor() == class.descriptor())
                {
                    return Some(std::mem::replace(slot, class.clone()));
                }
            }
        }
        // Nothing to displace; behave like an insert.
        self.live.entry(hash).or_default().push(class.clone());
        None
    }

    /// Used only to roll back a failed insertion.
    pub fn remove(&mut self, descriptor: &Descriptor, hash: DescriptorHash) -> bool {
        if let Some(bucket) = self.live.get_mut(&hash) {
            let before = bucket.len();
            bucket.retain(|c| c.descriptor() != descriptor);
            if bucket.len() != before {
                return true;
            }
        }
        false
    }

    /// Mark the current entries as pre-fork.
    pub fn freeze_snapshot(&mut self) {
        for (hash, bucket) in self.live.drain() {
            self.frozen.entry(hash).or_default().extend(bucket);
        }
    }

    #[must_use]
    pub fn num_frozen(&self) -> usize {
        self.frozen.values().map(SmallVec::len).sum()
    }

    #[must_use]
    pub fn num_live(&self) -> usize {
        self.live.values().map(SmallVec::len).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.num_frozen() + self.num_live()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every class; the visitor returns `false` to stop early.
    /// Returns whether the walk completed.
    pub fn visit(&self, visitor: &mut dyn FnMut(&ClassRef) -> bool) -> bool {
        for bucket in self.frozen.values().chain(self.live.values()) {
            for class in bucket {
                if !visitor(class) {
                    return false;
                }
            }
        }
        true
    }
}

struct LoaderTableEntry {
    loader: Weak<ClassLoader>,
    table: ClassTable,
}

/// All class tables: the distinguished bootstrap table plus one per live
/// loader, weakly held so a dead loader's table can be reclaimed in bulk.
#[derive(Default)]
pub struct ClassTables {
    boot: ClassTable,
    loaders: IndexMap<usize, LoaderTableEntry>,
}
impl ClassTables {
    #[must_use]
    pub fn new() -> ClassTables {
        ClassTables::default()
    }

    #[must_use]
    pub fn table(&self, loader: Option<&LoaderRef>) -> Option<&ClassTable> {
        match loader {
            None => Some(&self.boot),
            Some(l) => self.loaders.get(&loader_key(l)).map(|e| &e.table),
        }
    }

    pub fn table_mut(&mut self, loader: Option<&LoaderRef>) -> &mut ClassTable {
        match loader {
            None => &mut self.boot,
            Some(l) => {
                let entry = self
                    .loaders
                    .entry(loader_key(l))
                    .or_insert_with(|| LoaderTableEntry {
                        loader: Arc::downgrade(l),
                        table: ClassTable::new(),
                    });
                &mut entry.table
            }
        }
    }

    #[must_use]
    pub fn boot_table(&self) -> &ClassTable {
        &self.boot
    }

    pub fn boot_table_mut(&mut self) -> &mut ClassTable {
        &mut self.boot
    }

    /// Drop tables whose loader became unreachable. Returns how many were
    /// reclaimed.
    pub fn cleanup_unreachable(&mut self) -> usize {
        let before = self.loaders.len();
        self.loaders
            .retain(|_, entry| entry.loader.strong_count() > 0);
        before - self.loaders.len()
    }

    pub fn freeze_all(&mut self) {
        self.boot.freeze_snapshot();
        for entry in self.loaders.values_mut() {
            entry.table.freeze_snapshot();
        }
    }

    pub fn visit_all(&self, visitor: &mut dyn FnMut(&ClassRef) -> bool) -> bool {
        if !self.boot.visit(visitor) {
            return false;
        }
        for entry in self.loaders.values() {
            if !entry.table.visit(visitor) {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.boot.len() + self.loaders.values().map(|e| e.table.len()).sum::<usize>()
    }

    #[must_use]
    pub fn num_zygote_classes(&self) -> usize {
        self.boot.num_frozen()
            + self
                .loaders
                .values()
                .map(|e| e.table.num_frozen())
                .sum::<usize>()
    }

    #[must_use]
    pub fn num_non_zygote_classes(&self) -> usize {
        self.num_classes() - self.num_zygote_classes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;

    fn fake_class(desc: &str) -> ClassRef {
        Class::alloc(Descriptor::parse(desc).unwrap(), None, None, None, 0)
    }

    #[test]
    fn insert_returns_existing_on_collision() {
        let mut table = ClassTable::new();
        let a = fake_class("La/B;");
        let b = fake_class("La/B;");
        assert!(table.insert(&a).is_none());
        let existing = table.insert(&b).unwrap();
        assert!(Arc::ptr_eq(&existing, &a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn freeze_keeps_entries_visible() {
        let mut table = ClassTable::new();
        let a = fake_class("La/B;");
        table.insert(&a);
        table.freeze_snapshot();
        assert_eq!(table.num_frozen(), 1);
        assert_eq!(table.num_live(), 0);
        let found = table
            .lookup(a.descriptor(), a.descriptor_hash())
            .expect("frozen entry still visible");
        assert!(Arc::ptr_eq(&found, &a));
        // Rollback removal only touches live entries.
        assert!(!table.remove(a.descriptor(), a.descriptor_hash()));
    }

    #[test]
    fn update_swaps_record_in_place() {
        let mut table = ClassTable::new();
        let temp = fake_class("La/B;");
        let final_class = fake_class("La/B;");
        table.insert(&temp);
        let old = table.update(&final_class).unwrap();
        assert!(Arc::ptr_eq(&old, &temp));
        let found = table
            .lookup(final_class.descriptor(), final_class.descriptor_hash())
            .unwrap();
        assert!(Arc::ptr_eq(&found, &final_class));
    }
}
