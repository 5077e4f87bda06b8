use std::sync::{Arc, OnceLock, Weak};

use ember_base::container::{DexFile, FieldIdx, MethodIdx, StringIdx, TypeIdx};

use crate::class::ClassRef;
use crate::field::FieldRef;
use crate::method::MethodRef;

/// The constant pool of one source container: four parallel lazily-filled
/// tables memoizing resolution results. Each slot fills at most once; racing
/// resolvers agree because resolution is deterministic per container+loader.
#[derive(Debug)]
pub struct DexCache {
    dex: Arc<DexFile>,
    location: Box<str>,
    strings: Box<[OnceLock<Arc<str>>]>,
    types: Box<[OnceLock<ClassRef>]>,
    methods: Box<[OnceLock<MethodRef>]>,
    fields: Box<[OnceLock<FieldRef>]>,
}
impl DexCache {
    #[must_use]
    pub fn new(dex: Arc<DexFile>) -> Arc<DexCache> {
        Arc::new(DexCache {
            location: dex.location().into(),
            strings: empty_slots(dex.num_strings()),
            types: empty_slots(dex.num_types()),
            methods: empty_slots(dex.num_methods()),
            fields: empty_slots(dex.num_fields()),
            dex,
        })
    }

    #[must_use]
    pub fn dex(&self) -> &Arc<DexFile> {
        &self.dex
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn resolved_string(&self, idx: StringIdx) -> Option<Arc<str>> {
        self.strings.get(idx.index())?.get().cloned()
    }

    pub fn set_resolved_string(&self, idx: StringIdx, value: Arc<str>) {
        if let Some(slot) = self.strings.get(idx.index()) {
            slot.set(value).ok();
        }
    }

    #[must_use]
    pub fn resolved_type(&self, idx: TypeIdx) -> Option<ClassRef> {
        self.types.get(idx.index())?.get().cloned()
    }

    pub fn set_resolved_type(&self, idx: TypeIdx, class: ClassRef) {
        if let Some(slot) = self.types.get(idx.index()) {
            slot.set(class).ok();
        }
    }

    #[must_use]
    pub fn resolved_method(&self, idx: MethodIdx) -> Option<MethodRef> {
        self.methods.get(idx.index())?.get().cloned()
    }

    pub fn set_resolved_method(&self, idx: MethodIdx, method: MethodRef) {
        if let Some(slot) = self.methods.get(idx.index()) {
            slot.set(method).ok();
        }
    }

    #[must_use]
    pub fn resolved_field(&self, idx: FieldIdx) -> Option<FieldRef> {
        self.fields.get(idx.index())?.get().cloned()
    }

    pub fn set_resolved_field(&self, idx: FieldIdx, field: FieldRef) {
        if let Some(slot) = self.fields.get(idx.index()) {
            slot.set(field).ok();
        }
    }

    pub fn resolved_methods_iter(&self) -> impl Iterator<Item = MethodRef> + '_ {
        self.methods.iter().filter_map(|slot| slot.get().cloned())
    }

    pub fn resolved_fields_iter(&self) -> impl Iterator<Item = FieldRef> + '_ {
        self.fields.iter().filter_map(|slot| slot.get().cloned())
    }

    pub fn resolved_types_iter(&self) -> impl Iterator<Item = ClassRef> + '_ {
        self.types.iter().filter_map(|slot| slot.get().cloned())
    }
}

fn empty_slots<T>(n: usize) -> Box<[OnceLock<T>]> {
    std::iter::repeat_with(OnceLock::new).take(n).collect()
}

/// The dex-cache registry: weak references so a cache dies with its loader.
/// Guarded by the linker's dex lock (lock #1).
#[derive(Debug, Default)]
pub struct DexRegistry {
    caches: Vec<Weak<DexCache>>,
    /// Boot containers are kept alive for the lifetime of the linker.
    boot_class_path: Vec<Arc<DexCache>>,
}
impl DexRegistry {
    /// Find the live cache for a container, dropping cleared entries as they
    /// are encountered.
    #[must_use]
    pub fn find(&self, dex: &Arc<DexFile>) -> Option<Arc<DexCache>> {
        self.caches
            .iter()
            .filter_map(Weak::upgrade)
            .find(|cache| Arc::ptr_eq(cache.dex(), dex))
    }

    pub fn register(&mut self, cache: &Arc<DexCache>) {
        self.caches.retain(|weak| weak.strong_count() > 0);
        self.caches.push(Arc::downgrade(cache));
    }

    #[must_use]
    pub fn live_caches(&self) -> Vec<Arc<DexCache>> {
        self.caches.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn append_to_boot_class_path(&mut self, cache: Arc<DexCache>) {
        self.boot_class_path.push(cache);
    }

    #[must_use]
    pub fn boot_class_path(&self) -> &[Arc<DexCache>] {
        &self.boot_class_path
    }
}
