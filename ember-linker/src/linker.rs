use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ember_base::container::{ClassDefIdx, DexFile};
use ember_base::descriptor::{Descriptor, PrimitiveKind};
use ember_base::flags::ClassAccessFlags;
use ember_base::id::{hash_descriptor, DescriptorHash};

use crate::bootstrap::ClassRoot;
use crate::class::{Class, ClassRef, ClassStatus, IfTable};
use crate::dex_cache::{DexCache, DexRegistry};
use crate::image::BootImage;
use crate::intern::InternTable;
use crate::loader::{loader_key, LoaderRef};
use crate::services::{
    AlwaysVerified, ClinitRunner, CodeSource, NoCompiledCode, NoopClinitRunner, Verifier,
};
use crate::table::ClassTables;
use crate::util;
use crate::LinkError;

/// Tunables for the linker. The defaults match the production values; the
/// image promotion threshold in particular is a heuristic and deliberately
/// exposed.
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// Width of a managed reference and of a table slot, in bytes.
    pub pointer_size: usize,
    /// Slots in the interface-method table.
    pub imt_size: usize,
    /// Whether resolved instantiable classes carry inline imt/vtable copies.
    pub embed_tables: bool,
    /// How many vtable entries are copied inline when embedding.
    pub embedded_vtable_limit: usize,
    /// Failed bootstrap lookups tolerated before image classes are promoted
    /// into the class table wholesale.
    pub image_lookup_promote_threshold: u32,
    /// Ahead-of-time compilation: fast-fail initialization, park soft
    /// verification failures for runtime retry.
    pub aot_mode: bool,
    /// An active instrumentation layer forces interpreter entry points.
    pub instrumentation_forces_interpreter: bool,
    /// Log each class definition at info level.
    pub log_class_loads: bool,
}
impl Default for LinkerConfig {
    fn default() -> Self {
        LinkerConfig {
            pointer_size: 8,
            imt_size: 64,
            embed_tables: true,
            embedded_vtable_limit: usize::MAX,
            image_lookup_promote_threshold: 1000,
            aot_mode: false,
            instrumentation_forces_interpreter: false,
            log_class_loads: false,
        }
    }
}

const FIND_ARRAY_CACHE_SIZE: usize = 16;

/// Small rotating cache in front of array-class lookup.
#[derive(Default)]
pub(crate) struct FindArrayClassCache {
    entries: [Option<(DescriptorHash, usize, ClassRef)>; FIND_ARRAY_CACHE_SIZE],
    next_victim: usize,
}
impl FindArrayClassCache {
    fn get(&self, hash: DescriptorHash, loader: usize) -> Option<ClassRef> {
        self.entries.iter().flatten().find_map(|(h, l, c)| {
            (*h == hash && *l == loader).then(|| c.clone())
        })
    }

    fn put(&mut self, hash: DescriptorHash, loader: usize, class: ClassRef) {
        self.entries[self.next_victim] = Some((hash, loader, class));
        self.next_victim = (self.next_victim + 1) % FIND_ARRAY_CACHE_SIZE;
    }

    fn clear(&mut self) {
        *self = FindArrayClassCache::default();
    }
}

/// The class linker: the single runtime-context value through which every
/// class root, table, and resolution surface is reached.
///
/// Lock order: dex registry (1) before class tables (2) before any per-class
/// monitor (3).
pub struct ClassLinker {
    config: LinkerConfig,
    pub(crate) dex_registry: Mutex<DexRegistry>,
    pub(crate) tables: RwLock<ClassTables>,
    intern: InternTable,
    class_roots: RwLock<Vec<Option<ClassRef>>>,
    array_iftable: RwLock<Option<Arc<IfTable>>>,
    find_array_cache: Mutex<FindArrayClassCache>,
    pub(crate) verifier: Box<dyn Verifier>,
    pub(crate) clinit_runner: Box<dyn ClinitRunner>,
    pub(crate) code_source: Box<dyn CodeSource>,
    init_done: AtomicBool,
    pub(crate) image: RwLock<Option<Arc<BootImage>>>,
    image_lookup_required: AtomicBool,
    failed_image_lookups: AtomicU32,
}
impl ClassLinker {
    #[must_use]
    pub fn new(config: LinkerConfig) -> ClassLinker {
        ClassLinker::with_services(
            config,
            Box::new(AlwaysVerified),
            Box::new(NoopClinitRunner),
            Box::new(NoCompiledCode),
        )
    }

    #[must_use]
    pub fn with_services(
        config: LinkerConfig,
        verifier: Box<dyn Verifier>,
        clinit_runner: Box<dyn ClinitRunner>,
        code_source: Box<dyn CodeSource>,
    ) -> ClassLinker {
        ClassLinker {
            config,
            dex_registry: Mutex::new(DexRegistry::default()),
            tables: RwLock::new(ClassTables::new()),
            intern: InternTable::new(),
            class_roots: RwLock::new(vec![None; ClassRoot::COUNT]),
            array_iftable: RwLock::new(None),
            find_array_cache: Mutex::new(FindArrayClassCache::default()),
            verifier,
            clinit_runner,
            code_source,
            init_done: AtomicBool::new(false),
            image: RwLock::new(None),
            image_lookup_required: AtomicBool::new(false),
            failed_image_lookups: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    #[must_use]
    pub fn is_init_done(&self) -> bool {
        self.init_done.load(Ordering::Acquire)
    }

    pub(crate) fn set_init_done(&self) {
        self.init_done.store(true, Ordering::Release);
    }

    pub fn intern(&self, text: &str) -> Arc<str> {
        self.intern.intern(text)
    }

    pub(crate) fn tables_read(&self) -> RwLockReadGuard<'_, ClassTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn tables_write(&self) -> RwLockWriteGuard<'_, ClassTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dex_registry_lock(&self) -> MutexGuard<'_, DexRegistry> {
        self.dex_registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // --- class roots -------------------------------------------------------

    #[must_use]
    pub fn try_class_root(&self, root: ClassRoot) -> Option<ClassRef> {
        self.class_roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root as usize)
            .and_then(Clone::clone)
    }

    /// # Panics
    /// If the root has not been installed yet; only callable after boot.
    #[must_use]
    pub fn class_root(&self, root: ClassRoot) -> ClassRef {
        self.try_class_root(root)
            .unwrap_or_else(|| panic!("class root {root:?} not installed"))
    }

    pub(crate) fn set_class_root(&self, root: ClassRoot, class: &ClassRef) {
        let mut roots = self
            .class_roots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = &mut roots[root as usize];
        debug_assert!(
            slot.is_none() || slot.as_ref().map_or(false, |c| Arc::ptr_eq(c, class)),
            "class root {root:?} installed twice with different classes"
        );
        *slot = Some(class.clone());
    }

    #[must_use]
    pub fn object_class(&self) -> ClassRef {
        self.class_root(ClassRoot::JavaLangObject)
    }

    #[must_use]
    pub fn class_class(&self) -> ClassRef {
        self.class_root(ClassRoot::JavaLangClass)
    }

    /// Visit every class root; the visitor returns `false` to stop.
    pub fn visit_class_roots(&self, visitor: &mut dyn FnMut(&ClassRef) -> bool) -> bool {
        let roots = self
            .class_roots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for root in roots.iter().flatten() {
            if !visitor(root) {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn array_iftable(&self) -> Option<Arc<IfTable>> {
        self.array_iftable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_array_iftable(&self, iftable: Arc<IfTable>) {
        *self
            .array_iftable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(iftable);
    }

    // --- registry surface --------------------------------------------------

    /// Resolve a descriptor to a class record, loading and linking it if
    /// necessary. The defining loader of the result may differ from the
    /// initiating loader (delegation, array components).
    pub fn find_class(
        &self,
        descriptor: &Descriptor,
        loader: Option<&LoaderRef>,
    ) -> Result<ClassRef, LinkError> {
        util::allow_thread_suspension();
        if let Some(kind) = descriptor.primitive_kind() {
            return self.find_primitive_class(kind);
        }
        let hash = hash_descriptor(descriptor.as_str());
        if let Some(existing) = self.lookup_class_with_hash(descriptor, hash, loader) {
            return self.ensure_resolved(existing, descriptor);
        }
        if descriptor.is_array() {
            return self.create_array_class(descriptor, hash, loader);
        }
        match loader {
            None => {
                if let Some((cache, def_idx)) = self.find_in_boot_class_path(descriptor) {
                    self.define_class(descriptor, None, &cache.dex().clone(), def_idx)
                } else {
                    Err(LinkError::NoClassDefFound {
                        descriptor: descriptor.clone(),
                        cause: None,
                    })
                }
            }
            Some(l) => {
                // Delegation: parent chain (ending at the bootstrap loader)
                // and the loader's own class path, in the loader's order.
                if l.parent_first() {
                    if let Ok(found) = self.find_class(descriptor, l.parent()) {
                        return Ok(found);
                    }
                }
                for dex in l.class_path() {
                    if let Some(def_idx) = dex.find_class_def(descriptor) {
                        return self.define_class(descriptor, Some(l), &dex, def_idx);
                    }
                }
                if !l.parent_first() {
                    if let Ok(found) = self.find_class(descriptor, l.parent()) {
                        return Ok(found);
                    }
                }
                Err(LinkError::ClassNotFound {
                    descriptor: descriptor.clone(),
                })
            }
        }
    }

    /// Bootstrap-loader convenience used throughout boot.
    pub fn find_system_class(&self, descriptor: &str) -> Result<ClassRef, LinkError> {
        self.find_class(&Descriptor::parse(descriptor)?, None)
    }

    #[must_use]
    pub fn find_primitive_class_by_char(&self, c: char) -> Option<ClassRef> {
        PrimitiveKind::from_desc_char(c).and_then(|kind| self.find_primitive_class(kind).ok())
    }

    pub fn find_primitive_class(&self, kind: PrimitiveKind) -> Result<ClassRef, LinkError> {
        self.try_class_root(ClassRoot::primitive(kind))
            .ok_or_else(|| LinkError::NoClassDefFound {
                descriptor: Descriptor::from_primitive(kind),
                cause: None,
            })
    }

    /// Table lookup only; never loads. Bootstrap misses fall back to the
    /// boot-image dex caches when an image is mounted, promoting image
    /// classes into the table once the misses pass the configured threshold.
    #[must_use]
    pub fn lookup_class(
        &self,
        descriptor: &Descriptor,
        loader: Option<&LoaderRef>,
    ) -> Option<ClassRef> {
        self.lookup_class_with_hash(descriptor, hash_descriptor(descriptor.as_str()), loader)
    }

    #[must_use]
    pub(crate) fn lookup_class_with_hash(
        &self,
        descriptor: &Descriptor,
        hash: DescriptorHash,
        loader: Option<&LoaderRef>,
    ) -> Option<ClassRef> {
        {
            let tables = self.tables_read();
            if let Some(table) = tables.table(loader) {
                if let Some(found) = table.lookup(descriptor, hash) {
                    return Some(found);
                }
            }
        }
        if loader.is_none() && self.image_lookup_required.load(Ordering::Acquire) {
            return self.lookup_class_from_image(descriptor);
        }
        None
    }

    fn lookup_class_from_image(&self, descriptor: &Descriptor) -> Option<ClassRef> {
        let image = self
            .image
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        let found = image.lookup_class(descriptor);
        if let Some(found) = found {
            let mut tables = self.tables_write();
            if let Some(existing) = tables.boot_table_mut().insert(&found) {
                return Some(existing);
            }
            return Some(found);
        }
        let failed = self.failed_image_lookups.fetch_add(1, Ordering::AcqRel) + 1;
        if failed > self.config.image_lookup_promote_threshold {
            self.promote_image_classes_to_class_table(&image);
        }
        None
    }

    /// Move every class reachable from the image dex caches into the
    /// bootstrap table, ending the lazy-lookup regime.
    pub(crate) fn promote_image_classes_to_class_table(&self, image: &BootImage) {
        let mut tables = self.tables_write();
        if !self.image_lookup_required.load(Ordering::Acquire) {
            return;
        }
        tracing::info!("promoting boot-image classes into the class table");
        for class in image.all_classes() {
            tables.boot_table_mut().insert(&class);
        }
        self.image_lookup_required.store(false, Ordering::Release);
    }

    pub(crate) fn set_image_lookup_required(&self) {
        self.image_lookup_required.store(true, Ordering::Release);
    }

    /// Every class of the descriptor across all loaders.
    #[must_use]
    pub fn lookup_classes(&self, descriptor: &Descriptor) -> Vec<ClassRef> {
        let mut result = Vec::new();
        self.tables_read().visit_all(&mut |class: &ClassRef| {
            if class.descriptor() == descriptor {
                result.push(class.clone());
            }
            true
        });
        result
    }

    /// Atomic compare-and-insert into the right loader table. Returns the
    /// existing record on collision; the caller adopts it.
    pub(crate) fn insert_class(&self, class: &ClassRef) -> Option<ClassRef> {
        if self.config.log_class_loads {
            let source = class
                .dex_cache()
                .map_or_else(String::new, |c| format!(" from {}", c.location()));
            tracing::info!("inserting class {}{source}", class.descriptor().pretty());
        }
        let mut tables = self.tables_write();
        tables.table_mut(class.loader().as_ref()).insert(class)
    }

    /// Rollback of a failed definition.
    pub(crate) fn remove_class(&self, descriptor: &Descriptor, loader: Option<&LoaderRef>) -> bool {
        let mut tables = self.tables_write();
        tables
            .table_mut(loader)
            .remove(descriptor, hash_descriptor(descriptor.as_str()))
    }

    /// Wait until a record another thread is working on reaches *resolved*
    /// (riding out temp-class retirement), or fail with its sticky error.
    pub(crate) fn ensure_resolved(
        &self,
        mut klass: ClassRef,
        descriptor: &Descriptor,
    ) -> Result<ClassRef, LinkError> {
        // For temporary classes we must wait for them to be retired.
        if self.is_init_done() && klass.is_temp() {
            debug_assert!(!klass.is_resolved());
            if klass.is_erroneous() {
                return Err(klass.erroneous_error());
            }
            {
                let mut data = klass.data();
                while data.status != ClassStatus::Retired && data.status != ClassStatus::Erroneous {
                    data = klass.wait(data);
                }
            }
            if klass.is_erroneous() {
                return Err(klass.erroneous_error());
            }
            debug_assert!(klass.is_retired());
            // Get the updated class from the class table.
            klass = self
                .lookup_class(descriptor, klass.loader().as_ref())
                .ok_or_else(|| LinkError::NoClassDefFound {
                    descriptor: descriptor.clone(),
                    cause: None,
                })?;
        }

        if !klass.is_resolved() && !klass.is_erroneous() {
            let mut data = klass.data();
            // Check for circular dependencies between classes.
            if !data.status.is_resolved() && data.clinit_thread == Some(std::thread::current().id())
            {
                let err = LinkError::ClassCircularity {
                    descriptor: descriptor.clone(),
                };
                data.erroneous.get_or_insert_with(|| err.clone());
                klass.set_status_locked(&mut data, ClassStatus::Erroneous);
                return Err(err);
            }
            // Wait for the pending linking to complete.
            while !data.status.is_resolved() && data.status != ClassStatus::Erroneous {
                data = klass.wait(data);
            }
        }

        if klass.is_erroneous() {
            return Err(klass.erroneous_error());
        }
        debug_assert!(klass.is_resolved());
        Ok(klass)
    }

    #[must_use]
    pub(crate) fn find_in_boot_class_path(
        &self,
        descriptor: &Descriptor,
    ) -> Option<(Arc<DexCache>, ClassDefIdx)> {
        let registry = self.dex_registry_lock();
        for cache in registry.boot_class_path() {
            if let Some(def_idx) = cache.dex().find_class_def(descriptor) {
                return Some((cache.clone(), def_idx));
            }
        }
        None
    }

    /// Register (or fetch the existing cache for) a source container.
    pub fn register_dex_file(&self, dex: &Arc<DexFile>) -> Arc<DexCache> {
        let mut registry = self.dex_registry_lock();
        if let Some(existing) = registry.find(dex) {
            return existing;
        }
        let cache = DexCache::new(dex.clone());
        registry.register(&cache);
        cache
    }

    pub(crate) fn append_to_boot_class_path(&self, dex: &Arc<DexFile>) -> Arc<DexCache> {
        let mut registry = self.dex_registry_lock();
        let cache = match registry.find(dex) {
            Some(existing) => existing,
            None => {
                let cache = DexCache::new(dex.clone());
                registry.register(&cache);
                cache
            }
        };
        registry.append_to_boot_class_path(cache.clone());
        cache
    }

    #[must_use]
    pub fn find_dex_cache(&self, dex: &Arc<DexFile>) -> Option<Arc<DexCache>> {
        self.dex_registry_lock().find(dex)
    }

    // --- arrays ------------------------------------------------------------

    pub(crate) fn create_array_class(
        &self,
        descriptor: &Descriptor,
        hash: DescriptorHash,
        loader: Option<&LoaderRef>,
    ) -> Result<ClassRef, LinkError> {
        let loader_k = loader.map_or(0, loader_key);
        if let Some(hit) = self
            .find_array_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash, loader_k)
        {
            return Ok(hit);
        }

        let component_desc = descriptor
            .component()
            .ok_or_else(|| LinkError::BadDescriptor(
                ember_base::descriptor::DescriptorError::BareArray,
            ))?;
        let component = match self.find_class(&component_desc, loader) {
            Ok(c) => c,
            Err(err) => {
                // We need to accept erroneous classes as component types.
                match self.lookup_class(&component_desc, loader) {
                    Some(c) => c,
                    None => return Err(err),
                }
            }
        };
        if component.primitive_kind() == Some(PrimitiveKind::Void) {
            return Err(LinkError::NoClassDefFound {
                descriptor: descriptor.clone(),
                cause: None,
            });
        }
        // Arrays are always associated with the loader of their component
        // type; redo the lookup there.
        let array_loader = component.loader();
        if loader_key_opt(loader) != loader_key_opt(array_loader.as_ref()) {
            if let Some(existing) =
                self.lookup_class_with_hash(descriptor, hash, array_loader.as_ref())
            {
                return Ok(existing);
            }
        }

        let new_class = self.reusable_boot_array(descriptor).unwrap_or_else(|| {
            Class::alloc(
                descriptor.clone(),
                array_loader.clone(),
                None,
                Some(component.clone()),
                0,
            )
        });
        if let Some(class_class) = self.try_class_root(ClassRoot::JavaLangClass) {
            new_class.set_class_of(&class_class);
        }

        let object = self.object_class();
        let array_iftable = self
            .array_iftable()
            .ok_or(LinkError::MissingLoadedValue("array iftable"))?;
        {
            let mut data = new_class.data();
            data.super_class = Some(object.clone());
            data.vtable = object.vtable();
            data.variable_size = true;
            data.object_size = 0;
            data.direct_interfaces = array_iftable
                .entries
                .iter()
                .map(|e| e.interface.clone())
                .collect();
            data.iftable = array_iftable;
            // Inherit access flags from the component type, losing any
            // implementation detail bits; arrays can't be super types.
            let mut access = component.access_flags()
                & (ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL);
            access |= ClassAccessFlags::ABSTRACT | ClassAccessFlags::FINAL;
            access.remove(ClassAccessFlags::INTERFACE);
            data.access_flags = access;
            new_class.set_status_locked(&mut data, ClassStatus::Loaded);
            // Arrays skip the full link step; the object vtable plus the
            // shared iftable is the whole story.
            let imt_len = self.config.imt_size;
            data.imt = Arc::new(vec![crate::class::ImtEntry::Unimplemented; imt_len]);
            if self.config.embed_tables {
                data.embedded = Some(crate::class::EmbeddedTables {
                    imt: data.imt.as_ref().clone(),
                    vtable: data
                        .vtable
                        .iter()
                        .take(self.config.embedded_vtable_limit)
                        .cloned()
                        .collect(),
                });
            }
            data.class_size = Class::size_without_statics(
                self.config.embed_tables,
                imt_len,
                data.vtable.len().min(self.config.embedded_vtable_limit),
                self.config.pointer_size,
            );
            new_class.set_status_locked(&mut data, ClassStatus::Initialized);
        }

        let result = match self.insert_class(&new_class) {
            // Another thread raced us here; abandon what we've done.
            Some(existing) => existing,
            None => new_class,
        };
        self.find_array_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(hash, loader_k, result.clone());
        Ok(result)
    }

    /// Hand-crafted boot arrays are reused instead of re-allocated while the
    /// bootstrap is still in flight.
    fn reusable_boot_array(&self, descriptor: &Descriptor) -> Option<ClassRef> {
        if self.is_init_done() {
            return None;
        }
        let root = match descriptor.as_str() {
            "[Ljava/lang/Class;" => ClassRoot::ClassArrayClass,
            "[Ljava/lang/Object;" => ClassRoot::ObjectArrayClass,
            "[Ljava/lang/String;" => ClassRoot::StringArrayClass,
            "[C" => ClassRoot::CharArrayClass,
            "[I" => ClassRoot::IntArrayClass,
            "[J" => ClassRoot::LongArrayClass,
            _ => return None,
        };
        self.try_class_root(root)
    }

    pub(crate) fn drop_find_array_class_cache(&self) {
        self.find_array_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // --- visitation & bookkeeping -----------------------------------------

    /// Visit every class in every table; the visitor returns `false` to stop.
    pub fn visit_classes(&self, visitor: &mut dyn FnMut(&ClassRef) -> bool) -> bool {
        self.tables_read().visit_all(visitor)
    }

    /// Reclaim the tables of loaders that became unreachable. The class
    /// records, member arrays, and caches owned by those loaders die with
    /// their last strong reference.
    pub fn cleanup_loaders(&self) -> usize {
        self.drop_find_array_class_cache();
        let removed = self.tables_write().cleanup_unreachable();
        if removed > 0 {
            tracing::debug!("reclaimed {removed} class loader table(s)");
        }
        removed
    }

    /// Mark every current table entry as pre-fork so post-fork inserts leave
    /// those pages clean.
    pub fn freeze_class_tables(&self) {
        self.tables_write().freeze_all();
    }

    #[must_use]
    pub fn num_loaded_classes(&self) -> usize {
        self.tables_read().num_classes()
    }

    #[must_use]
    pub fn num_zygote_classes(&self) -> usize {
        self.tables_read().num_zygote_classes()
    }

    #[must_use]
    pub fn num_non_zygote_classes(&self) -> usize {
        self.tables_read().num_non_zygote_classes()
    }
}
impl std::fmt::Debug for ClassLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLinker")
            .field("init_done", &self.is_init_done())
            .field("num_classes", &self.num_loaded_classes())
            .finish_non_exhaustive()
    }
}

#[must_use]
fn loader_key_opt(loader: Option<&LoaderRef>) -> usize {
    loader.map_or(0, loader_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ClassLoader;
    use crate::testing;
    use ember_base::container::DexFileBuilder;
    use ember_base::flags::FieldAccessFlags;

    fn app_container() -> Arc<DexFile> {
        let mut b = DexFileBuilder::new("app.dex");
        b.class("Lapp/Widget;")
            .super_class("Ljava/lang/Object;")
            .instance_field("peer", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)
            .finish();
        b.build()
    }

    #[test]
    fn lookup_after_define_returns_the_defined_class() {
        let linker = testing::boot_linker();
        linker.append_to_boot_class_path(&app_container());
        let descriptor = Descriptor::parse("Lapp/Widget;").unwrap();
        assert!(linker.lookup_class(&descriptor, None).is_none());
        let defined = linker.find_class(&descriptor, None).unwrap();
        let looked_up = linker.lookup_class(&descriptor, None).unwrap();
        assert!(Arc::ptr_eq(&defined, &looked_up));
        // Finding again adopts the same record.
        let again = linker.find_class(&descriptor, None).unwrap();
        assert!(Arc::ptr_eq(&defined, &again));
    }

    #[test]
    fn arrays_live_with_their_component_loader() {
        let linker = testing::boot_linker();
        let loader = ClassLoader::new("app", None);
        loader.append_to_class_path(app_container());

        let array_desc = Descriptor::parse("[Lapp/Widget;").unwrap();
        let array = linker.find_class(&array_desc, Some(&loader)).unwrap();
        let component = array.component_type().unwrap();
        assert_eq!(component.descriptor().as_str(), "Lapp/Widget;");
        assert_eq!(array.loader_key(), component.loader_key());
        assert!(array
            .loader()
            .map_or(false, |l| Arc::ptr_eq(&l, &loader)));

        // A boot-class array stays with the bootstrap loader even when an
        // application loader initiates the lookup.
        let string_array = linker
            .find_class(&Descriptor::parse("[Ljava/lang/String;").unwrap(), Some(&loader))
            .unwrap();
        assert!(string_array.is_boot_loader_class());
    }

    #[test]
    fn array_of_void_is_rejected() {
        let linker = testing::boot_linker();
        let err = linker.find_system_class("[V").expect_err("array of void");
        assert!(matches!(err, LinkError::NoClassDefFound { .. }));
    }

    #[test]
    fn multi_level_arrays_recurse_on_components() {
        let linker = testing::boot_linker();
        let deep = linker.find_system_class("[[I").unwrap();
        let mid = deep.component_type().unwrap();
        assert_eq!(mid.descriptor().as_str(), "[I");
        assert!(Arc::ptr_eq(
            &mid.component_type().unwrap().clone(),
            &linker.class_root(crate::bootstrap::ClassRoot::PrimitiveInt)
        ));
    }

    #[test]
    fn missing_classes_error_by_loader_kind() {
        let linker = testing::boot_linker();
        let missing = Descriptor::parse("Lno/such/Klass;").unwrap();
        assert!(matches!(
            linker.find_class(&missing, None),
            Err(LinkError::NoClassDefFound { .. })
        ));
        let loader = ClassLoader::new("empty", None);
        assert!(matches!(
            linker.find_class(&missing, Some(&loader)),
            Err(LinkError::ClassNotFound { .. })
        ));
    }

    #[test]
    fn dead_loaders_are_reclaimed_as_a_unit() {
        let linker = testing::boot_linker();
        let loader = ClassLoader::new("doomed", None);
        loader.append_to_class_path(app_container());
        let descriptor = Descriptor::parse("Lapp/Widget;").unwrap();
        let widget = linker.find_class(&descriptor, Some(&loader)).unwrap();
        assert!(linker.lookup_class(&descriptor, Some(&loader)).is_some());

        drop(widget);
        drop(loader);
        let removed = linker.cleanup_loaders();
        assert_eq!(removed, 1);
        // No live table answers for the dead loader's classes.
        let mut found = false;
        linker.visit_classes(&mut |class: &ClassRef| {
            if class.descriptor() == &descriptor {
                found = true;
            }
            true
        });
        assert!(!found);
    }

    #[test]
    fn freezing_tables_counts_zygote_classes() {
        let linker = testing::boot_linker();
        let before_live = linker.num_non_zygote_classes();
        assert!(before_live > 0);
        linker.freeze_class_tables();
        assert_eq!(linker.num_non_zygote_classes(), 0);
        assert_eq!(linker.num_zygote_classes(), before_live);

        linker.append_to_boot_class_path(&app_container());
        let _ = testing::find(&linker, "Lapp/Widget;");
        assert_eq!(linker.num_non_zygote_classes(), 1);
    }

    #[test]
    fn lookup_classes_crosses_loaders() {
        let linker = testing::boot_linker();
        let l1 = ClassLoader::new("l1", None);
        l1.append_to_class_path(app_container());
        let l2 = ClassLoader::new("l2", None);
        l2.append_to_class_path(app_container());
        let descriptor = Descriptor::parse("Lapp/Widget;").unwrap();
        let c1 = linker.find_class(&descriptor, Some(&l1)).unwrap();
        let c2 = linker.find_class(&descriptor, Some(&l2)).unwrap();
        assert!(!Arc::ptr_eq(&c1, &c2));
        let all = linker.lookup_classes(&descriptor);
        assert_eq!(all.len(), 2);
    }
}
