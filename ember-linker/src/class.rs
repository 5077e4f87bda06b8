use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::ThreadId;

use ember_base::container::{ClassDefIdx, DexFile, FieldIdx, MethodIdx};
use ember_base::descriptor::{Descriptor, MethodProto, PrimitiveKind};
use ember_base::flags::ClassAccessFlags;
use ember_base::id::{hash_descriptor, DescriptorHash};

use crate::dex_cache::DexCache;
use crate::field::FieldRef;
use crate::loader::LoaderRef;
use crate::method::MethodRef;
use crate::value::Value;
use crate::LinkError;

pub type ClassRef = Arc<Class>;

/// Instances are aligned to this; object sizes round up to it.
pub const OBJECT_ALIGNMENT: usize = 8;

/// The fixed portion of a class record's footprint, before any embedded
/// tables or static fields.
pub(crate) const CLASS_BASE_SIZE: usize = 96;

/// The lifecycle position of a class record. Ordered: a class only moves
/// forward, except for the terminal [`ClassStatus::Erroneous`] and the
/// temp-replacement [`ClassStatus::Retired`] branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassStatus {
    /// Storage was supplanted by a correctly-sized replacement.
    Retired,
    Erroneous,
    NotReady,
    /// Descriptor and loader assigned.
    Idx,
    /// Fields and methods loaded.
    Loaded,
    Resolving,
    /// Supers linked, dispatch tables and field offsets built.
    Resolved,
    Verifying,
    /// Soft verification failure at compilation time; effectively verified
    /// for loading but re-verified on first runtime touch.
    RetryVerificationAtRuntime,
    /// The runtime re-verification pass of a retry-flagged class.
    VerifyingAtRuntime,
    Verified,
    Initializing,
    Initialized,
}
impl ClassStatus {
    #[must_use]
    pub fn is_resolved(self) -> bool {
        self >= ClassStatus::Resolved
    }

    #[must_use]
    pub fn is_verified(self) -> bool {
        self >= ClassStatus::Verified
    }

    #[must_use]
    pub fn is_initialized(self) -> bool {
        self == ClassStatus::Initialized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceKind {
    #[default]
    None,
    Soft,
    Weak,
    Phantom,
    Finalizer,
}

/// One interface-implementation entry: the interface and, for each of its
/// virtual methods, the concrete method in the owning class.
#[derive(Debug, Clone)]
pub struct IfTableEntry {
    pub interface: ClassRef,
    /// One slot per virtual method of `interface`; empty until interface
    /// methods are linked (and always empty for marker interfaces).
    pub methods: Vec<MethodRef>,
}

/// Interface-implementation table. Closed under super-interfaces; a
/// super-interface always precedes its sub-interfaces.
#[derive(Debug, Clone, Default)]
pub struct IfTable {
    pub entries: Vec<IfTableEntry>,
}
impl IfTable {
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn interface(&self, i: usize) -> &ClassRef {
        &self.entries[i].interface
    }

    #[must_use]
    pub fn contains(&self, class: &ClassRef) -> bool {
        self.entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.interface, class))
    }

    /// Verify the super-interface-precedes-sub-interface invariant.
    pub fn debug_verify_order(&self) {
        if cfg!(debug_assertions) {
            for i in 0..self.entries.len() {
                for j in (i + 1)..self.entries.len() {
                    let if_a = &self.entries[i].interface;
                    let if_b = &self.entries[j].interface;
                    debug_assert!(
                        !if_b.is_assignable_from(if_a),
                        "bad interface order: {} (index {i}) extends {} (index {j})",
                        if_a.descriptor().pretty(),
                        if_b.descriptor().pretty(),
                    );
                }
            }
        }
    }
}

/// One interface-method-table slot.
#[derive(Debug, Clone, Default)]
pub enum ImtEntry {
    #[default]
    Unimplemented,
    Method(MethodRef),
    /// Calls through this slot take the slow path that searches the iftable.
    Conflict,
}
impl ImtEntry {
    #[must_use]
    pub fn as_method(&self) -> Option<&MethodRef> {
        match self {
            ImtEntry::Method(m) => Some(m),
            _ => None,
        }
    }
}

/// The inline table copies carried by an instantiable class for call-site
/// speed.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedTables {
    pub imt: Vec<ImtEntry>,
    pub vtable: Vec<MethodRef>,
}

/// The mutable portion of a class record, guarded by the per-class monitor.
#[derive(Debug, Default)]
pub struct ClassData {
    pub status: ClassStatus,
    pub access_flags: ClassAccessFlags,
    pub reference_kind: ReferenceKind,
    pub super_class: Option<ClassRef>,
    /// Directly implemented interfaces in declaration order, resolved.
    pub direct_interfaces: Vec<ClassRef>,
    pub dex_cache: Option<Arc<DexCache>>,
    pub class_def: Option<ClassDefIdx>,
    pub iftable: Arc<IfTable>,
    pub vtable: Arc<Vec<MethodRef>>,
    /// Direct-mapped interface dispatch table; empty for interfaces.
    pub imt: Arc<Vec<ImtEntry>>,
    pub embedded: Option<EmbeddedTables>,
    pub direct_methods: Vec<MethodRef>,
    pub virtual_methods: Vec<MethodRef>,
    pub instance_fields: Vec<FieldRef>,
    pub static_fields: Vec<FieldRef>,
    /// One slot per static field, in declaration order.
    pub static_values: Vec<Value>,
    pub object_size: usize,
    pub class_size: usize,
    pub num_reference_instance_fields: usize,
    pub num_reference_static_fields: usize,
    /// Bit `k` set iff the `k`-th reference-width slot holds a reference;
    /// [`REFERENCE_OFFSETS_OVERFLOW`] directs the scanner to walk the
    /// hierarchy instead.
    pub reference_offsets: u32,
    /// Instances have no fixed size (arrays, strings).
    pub variable_size: bool,
    /// Allocated at a preliminary size; replaced by a final-sized record at
    /// the end of linking.
    pub is_temp: bool,
    /// Valid only while `status == Initializing`.
    pub clinit_thread: Option<ThreadId>,
    /// The sticky first failure; valid only when `status == Erroneous`.
    pub erroneous: Option<LinkError>,
}
impl Default for ClassStatus {
    fn default() -> Self {
        ClassStatus::NotReady
    }
}

pub const REFERENCE_OFFSETS_OVERFLOW: u32 = u32::MAX;

/// A class record: one per user-defined, primitive, array, or proxy class.
///
/// The immutable identity lives directly on the struct; everything the
/// linker builds up lives in [`ClassData`] behind the record's monitor.
pub struct Class {
    descriptor: Descriptor,
    hash: DescriptorHash,
    /// Weak so a dead loader's classes can be reclaimed as a unit; the
    /// embedder keeps the loader alive for as long as its classes are used.
    loader: Option<Weak<crate::loader::ClassLoader>>,
    /// Stable loader identity for table keys and package checks; 0 is the
    /// bootstrap loader.
    loader_key: usize,
    primitive: Option<PrimitiveKind>,
    component: Option<ClassRef>,
    /// The class of this class object; the class-of-classes points to itself.
    klass: OnceLock<Weak<Class>>,
    monitor: Condvar,
    data: Mutex<ClassData>,
}
impl Class {
    pub(crate) fn alloc(
        descriptor: Descriptor,
        loader: Option<LoaderRef>,
        primitive: Option<PrimitiveKind>,
        component: Option<ClassRef>,
        class_size: usize,
    ) -> ClassRef {
        let hash = hash_descriptor(descriptor.as_str());
        let loader_key = loader.as_ref().map_or(0, crate::loader::loader_key);
        Arc::new(Class {
            descriptor,
            hash,
            loader: loader.as_ref().map(Arc::downgrade),
            loader_key,
            primitive,
            component,
            klass: OnceLock::new(),
            monitor: Condvar::new(),
            data: Mutex::new(ClassData {
                class_size,
                ..ClassData::default()
            }),
        })
    }

    /// The self-referential root: its own class pointer points to itself.
    /// `Arc::new_cyclic` is the non-movable construction window; the weak
    /// self-pointer is installed before the record is ever shared.
    pub(crate) fn alloc_class_class(descriptor: Descriptor, class_size: usize) -> ClassRef {
        Arc::new_cyclic(|weak| {
            let klass = OnceLock::new();
            klass.set(weak.clone()).ok();
            Class {
                hash: hash_descriptor(descriptor.as_str()),
                descriptor,
                loader: None,
                loader_key: 0,
                primitive: None,
                component: None,
                klass,
                monitor: Condvar::new(),
                data: Mutex::new(ClassData {
                    class_size,
                    ..ClassData::default()
                }),
            }
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn descriptor_hash(&self) -> DescriptorHash {
        self.hash
    }

    /// The defining loader, `None` for the bootstrap loader. Also `None` if
    /// the loader has already been reclaimed.
    #[must_use]
    pub fn loader(&self) -> Option<LoaderRef> {
        self.loader.as_ref().and_then(Weak::upgrade)
    }

    /// Identity of the defining loader; 0 is the bootstrap loader.
    #[must_use]
    pub fn loader_key(&self) -> usize {
        self.loader_key
    }

    #[must_use]
    pub fn is_boot_loader_class(&self) -> bool {
        self.loader_key == 0
    }

    #[must_use]
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        self.primitive
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.primitive.is_some()
    }

    #[must_use]
    pub fn component_type(&self) -> Option<&ClassRef> {
        self.component.as_ref()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.component.is_some()
    }

    /// The class of this class object, once assigned.
    #[must_use]
    pub fn class_of(&self) -> Option<ClassRef> {
        self.klass.get().and_then(Weak::upgrade)
    }

    pub(crate) fn set_class_of(&self, class: &ClassRef) {
        // May race benignly with identical values during bootstrap.
        self.klass.set(Arc::downgrade(class)).ok();
    }

    /// Lock the per-class monitor.
    pub fn data(&self) -> MutexGuard<'_, ClassData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on the monitor; the wait ignores nothing and is re-entered by
    /// the caller's loop.
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, ClassData>) -> MutexGuard<'a, ClassData> {
        self.monitor
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify_all(&self) {
        self.monitor.notify_all();
    }

    /// The single funnel for status changes; broadcasts to waiters.
    pub(crate) fn set_status_locked(&self, data: &mut ClassData, status: ClassStatus) {
        debug_assert!(
            status > data.status
                || status == ClassStatus::Erroneous
                || status == ClassStatus::Retired,
            "non-monotonic status change {:?} -> {status:?} for {}",
            data.status,
            self.descriptor
        );
        data.status = status;
        self.monitor.notify_all();
    }

    pub(crate) fn set_status(&self, status: ClassStatus) {
        let mut data = self.data();
        self.set_status_locked(&mut data, status);
    }

    /// Bootstrap-only: hand-crafted roots are wound back to *not-ready* and
    /// re-driven through the full loading path.
    pub(crate) fn reset_for_reload(&self) {
        let mut data = self.data();
        data.status = ClassStatus::NotReady;
        self.monitor.notify_all();
    }

    #[must_use]
    pub fn status(&self) -> ClassStatus {
        self.data().status
    }

    #[must_use]
    pub fn is_erroneous(&self) -> bool {
        self.status() == ClassStatus::Erroneous
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.status() == ClassStatus::Retired
    }

    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.data().is_temp
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status().is_resolved()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.status().is_initialized()
    }

    #[must_use]
    pub fn access_flags(&self) -> ClassAccessFlags {
        self.data().access_flags
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags().is_interface()
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags().is_abstract()
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.access_flags().contains(ClassAccessFlags::PROXY)
    }

    #[must_use]
    pub fn has_default_methods(&self) -> bool {
        self.access_flags()
            .contains(ClassAccessFlags::HAS_DEFAULT_METHODS)
    }

    pub fn add_access_flags(&self, flags: ClassAccessFlags) {
        self.data().access_flags |= flags;
    }

    /// A class whose instances can exist: not primitive, not an interface,
    /// not abstract; arrays are instantiable despite their abstract bit.
    #[must_use]
    pub fn is_instantiable(&self) -> bool {
        if self.is_primitive() {
            return false;
        }
        if self.is_array() {
            return true;
        }
        let flags = self.access_flags();
        !flags.is_interface() && !flags.is_abstract()
    }

    /// Whether the resolved record carries inline imt/vtable copies.
    #[must_use]
    pub fn should_have_embedded_tables(&self) -> bool {
        self.is_instantiable()
    }

    #[must_use]
    pub fn super_class(&self) -> Option<ClassRef> {
        self.data().super_class.clone()
    }

    #[must_use]
    pub fn direct_interfaces(&self) -> Vec<ClassRef> {
        self.data().direct_interfaces.clone()
    }

    #[must_use]
    pub fn dex_cache(&self) -> Option<Arc<DexCache>> {
        self.data().dex_cache.clone()
    }

    #[must_use]
    pub fn dex_file(&self) -> Option<Arc<DexFile>> {
        self.data().dex_cache.as_ref().map(|c| c.dex().clone())
    }

    #[must_use]
    pub fn iftable(&self) -> Arc<IfTable> {
        self.data().iftable.clone()
    }

    #[must_use]
    pub fn vtable(&self) -> Arc<Vec<MethodRef>> {
        self.data().vtable.clone()
    }

    #[must_use]
    pub fn imt(&self) -> Arc<Vec<ImtEntry>> {
        self.data().imt.clone()
    }

    #[must_use]
    pub fn direct_methods(&self) -> Vec<MethodRef> {
        self.data().direct_methods.clone()
    }

    #[must_use]
    pub fn virtual_methods(&self) -> Vec<MethodRef> {
        self.data().virtual_methods.clone()
    }

    #[must_use]
    pub fn instance_fields(&self) -> Vec<FieldRef> {
        self.data().instance_fields.clone()
    }

    #[must_use]
    pub fn static_fields(&self) -> Vec<FieldRef> {
        self.data().static_fields.clone()
    }

    #[must_use]
    pub fn object_size(&self) -> usize {
        self.data().object_size
    }

    #[must_use]
    pub fn class_size(&self) -> usize {
        self.data().class_size
    }

    #[must_use]
    pub fn reference_offsets(&self) -> u32 {
        self.data().reference_offsets
    }

    #[must_use]
    pub fn reference_kind(&self) -> ReferenceKind {
        self.data().reference_kind
    }

    /// Record the first failure and go terminal. Later failures keep the
    /// original record (first error is sticky).
    pub(crate) fn set_erroneous(&self, err: &LinkError) {
        let mut data = self.data();
        if data.erroneous.is_none() {
            data.erroneous = Some(err.clone());
        }
        if data.status != ClassStatus::Erroneous {
            self.set_status_locked(&mut data, ClassStatus::Erroneous);
        }
    }

    /// Rebuild the failure a second toucher of an erroneous class observes:
    /// verification failures are rethrown as recorded, anything else turns
    /// into a no-class-def-found referencing the original failure.
    #[must_use]
    pub fn erroneous_error(&self) -> LinkError {
        let data = self.data();
        self.erroneous_error_locked(&data)
    }

    /// As [`Class::erroneous_error`], for callers already holding the
    /// monitor.
    #[must_use]
    pub(crate) fn erroneous_error_locked(&self, data: &ClassData) -> LinkError {
        match &data.erroneous {
            Some(err @ LinkError::VerifyError { .. }) => err.clone(),
            other => LinkError::NoClassDefFound {
                descriptor: self.descriptor.clone(),
                cause: other.clone().map(Box::new),
            },
        }
    }

    /// `self` is a super-type of `other` (class hierarchy or interface
    /// implementation).
    #[must_use]
    pub fn is_assignable_from(self: &Arc<Self>, other: &ClassRef) -> bool {
        if Arc::ptr_eq(self, other) {
            return true;
        }
        if self.is_interface() {
            return other.iftable().contains(self);
        }
        let mut current = other.super_class();
        while let Some(cur) = current {
            if Arc::ptr_eq(self, &cur) {
                return true;
            }
            current = cur.super_class();
        }
        false
    }

    /// Package-level access: `other` is visible to `self`.
    #[must_use]
    pub fn can_access(self: &Arc<Self>, other: &ClassRef) -> bool {
        other.access_flags().is_public() || self.is_in_same_package(other)
    }

    #[must_use]
    pub fn is_in_same_package(self: &Arc<Self>, other: &ClassRef) -> bool {
        self.loader_key == other.loader_key
            && self.descriptor.package() == other.descriptor.package()
    }

    /// Member-level access: can `self` touch a member of `declaring` with
    /// the given visibility bits?
    #[must_use]
    pub fn can_access_member(
        self: &Arc<Self>,
        declaring: &ClassRef,
        member_flags: ember_base::flags::MethodAccessFlags,
    ) -> bool {
        if member_flags.is_public() {
            return true;
        }
        if Arc::ptr_eq(self, declaring) {
            return true;
        }
        if member_flags.is_private() {
            return false;
        }
        if member_flags.contains(ember_base::flags::MethodAccessFlags::PROTECTED)
            && declaring.is_assignable_from(self)
        {
            return true;
        }
        self.is_in_same_package(declaring)
    }

    // --- member search -----------------------------------------------------

    #[must_use]
    pub fn find_class_initializer(&self) -> Option<MethodRef> {
        self.data()
            .direct_methods
            .iter()
            .find(|m| m.is_class_initializer())
            .cloned()
    }

    #[must_use]
    pub fn find_declared_direct_method(&self, name: &str, proto: &MethodProto) -> Option<MethodRef> {
        self.data()
            .direct_methods
            .iter()
            .find(|m| &**m.name() == name && m.proto() == proto)
            .cloned()
    }

    #[must_use]
    pub fn find_declared_virtual_method(
        &self,
        name: &str,
        proto: &MethodProto,
    ) -> Option<MethodRef> {
        self.data()
            .virtual_methods
            .iter()
            .find(|m| &**m.name() == name && m.proto() == proto)
            .cloned()
    }

    #[must_use]
    pub fn find_declared_direct_method_by_idx(
        &self,
        dex: &Arc<DexFile>,
        idx: MethodIdx,
    ) -> Option<MethodRef> {
        self.data()
            .direct_methods
            .iter()
            .find(|m| {
                m.method_idx() == Some(idx) && m.dex().map_or(false, |d| Arc::ptr_eq(d, dex))
            })
            .cloned()
    }

    #[must_use]
    pub fn find_declared_virtual_method_by_idx(
        &self,
        dex: &Arc<DexFile>,
        idx: MethodIdx,
    ) -> Option<MethodRef> {
        self.data()
            .virtual_methods
            .iter()
            .find(|m| {
                m.method_idx() == Some(idx) && m.dex().map_or(false, |d| Arc::ptr_eq(d, dex))
            })
            .cloned()
    }

    /// Walk this class and its supers for a direct method.
    #[must_use]
    pub fn find_direct_method(self: &Arc<Self>, name: &str, proto: &MethodProto) -> Option<MethodRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(m) = cur.find_declared_direct_method(name, proto) {
                return Some(m);
            }
            current = cur.super_class();
        }
        None
    }

    #[must_use]
    pub fn find_direct_method_by_idx(
        self: &Arc<Self>,
        dex: &Arc<DexFile>,
        idx: MethodIdx,
    ) -> Option<MethodRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(m) = cur.find_declared_direct_method_by_idx(dex, idx) {
                return Some(m);
            }
            current = cur.super_class();
        }
        None
    }

    /// Walk this class and its supers for a virtual method.
    #[must_use]
    pub fn find_virtual_method(self: &Arc<Self>, name: &str, proto: &MethodProto) -> Option<MethodRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(m) = cur.find_declared_virtual_method(name, proto) {
                return Some(m);
            }
            current = cur.super_class();
        }
        None
    }

    #[must_use]
    pub fn find_virtual_method_by_idx(
        self: &Arc<Self>,
        dex: &Arc<DexFile>,
        idx: MethodIdx,
    ) -> Option<MethodRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(m) = cur.find_declared_virtual_method_by_idx(dex, idx) {
                return Some(m);
            }
            current = cur.super_class();
        }
        None
    }

    /// Interface-method search: the class's own declarations first, then
    /// every interface in the flattened table.
    #[must_use]
    pub fn find_interface_method(
        self: &Arc<Self>,
        name: &str,
        proto: &MethodProto,
    ) -> Option<MethodRef> {
        if let Some(m) = self
            .find_declared_virtual_method(name, proto)
            .or_else(|| self.find_declared_direct_method(name, proto))
        {
            return Some(m);
        }
        let iftable = self.iftable();
        for entry in &iftable.entries {
            if let Some(m) = entry.interface.find_declared_virtual_method(name, proto) {
                return Some(m);
            }
        }
        None
    }

    #[must_use]
    pub fn find_interface_method_by_idx(
        self: &Arc<Self>,
        dex: &Arc<DexFile>,
        idx: MethodIdx,
    ) -> Option<MethodRef> {
        if let Some(m) = self
            .find_declared_virtual_method_by_idx(dex, idx)
            .or_else(|| self.find_declared_direct_method_by_idx(dex, idx))
        {
            return Some(m);
        }
        let iftable = self.iftable();
        for entry in &iftable.entries {
            if let Some(m) = entry.interface.find_declared_virtual_method_by_idx(dex, idx) {
                return Some(m);
            }
        }
        None
    }

    #[must_use]
    pub fn find_declared_field(&self, name: &str, descriptor: &Descriptor, is_static: bool) -> Option<FieldRef> {
        let data = self.data();
        let fields = if is_static {
            &data.static_fields
        } else {
            &data.instance_fields
        };
        fields
            .iter()
            .find(|f| &**f.name() == name && f.descriptor() == descriptor)
            .cloned()
    }

    #[must_use]
    pub fn find_declared_field_by_idx(&self, dex: &Arc<DexFile>, idx: FieldIdx) -> Option<FieldRef> {
        let data = self.data();
        data.static_fields
            .iter()
            .chain(data.instance_fields.iter())
            .find(|f| f.field_idx() == Some(idx) && f.dex().map_or(false, |d| Arc::ptr_eq(d, dex)))
            .cloned()
    }

    /// Instance fields: this class, then supers.
    #[must_use]
    pub fn find_instance_field(
        self: &Arc<Self>,
        name: &str,
        descriptor: &Descriptor,
    ) -> Option<FieldRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(f) = cur.find_declared_field(name, descriptor, false) {
                return Some(f);
            }
            current = cur.super_class();
        }
        None
    }

    /// Static fields: this class, its interfaces (recursively), then supers.
    #[must_use]
    pub fn find_static_field(
        self: &Arc<Self>,
        name: &str,
        descriptor: &Descriptor,
    ) -> Option<FieldRef> {
        let mut current = Some(self.clone());
        while let Some(cur) = current {
            if let Some(f) = cur.find_declared_field(name, descriptor, true) {
                return Some(f);
            }
            let iftable = cur.iftable();
            for entry in &iftable.entries {
                if let Some(f) = entry.interface.find_declared_field(name, descriptor, true) {
                    return Some(f);
                }
            }
            current = cur.super_class();
        }
        None
    }

    /// Position of a static field in the declaration-order value slots.
    #[must_use]
    pub fn static_field_slot(&self, field: &FieldRef) -> Option<usize> {
        self.data()
            .static_fields
            .iter()
            .position(|f| Arc::ptr_eq(f, field))
    }

    #[must_use]
    pub fn static_value(&self, slot: usize) -> Option<Value> {
        self.data().static_values.get(slot).cloned()
    }

    pub fn set_static_value(&self, slot: usize, value: Value) {
        let mut data = self.data();
        if let Some(v) = data.static_values.get_mut(slot) {
            *v = value;
        }
    }

    /// Footprint of a class record with the given embedded-table shape; the
    /// static field area is appended past this.
    #[must_use]
    pub(crate) fn size_without_statics(
        embedded: bool,
        embedded_imt_len: usize,
        embedded_vtable_len: usize,
        pointer_size: usize,
    ) -> usize {
        let mut size = CLASS_BASE_SIZE;
        if embedded {
            // Length slot plus the two inline tables.
            size += pointer_size * (1 + embedded_imt_len + embedded_vtable_len);
        }
        size
    }
}
impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("descriptor", &self.descriptor)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Identity comparison; class records are compared by allocation, never by
/// descriptor alone (two loaders may both define the same name).
#[must_use]
pub fn same_class(a: &ClassRef, b: &ClassRef) -> bool {
    Arc::ptr_eq(a, b)
}
