use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ember_base::container::{DexFile, MethodIdx};
use ember_base::descriptor::MethodProto;
use ember_base::flags::MethodAccessFlags;

use crate::class::{Class, ClassRef};

pub type MethodRef = Arc<Method>;

/// Opaque handle to a compiled-code entry produced by a code source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHandle(pub usize);

/// Where a call to the method lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Not yet assigned (only while the declaring class is being loaded).
    Unlinked,
    /// Static methods park here until their class initializes.
    ResolutionTrampoline,
    InterpreterBridge,
    NativeBridge,
    Compiled(CodeHandle),
    ProxyInvoke,
}

impl EntryPoint {
    #[must_use]
    pub fn is_resolution_trampoline(self) -> bool {
        self == EntryPoint::ResolutionTrampoline
    }

    #[must_use]
    pub fn is_interpreter_bridge(self) -> bool {
        self == EntryPoint::InterpreterBridge
    }

    #[must_use]
    pub fn is_native_bridge(self) -> bool {
        self == EntryPoint::NativeBridge
    }

    #[must_use]
    pub fn compiled_code(self) -> Option<CodeHandle> {
        match self {
            EntryPoint::Compiled(code) => Some(code),
            _ => None,
        }
    }
}

/// Sentinel value for a method index that has not been assigned.
pub const UNASSIGNED_METHOD_INDEX: u32 = u32::MAX;

/// A method record. Identity is the `Arc` allocation; dispatch tables and
/// dex caches share these. Mirandas and promoted defaults are fresh records
/// owned by the class that synthesized them.
pub struct Method {
    name: Arc<str>,
    proto: MethodProto,
    /// The container this method was loaded from; `None` only for the
    /// runtime-internal methods fabricated during bootstrap.
    dex: Option<Arc<DexFile>>,
    method_idx: Option<MethodIdx>,
    access_flags: AtomicU32,
    /// Slot in the declaring class's vtable (or declaration position for
    /// interface methods).
    method_index: AtomicU32,
    declaring: RwLock<Weak<Class>>,
    entry_point: RwLock<EntryPoint>,
}
impl Method {
    #[must_use]
    pub fn new(
        name: Arc<str>,
        proto: MethodProto,
        access_flags: MethodAccessFlags,
        dex: Option<Arc<DexFile>>,
        method_idx: Option<MethodIdx>,
    ) -> MethodRef {
        Arc::new(Method {
            name,
            proto,
            dex,
            method_idx,
            access_flags: AtomicU32::new(access_flags.bits()),
            method_index: AtomicU32::new(UNASSIGNED_METHOD_INDEX),
            declaring: RwLock::new(Weak::new()),
            entry_point: RwLock::new(EntryPoint::Unlinked),
        })
    }

    /// A fresh record with the same name/proto/container identity but its own
    /// flags, index, and declaring class. Used for mirandas and promoted
    /// defaults, which must be owned by the class being linked.
    #[must_use]
    pub fn copy_of(source: &Method, extra_flags: MethodAccessFlags) -> MethodRef {
        let flags = (source.access_flags() | extra_flags) & !MethodAccessFlags::PREVERIFIED;
        Method::new(
            source.name.clone(),
            source.proto.clone(),
            flags,
            source.dex.clone(),
            source.method_idx,
        )
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn proto(&self) -> &MethodProto {
        &self.proto
    }

    #[must_use]
    pub fn signature(&self) -> String {
        self.proto.signature()
    }

    #[must_use]
    pub fn dex(&self) -> Option<&Arc<DexFile>> {
        self.dex.as_ref()
    }

    #[must_use]
    pub fn method_idx(&self) -> Option<MethodIdx> {
        self.method_idx
    }

    #[must_use]
    pub fn access_flags(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_bits_retain(self.access_flags.load(Ordering::Acquire))
    }

    pub fn add_access_flags(&self, flags: MethodAccessFlags) {
        self.access_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_access_flags(&self, flags: MethodAccessFlags) {
        self.access_flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    #[must_use]
    pub fn method_index(&self) -> u32 {
        self.method_index.load(Ordering::Acquire)
    }

    pub fn set_method_index(&self, index: u32) {
        self.method_index.store(index, Ordering::Release);
    }

    #[must_use]
    pub fn declaring_class(&self) -> Option<ClassRef> {
        self.declaring
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .upgrade()
    }

    pub fn set_declaring_class(&self, class: &ClassRef) {
        *self
            .declaring
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::downgrade(class);
    }

    #[must_use]
    pub fn entry_point(&self) -> EntryPoint {
        *self
            .entry_point
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_entry_point(&self, entry: EntryPoint) {
        *self
            .entry_point
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = entry;
    }

    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.access_flags().is_static() && &*self.name == "<clinit>"
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }

    /// Whether an inherited slot holding this method may be replaced by a
    /// more specific default implementation.
    #[must_use]
    pub fn is_overridable_by_default_method(&self) -> bool {
        let flags = self.access_flags();
        flags.is_default() || flags.is_miranda()
    }

    /// Name-and-signature equality. Fast path compares container indices when
    /// both methods come from the same container; the slow path compares the
    /// name string and the full prototype.
    #[must_use]
    pub fn has_same_name_and_signature(&self, other: &Method) -> bool {
        if let (Some(dex_a), Some(dex_b)) = (&self.dex, &other.dex) {
            if Arc::ptr_eq(dex_a, dex_b) {
                if let (Some(idx_a), Some(idx_b)) = (self.method_idx, other.method_idx) {
                    if idx_a == idx_b {
                        return true;
                    }
                    if let (Ok(a), Ok(b)) = (dex_a.method(idx_a), dex_b.method(idx_b)) {
                        return a.name == b.name && a.proto == b.proto;
                    }
                }
            }
        }
        self.name == other.name && self.proto == other.proto
    }

    #[must_use]
    pub fn pretty(&self) -> String {
        let class = self
            .declaring_class()
            .map_or_else(|| "<unlinked>".to_owned(), |c| c.descriptor().pretty());
        format!("{}.{}{}", class, self.name, self.signature())
    }
}
impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("signature", &self.signature())
            .field("access_flags", &self.access_flags())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_base::descriptor::Descriptor;

    fn proto(ret: &str, params: &[&str]) -> MethodProto {
        MethodProto::new(
            params.iter().map(|p| Descriptor::parse(p).unwrap()),
            Descriptor::parse(ret).unwrap(),
        )
    }

    #[test]
    fn signature_comparison_slow_path() {
        let a = Method::new(
            Arc::from("f"),
            proto("V", &["I"]),
            MethodAccessFlags::PUBLIC,
            None,
            None,
        );
        let b = Method::new(
            Arc::from("f"),
            proto("V", &["I"]),
            MethodAccessFlags::PUBLIC,
            None,
            None,
        );
        let c = Method::new(
            Arc::from("f"),
            proto("V", &["J"]),
            MethodAccessFlags::PUBLIC,
            None,
            None,
        );
        assert!(a.has_same_name_and_signature(&b));
        assert!(!a.has_same_name_and_signature(&c));
    }

    #[test]
    fn copied_methods_share_identity_data_only() {
        let a = Method::new(
            Arc::from("g"),
            proto("I", &[]),
            MethodAccessFlags::PUBLIC,
            None,
            None,
        );
        a.set_method_index(7);
        let b = Method::copy_of(&a, MethodAccessFlags::MIRANDA | MethodAccessFlags::COPIED);
        assert!(b.access_flags().is_miranda());
        assert_eq!(b.method_index(), UNASSIGNED_METHOD_INDEX);
        assert!(a.has_same_name_and_signature(&b));
    }
}
