use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ember_base::container::{DexFile, FieldIdx};
use ember_base::descriptor::Descriptor;
use ember_base::flags::FieldAccessFlags;

use crate::class::{Class, ClassRef};

pub type FieldRef = Arc<Field>;

/// Sentinel offset for a field that has not been laid out yet.
pub const UNASSIGNED_OFFSET: u32 = u32::MAX;

/// A field record. The offset is assigned during layout and read-only after
/// the declaring class resolves.
pub struct Field {
    name: Arc<str>,
    descriptor: Descriptor,
    dex: Option<Arc<DexFile>>,
    field_idx: Option<FieldIdx>,
    access_flags: FieldAccessFlags,
    offset: AtomicU32,
    declaring: RwLock<Weak<Class>>,
}
impl Field {
    #[must_use]
    pub fn new(
        name: Arc<str>,
        descriptor: Descriptor,
        access_flags: FieldAccessFlags,
        dex: Option<Arc<DexFile>>,
        field_idx: Option<FieldIdx>,
    ) -> FieldRef {
        Arc::new(Field {
            name,
            descriptor,
            dex,
            field_idx,
            access_flags,
            offset: AtomicU32::new(UNASSIGNED_OFFSET),
            declaring: RwLock::new(Weak::new()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn dex(&self) -> Option<&Arc<DexFile>> {
        self.dex.as_ref()
    }

    #[must_use]
    pub fn field_idx(&self) -> Option<FieldIdx> {
        self.field_idx
    }

    #[must_use]
    pub fn access_flags(&self) -> FieldAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.descriptor.is_reference()
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn set_offset(&self, offset: u32) {
        self.offset.store(offset, Ordering::Release);
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
    pub fn pretty(&self) -> String {
        format!("{} {}", self.descriptor.pretty(), self.name)
    }
}
impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("offset", &self.offset())
            .finish_non_exhaustive()
    }
}
