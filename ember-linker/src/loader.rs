use std::sync::{Arc, PoisonError, RwLock};

use ember_base::container::DexFile;

pub type LoaderRef = Arc<ClassLoader>;

/// A defining loader: a class path plus a parent to delegate to. The
/// bootstrap loader is not represented by a value; APIs take
/// `Option<&LoaderRef>` where `None` is the bootstrap loader.
///
/// User-supplied loader *code* is out of scope; delegation here is the
/// standard parent-first walk over registered containers.
pub struct ClassLoader {
    name: Box<str>,
    parent: Option<LoaderRef>,
    /// Standard delegation consults the parent chain before the own class
    /// path; child-first loaders invert that.
    parent_first: bool,
    class_path: RwLock<Vec<Arc<DexFile>>>,
}
impl ClassLoader {
    #[must_use]
    pub fn new(name: impl Into<Box<str>>, parent: Option<LoaderRef>) -> LoaderRef {
        ClassLoader::with_delegation(name, parent, true)
    }

    #[must_use]
    pub fn with_delegation(
        name: impl Into<Box<str>>,
        parent: Option<LoaderRef>,
        parent_first: bool,
    ) -> LoaderRef {
        Arc::new(ClassLoader {
            name: name.into(),
            parent,
            parent_first,
            class_path: RwLock::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn parent_first(&self) -> bool {
        self.parent_first
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&LoaderRef> {
        self.parent.as_ref()
    }

    pub fn append_to_class_path(&self, dex: Arc<DexFile>) {
        self.class_path
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dex);
    }

    #[must_use]
    pub fn class_path(&self) -> Vec<Arc<DexFile>> {
        self.class_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
impl std::fmt::Debug for ClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLoader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Stable key for a loader in the registry maps.
#[must_use]
pub(crate) fn loader_key(loader: &LoaderRef) -> usize {
    Arc::as_ptr(loader) as usize
}
