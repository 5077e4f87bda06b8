//! Boot-image snapshots: rehydrating a pre-built set of class roots and
//! constant pools instead of running the full bootstrap. There is no on-disk
//! format here; a snapshot is captured from a booted linker and handed back
//! to a fresh one.

use std::collections::HashSet;
use std::sync::Arc;

use ember_base::descriptor::Descriptor;

use crate::bootstrap::ClassRoot;
use crate::class::ClassRef;
use crate::dex_cache::DexCache;
use crate::field::FieldRef;
use crate::linker::ClassLinker;
use crate::method::MethodRef;
use crate::LinkError;

/// A captured boot image: the class-roots vector, the dex caches, and the
/// method/field sections every cache entry must fall inside.
pub struct BootImage {
    pointer_size: usize,
    class_roots: Vec<ClassRef>,
    dex_caches: Vec<Arc<DexCache>>,
    methods: Vec<MethodRef>,
    fields: Vec<FieldRef>,
    classes: Vec<ClassRef>,
}
impl BootImage {
    /// Snapshot a booted linker.
    #[must_use]
    pub fn capture(linker: &ClassLinker) -> BootImage {
        assert!(linker.is_init_done(), "capturing an unbooted linker");
        let class_roots = ClassRoot::ALL
            .iter()
            .map(|root| linker.class_root(*root))
            .collect();
        let dex_caches = linker.dex_registry_lock().live_caches();

        let mut classes: Vec<ClassRef> = Vec::new();
        linker.visit_classes(&mut |class: &ClassRef| {
            classes.push(class.clone());
            true
        });
        let mut methods: Vec<MethodRef> = Vec::new();
        let mut fields: Vec<FieldRef> = Vec::new();
        for class in &classes {
            methods.extend(class.direct_methods());
            methods.extend(class.virtual_methods());
            fields.extend(class.instance_fields());
            fields.extend(class.static_fields());
        }

        BootImage {
            pointer_size: linker.config().pointer_size,
            class_roots,
            dex_caches,
            methods,
            fields,
            classes,
        }
    }

    #[must_use]
    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    #[must_use]
    pub fn dex_caches(&self) -> &[Arc<DexCache>] {
        &self.dex_caches
    }

    /// Lazy class lookup through the image constant pools.
    #[must_use]
    pub fn lookup_class(&self, descriptor: &Descriptor) -> Option<ClassRef> {
        for cache in &self.dex_caches {
            for class in cache.resolved_types_iter() {
                if class.descriptor() == descriptor {
                    return Some(class);
                }
            }
        }
        self.classes
            .iter()
            .find(|c| c.descriptor() == descriptor)
            .cloned()
    }

    /// Every class in the image, for wholesale promotion into the tables.
    #[must_use]
    pub fn all_classes(&self) -> Vec<ClassRef> {
        self.classes.clone()
    }

    /// Every method record referenced by every dex cache must live within
    /// the image's method section; fields likewise.
    fn sanity_check(&self) -> Result<(), LinkError> {
        let method_section: HashSet<usize> = self
            .methods
            .iter()
            .map(|m| Arc::as_ptr(m) as usize)
            .collect();
        let field_section: HashSet<usize> = self
            .fields
            .iter()
            .map(|f| Arc::as_ptr(f) as usize)
            .collect();
        for cache in &self.dex_caches {
            for method in cache.resolved_methods_iter() {
                if !method_section.contains(&(Arc::as_ptr(&method) as usize)) {
                    return Err(LinkError::Linkage {
                        message: format!(
                            "dex cache {} references method {} outside the image method section",
                            cache.location(),
                            method.pretty()
                        ),
                    });
                }
            }
            for field in cache.resolved_fields_iter() {
                if !field_section.contains(&(Arc::as_ptr(&field) as usize)) {
                    return Err(LinkError::Linkage {
                        message: format!(
                            "dex cache {} references field {} outside the image field section",
                            cache.location(),
                            field.pretty()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ClassLinker {
    /// Mount a snapshot instead of running the bootstrap. Class lookups on
    /// the bootstrap loader fall back to the image constant pools until the
    /// miss threshold promotes everything into the table.
    pub fn boot_from_image(&self, image: Arc<BootImage>) -> Result<(), LinkError> {
        tracing::info!("class linker boot (from image)");
        assert!(!self.is_init_done(), "boot ran twice");
        if image.pointer_size() != self.config().pointer_size && !self.config().aot_mode {
            return Err(LinkError::Linkage {
                message: format!(
                    "image pointer size {} does not match runtime pointer size {}",
                    image.pointer_size(),
                    self.config().pointer_size
                ),
            });
        }
        image.sanity_check()?;

        // Reinstall the class roots.
        for (root, class) in ClassRoot::ALL.iter().zip(&image.class_roots) {
            self.set_class_root(*root, class);
        }
        // The single array iftable is recovered from any array class.
        let object_array = self.class_root(ClassRoot::ObjectArrayClass);
        self.set_array_iftable(object_array.iftable());

        // Re-register the image dex caches under the dex lock.
        {
            let mut registry = self.dex_registry_lock();
            for cache in image.dex_caches() {
                registry.register(cache);
                registry.append_to_boot_class_path(cache.clone());
            }
        }

        *self
            .image
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(image);
        self.set_image_lookup_required();
        self.set_init_done();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::LinkerConfig;
    use crate::testing;

    #[test]
    fn capture_and_rehydrate() {
        let source = testing::boot_linker();
        let image = Arc::new(BootImage::capture(&source));

        let target = ClassLinker::new(LinkerConfig::default());
        target.boot_from_image(image).expect("rehydrate");
        assert!(target.is_init_done());

        // The roots are the same records the source built.
        let object = target.class_root(ClassRoot::JavaLangObject);
        assert!(Arc::ptr_eq(&object, &source.class_root(ClassRoot::JavaLangObject)));
        assert!(target.array_iftable().is_some());

        // Bootstrap lookups fall back to the image lazily.
        let string = target
            .find_system_class("Ljava/lang/String;")
            .expect("string from image");
        assert!(Arc::ptr_eq(
            &string,
            &source.class_root(ClassRoot::JavaLangString)
        ));
    }

    #[test]
    fn pointer_size_mismatch_fails() {
        let source = testing::boot_linker();
        let image = Arc::new(BootImage::capture(&source));

        let config = LinkerConfig {
            pointer_size: 4,
            ..LinkerConfig::default()
        };
        let target = ClassLinker::new(config);
        assert!(target.boot_from_image(image).is_err());
    }

    #[test]
    fn misses_promote_after_threshold() {
        let source = testing::boot_linker();
        let image = Arc::new(BootImage::capture(&source));

        let config = LinkerConfig {
            image_lookup_promote_threshold: 3,
            ..LinkerConfig::default()
        };
        let target = ClassLinker::new(config);
        let before = source.num_loaded_classes();
        target.boot_from_image(image).expect("rehydrate");
        let missing = Descriptor::parse("Lno/such/Klass;").unwrap();
        for _ in 0..5 {
            assert!(target.lookup_class(&missing, None).is_none());
        }
        // Every image class is now table-resident.
        assert!(target.num_loaded_classes() >= before);
    }
}
