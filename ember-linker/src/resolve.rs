//! Constant-pool resolution: strings, types, methods, and fields, each
//! memoized in the owning container's dex cache.

use std::sync::Arc;

use ember_base::container::{DexFile, FieldIdx, MethodIdx, StringIdx, TypeIdx};
use ember_base::descriptor::Descriptor;

use crate::class::ClassRef;
use crate::dex_cache::DexCache;
use crate::field::FieldRef;
use crate::linker::ClassLinker;
use crate::loader::LoaderRef;
use crate::method::{Method, MethodRef};
use crate::LinkError;

/// The annotation a method-resolution site carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Direct,
    Static,
    Virtual,
    Super,
    Interface,
}
impl std::fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InvokeKind::Direct => "direct",
            InvokeKind::Static => "static",
            InvokeKind::Virtual => "virtual",
            InvokeKind::Super => "super",
            InvokeKind::Interface => "interface",
        };
        f.write_str(name)
    }
}

impl Method {
    /// Static, private, or a constructor: dispatched without a table.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        let flags = self.access_flags();
        flags.is_static() || flags.is_private() || self.is_constructor()
    }

    /// The invocation kind this method actually answers to.
    #[must_use]
    pub fn invoke_kind(&self) -> InvokeKind {
        let flags = self.access_flags();
        if flags.is_static() {
            return InvokeKind::Static;
        }
        if self.is_direct() {
            return InvokeKind::Direct;
        }
        let declaring_is_interface = self
            .declaring_class()
            .map_or(false, |c| c.is_interface());
        if declaring_is_interface && !flags.is_miranda() {
            InvokeKind::Interface
        } else {
            InvokeKind::Virtual
        }
    }

    /// Whether resolving this method under `kind` is an incompatible class
    /// change.
    #[must_use]
    pub fn check_incompatible_class_change(&self, kind: InvokeKind) -> bool {
        let flags = self.access_flags();
        match kind {
            InvokeKind::Static => !flags.is_static(),
            InvokeKind::Direct => !self.is_direct() || flags.is_static(),
            InvokeKind::Virtual => {
                let declaring_is_interface = self
                    .declaring_class()
                    .map_or(false, |c| c.is_interface());
                self.is_direct() || (declaring_is_interface && !flags.is_miranda())
            }
            InvokeKind::Super => false,
            InvokeKind::Interface => {
                let declaring = self.declaring_class();
                let interface_or_object = declaring.map_or(false, |c| {
                    c.is_interface() || c.descriptor().as_str() == "Ljava/lang/Object;"
                });
                self.is_direct() || !interface_or_object
            }
        }
    }
}

impl ClassLinker {
    /// Resolve a string constant: intern and install.
    pub fn resolve_string(
        &self,
        dex_cache: &Arc<DexCache>,
        idx: StringIdx,
    ) -> Result<Arc<str>, LinkError> {
        if let Some(hit) = dex_cache.resolved_string(idx) {
            return Ok(hit);
        }
        let text = dex_cache.dex().string(idx)?;
        let interned = self.intern(text);
        dex_cache.set_resolved_string(idx, interned.clone());
        Ok(interned)
    }

    /// Resolve a type constant through the current loader. A missing class
    /// surfaces as no-class-def-found with the lookup failure as its cause.
    pub fn resolve_type(
        &self,
        dex_cache: &Arc<DexCache>,
        idx: TypeIdx,
        loader: Option<&LoaderRef>,
    ) -> Result<ClassRef, LinkError> {
        if let Some(hit) = dex_cache.resolved_type(idx) {
            return Ok(hit);
        }
        let descriptor = dex_cache.dex().type_descriptor(idx)?.clone();
        let resolved = self
            .find_class(&descriptor, loader)
            .map_err(|err| match err {
                cause @ LinkError::ClassNotFound { .. } => LinkError::NoClassDefFound {
                    descriptor: descriptor.clone(),
                    cause: Some(Box::new(cause)),
                },
                other => other,
            })?;
        dex_cache.set_resolved_type(idx, resolved.clone());
        Ok(resolved)
    }

    /// Resolve a method constant under an invocation kind. The search order
    /// follows the kind; a hit of the wrong kind is an incompatible class
    /// change naming the kind the method actually has.
    pub fn resolve_method(
        &self,
        dex_cache: &Arc<DexCache>,
        idx: MethodIdx,
        loader: Option<&LoaderRef>,
        kind: InvokeKind,
    ) -> Result<MethodRef, LinkError> {
        if let Some(hit) = dex_cache.resolved_method(idx) {
            return Ok(hit);
        }
        let dex = dex_cache.dex().clone();
        let method_def = dex.method(idx)?.clone();
        let klass = self.resolve_type(dex_cache, method_def.class, loader)?;

        // Index scan first: saves the string compares, but only hits inside
        // the same container.
        let mut resolved = match kind {
            InvokeKind::Direct | InvokeKind::Static => klass.find_direct_method_by_idx(&dex, idx),
            InvokeKind::Interface => klass.find_interface_method_by_idx(&dex, idx),
            InvokeKind::Super | InvokeKind::Virtual => klass.find_virtual_method_by_idx(&dex, idx),
        };
        let name = dex.method_name(idx)?.clone();
        let proto = dex.method_proto(idx)?;
        if resolved.is_none() {
            // By name and signature, which works across containers.
            resolved = match kind {
                InvokeKind::Direct | InvokeKind::Static => {
                    klass.find_direct_method(&name, &proto)
                }
                InvokeKind::Interface => klass.find_interface_method(&name, &proto),
                InvokeKind::Super | InvokeKind::Virtual => {
                    klass.find_virtual_method(&name, &proto)
                }
            };
        }

        if let Some(method) = resolved {
            if !method.check_incompatible_class_change(kind) {
                // Be a good citizen and update the dex cache to speed
                // subsequent calls.
                dex_cache.set_resolved_method(idx, method.clone());
                return Ok(method);
            }
            return Err(incompatible_kind_error(&method, kind));
        }

        // Nothing under the requested kind: diagnose. The method existing
        // under another kind is an incompatible class change naming that
        // kind; otherwise there is no such method.
        let other = match kind {
            InvokeKind::Direct | InvokeKind::Static => klass
                .find_virtual_method(&name, &proto)
                .or_else(|| klass.find_interface_method(&name, &proto)),
            InvokeKind::Interface => klass
                .find_direct_method(&name, &proto)
                .or_else(|| klass.find_virtual_method(&name, &proto)),
            InvokeKind::Virtual => klass
                .find_direct_method(&name, &proto)
                .or_else(|| klass.find_interface_method(&name, &proto)),
            InvokeKind::Super => klass.find_direct_method(&name, &proto),
        };
        match other {
            Some(method) => Err(incompatible_kind_error(&method, kind)),
            None => Err(LinkError::NoSuchMethod {
                class: klass.descriptor().clone(),
                name,
                signature: proto.signature(),
            }),
        }
    }

    /// Resolve a field constant. The call-site flag picks the lookup order:
    /// static-then-instance or instance-then-static.
    pub fn resolve_field(
        &self,
        dex_cache: &Arc<DexCache>,
        idx: FieldIdx,
        loader: Option<&LoaderRef>,
        is_static: bool,
    ) -> Result<FieldRef, LinkError> {
        if let Some(hit) = dex_cache.resolved_field(idx) {
            return Ok(hit);
        }
        let dex = dex_cache.dex().clone();
        let field_def = dex.field(idx)?.clone();
        let klass = self.resolve_type(dex_cache, field_def.class, loader)?;

        // Same-container index probe, then the string-based walk that works
        // across containers.
        let mut resolved = find_field_by_idx(&klass, &dex, idx, is_static);
        if resolved.is_none() {
            let name = dex.string(field_def.name)?.clone();
            let descriptor = dex.type_descriptor(field_def.ty)?.clone();
            resolved = find_field_by_name(&klass, &name, &descriptor, is_static).or_else(|| {
                // The other kind is acceptable at resolution; the verifier
                // polices actual get/put compatibility.
                find_field_by_name(&klass, &name, &descriptor, !is_static)
            });
        }

        match resolved {
            Some(field) => {
                dex_cache.set_resolved_field(idx, field.clone());
                Ok(field)
            }
            None => Err(LinkError::NoSuchField {
                class: klass.descriptor().clone(),
                name: dex.string(field_def.name)?.clone(),
            }),
        }
    }
}

fn incompatible_kind_error(method: &MethodRef, expected: InvokeKind) -> LinkError {
    LinkError::IncompatibleClassChange {
        message: format!(
            "the method '{}' was expected to be of type {expected} but instead was found to be of type {}",
            method.pretty(),
            method.invoke_kind()
        ),
    }
}

fn find_field_by_idx(
    klass: &ClassRef,
    dex: &Arc<DexFile>,
    idx: FieldIdx,
    is_static: bool,
) -> Option<FieldRef> {
    let mut current = Some(klass.clone());
    while let Some(cur) = current {
        if let Some(field) = cur.find_declared_field_by_idx(dex, idx) {
            if field.is_static() == is_static {
                return Some(field);
            }
        }
        if is_static {
            let iftable = cur.iftable();
            for entry in &iftable.entries {
                if let Some(field) = entry.interface.find_declared_field_by_idx(dex, idx) {
                    if field.is_static() {
                        return Some(field);
                    }
                }
            }
        }
        current = cur.super_class();
    }
    None
}

fn find_field_by_name(
    klass: &ClassRef,
    name: &str,
    descriptor: &Descriptor,
    is_static: bool,
) -> Option<FieldRef> {
    if is_static {
        klass.find_static_field(name, descriptor)
    } else {
        klass.find_instance_field(name, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_base::descriptor::MethodProto;
    use ember_base::flags::MethodAccessFlags;

    fn method(flags: MethodAccessFlags, name: &str) -> MethodRef {
        Method::new(
            Arc::from(name),
            MethodProto::new([], Descriptor::parse("V").unwrap()),
            flags,
            None,
            None,
        )
    }

    use crate::testing;
    use ember_base::container::DexFileBuilder;
    use ember_base::flags::FieldAccessFlags;

    #[test]
    fn resolution_is_memoized_per_container() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("resolve.dex");
        let widget_type = b.add_type("Ltest/Widget;");
        let name_field = b.add_field("Ltest/Widget;", "Ljava/lang/String;", "name");
        let poke = b.add_method("Ltest/Widget;", "poke", "V", &[]);
        let hello = b.add_string("hello");
        b.class("Ltest/Widget;")
            .super_class("Ljava/lang/Object;")
            .instance_field("name", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)
            .virtual_method("poke", "V", &[], MethodAccessFlags::PUBLIC)
            .finish();
        let dex = b.build();
        linker.append_to_boot_class_path(&dex);
        let cache = linker.register_dex_file(&dex);

        let t1 = linker.resolve_type(&cache, widget_type, None).unwrap();
        let t2 = linker.resolve_type(&cache, widget_type, None).unwrap();
        assert!(Arc::ptr_eq(&t1, &t2));

        let m1 = linker
            .resolve_method(&cache, poke, None, InvokeKind::Virtual)
            .unwrap();
        let m2 = linker
            .resolve_method(&cache, poke, None, InvokeKind::Virtual)
            .unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));
        assert!(m1
            .declaring_class()
            .map_or(false, |c| Arc::ptr_eq(&c, &t1)));

        let f1 = linker.resolve_field(&cache, name_field, None, false).unwrap();
        let f2 = linker.resolve_field(&cache, name_field, None, false).unwrap();
        assert!(Arc::ptr_eq(&f1, &f2));

        let s1 = linker.resolve_string(&cache, hello).unwrap();
        let s2 = linker.resolve_string(&cache, hello).unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[test]
    fn kind_mismatch_names_the_other_kind() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("mismatch.dex");
        let run = b.add_method("Ltest/Tool;", "run", "V", &[]);
        let gone = b.add_method("Ltest/Tool;", "gone", "V", &[]);
        b.class("Ltest/Tool;")
            .super_class("Ljava/lang/Object;")
            .direct_method(
                "run",
                "V",
                &[],
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            )
            .finish();
        let dex = b.build();
        linker.append_to_boot_class_path(&dex);
        let cache = linker.register_dex_file(&dex);

        // The method exists, but as a static; a virtual-invoke resolution is
        // an incompatible class change naming the static kind.
        let err = linker
            .resolve_method(&cache, run, None, InvokeKind::Virtual)
            .expect_err("kind mismatch");
        match err {
            LinkError::IncompatibleClassChange { message } => {
                assert!(message.contains("static"), "message was {message:?}");
                assert!(message.contains("virtual"), "message was {message:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        // A genuinely absent method is no-such-method.
        let err = linker
            .resolve_method(&cache, gone, None, InvokeKind::Virtual)
            .expect_err("missing method");
        assert!(matches!(err, LinkError::NoSuchMethod { .. }));
    }

    #[test]
    fn field_resolution_falls_back_to_the_other_kind() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("fields.dex");
        let counter = b.add_field("Ltest/Holder;", "I", "counter");
        let missing = b.add_field("Ltest/Holder;", "I", "missing");
        b.class("Ltest/Holder;")
            .super_class("Ljava/lang/Object;")
            .static_field("counter", "I", FieldAccessFlags::PUBLIC)
            .finish();
        let dex = b.build();
        linker.append_to_boot_class_path(&dex);
        let cache = linker.register_dex_file(&dex);

        // An instance-flagged site still resolves the static field via the
        // instance-then-static order.
        let field = linker.resolve_field(&cache, counter, None, false).unwrap();
        assert!(field.is_static());

        let err = linker
            .resolve_field(&cache, missing, None, true)
            .expect_err("missing field");
        assert!(matches!(err, LinkError::NoSuchField { .. }));
    }

    #[test]
    fn missing_type_resolution_reports_no_class_def_found_with_cause() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("badref.dex");
        let ghost = b.add_type("Ltest/Ghost;");
        b.class("Ltest/User;").super_class("Ljava/lang/Object;").finish();
        let dex = b.build();
        linker.append_to_boot_class_path(&dex);
        let cache = linker.register_dex_file(&dex);
        let loader = crate::loader::ClassLoader::new("app", None);

        let err = linker
            .resolve_type(&cache, ghost, Some(&loader))
            .expect_err("ghost type");
        match err {
            LinkError::NoClassDefFound { cause, .. } => {
                assert!(matches!(
                    cause.as_deref(),
                    Some(LinkError::ClassNotFound { .. })
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn kind_mismatch_detection() {
        let static_method = method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "f",
        );
        assert!(!static_method.check_incompatible_class_change(InvokeKind::Static));
        assert!(static_method.check_incompatible_class_change(InvokeKind::Virtual));
        assert!(static_method.check_incompatible_class_change(InvokeKind::Direct));

        let private_method = method(MethodAccessFlags::PRIVATE, "g");
        assert!(!private_method.check_incompatible_class_change(InvokeKind::Direct));
        assert!(private_method.check_incompatible_class_change(InvokeKind::Virtual));

        let virtual_method = method(MethodAccessFlags::PUBLIC, "h");
        assert!(!virtual_method.check_incompatible_class_change(InvokeKind::Virtual));
        assert!(!virtual_method.check_incompatible_class_change(InvokeKind::Super));
        assert!(virtual_method.check_incompatible_class_change(InvokeKind::Static));
    }
}
