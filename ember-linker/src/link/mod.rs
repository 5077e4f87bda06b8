//! Class definition and linking: from a class-definition record to a
//! *resolved* class with dispatch tables and field offsets.

pub(crate) mod fields;
pub(crate) mod methods;

use std::sync::Arc;

use ember_base::container::{ClassDef, ClassDefIdx, DexFile};
use ember_base::descriptor::Descriptor;
use ember_base::flags::ClassAccessFlags;

use crate::bootstrap::ClassRoot;
use crate::class::{Class, ClassRef, ClassStatus, EmbeddedTables};
use crate::dex_cache::DexCache;
use crate::field::Field;
use crate::linker::ClassLinker;
use crate::loader::LoaderRef;
use crate::method::{EntryPoint, Method, MethodRef};
use crate::util::NoSuspendScope;
use crate::value::Value;
use crate::LinkError;

/// Runtime-only class bits that survive a reload of a hand-crafted root.
const RUNTIME_CLASS_BITS: ClassAccessFlags = ClassAccessFlags::PROXY
    .union(ClassAccessFlags::PREVERIFIED)
    .union(ClassAccessFlags::HAS_DEFAULT_METHODS)
    .union(ClassAccessFlags::RECURSIVELY_INITIALIZED)
    .union(ClassAccessFlags::STRING_CLASS)
    .union(ClassAccessFlags::CLASS_LOADER_CLASS)
    .union(ClassAccessFlags::FINALIZABLE);

impl ClassLinker {
    /// Define a class from a container's class-definition record: allocate
    /// (or, during bootstrap, adopt the hand-crafted root), install in the
    /// table, load members, resolve supers, and link.
    pub fn define_class(
        &self,
        descriptor: &Descriptor,
        loader: Option<&LoaderRef>,
        dex: &Arc<DexFile>,
        def_idx: ClassDefIdx,
    ) -> Result<ClassRef, LinkError> {
        let dex_cache = self.register_dex_file(dex);
        let def = dex.class_def(def_idx)?.clone();

        let klass = match self.boot_root_for_descriptor(descriptor) {
            Some(root) => root,
            None => {
                let config = self.config();
                let instantiable =
                    !def.access_flags.is_interface() && !def.access_flags.is_abstract();
                let klass = Class::alloc(
                    descriptor.clone(),
                    loader.cloned(),
                    None,
                    None,
                    Class::size_without_statics(false, 0, 0, config.pointer_size),
                );
                klass.data().is_temp =
                    self.is_init_done() && config.embed_tables && instantiable;
                klass
            }
        };
        if let Some(class_class) = self.try_class_root(ClassRoot::JavaLangClass) {
            klass.set_class_of(&class_class);
        }
        self.setup_class(&klass, &def, &dex_cache, def_idx);

        if let Some(existing) = self.insert_class(&klass) {
            // Raced with another definition; surrender ours and adopt the
            // winner once it finishes resolving.
            return self.ensure_resolved(existing, descriptor);
        }

        let result = self
            .load_class_members(&klass, dex, &def)
            .and_then(|()| self.load_super_and_interfaces(&klass, &dex_cache, &def))
            .and_then(|()| self.link_class(&klass, None));
        match result {
            Ok(new_class) => Ok(new_class),
            Err(err) => {
                klass.set_erroneous(&err);
                Err(err)
            }
        }
    }

    /// Hand-crafted roots are adopted instead of re-allocated while boot is
    /// still in flight, so re-running them through the loading path yields
    /// record identity.
    fn boot_root_for_descriptor(&self, descriptor: &Descriptor) -> Option<ClassRef> {
        if self.is_init_done() {
            return None;
        }
        let root = match descriptor.as_str() {
            "Ljava/lang/Object;" => ClassRoot::JavaLangObject,
            "Ljava/lang/Class;" => ClassRoot::JavaLangClass,
            "Ljava/lang/String;" => ClassRoot::JavaLangString,
            "Ljava/lang/DexCache;" => ClassRoot::JavaLangDexCache,
            "Ljava/lang/ref/Reference;" => ClassRoot::JavaLangRefReference,
            _ => return None,
        };
        self.try_class_root(root)
    }

    /// Descriptor, loader, flags, and constant pool: the *idx* state.
    fn setup_class(
        &self,
        klass: &ClassRef,
        def: &ClassDef,
        dex_cache: &Arc<DexCache>,
        def_idx: ClassDefIdx,
    ) {
        let mut data = klass.data();
        data.access_flags = def.access_flags | (data.access_flags & RUNTIME_CLASS_BITS);
        data.dex_cache = Some(dex_cache.clone());
        data.class_def = Some(def_idx);
        data.variable_size =
            data.variable_size || klass.descriptor().as_str() == "Ljava/lang/String;";
        // Recorded so a re-entrant resolution of this class on the same
        // thread is caught as a circularity instead of deadlocking.
        data.clinit_thread = Some(std::thread::current().id());
        klass.set_status_locked(&mut data, ClassStatus::Idx);
    }

    /// Create the field and method records. The arrays are installed into
    /// the class in the same no-suspend region they are built in.
    fn load_class_members(
        &self,
        klass: &ClassRef,
        dex: &Arc<DexFile>,
        def: &ClassDef,
    ) -> Result<(), LinkError> {
        let _no_suspend = NoSuspendScope::new("member arrays not yet reachable from their class");

        let load_fields = |entries: &[ember_base::container::ClassFieldEntry]| {
            entries
                .iter()
                .map(|entry| {
                    let field_def = dex.field(entry.field)?;
                    let name = dex.string(field_def.name)?.clone();
                    let descriptor = dex.type_descriptor(field_def.ty)?.clone();
                    let field = Field::new(
                        name,
                        descriptor,
                        entry.access_flags,
                        Some(dex.clone()),
                        Some(entry.field),
                    );
                    field.set_declaring_class(klass);
                    Ok(field)
                })
                .collect::<Result<Vec<_>, LinkError>>()
        };
        let static_fields = load_fields(&def.static_fields)?;
        let instance_fields = load_fields(&def.instance_fields)?;
        let static_values: Vec<Value> = static_fields
            .iter()
            .map(|f| Value::default_for(f.descriptor()))
            .collect();

        let load_methods = |entries: &[ember_base::container::ClassMethodEntry]| {
            entries
                .iter()
                .map(|entry| {
                    let name = dex.method_name(entry.method)?.clone();
                    let proto = dex.method_proto(entry.method)?;
                    let method = Method::new(
                        name,
                        proto,
                        entry.access_flags,
                        Some(dex.clone()),
                        Some(entry.method),
                    );
                    method.set_declaring_class(klass);
                    self.link_code(&method);
                    Ok(method)
                })
                .collect::<Result<Vec<_>, LinkError>>()
        };
        let direct_methods = load_methods(&def.direct_methods)?;
        let virtual_methods = load_methods(&def.virtual_methods)?;

        let mut data = klass.data();
        data.static_fields = static_fields;
        data.instance_fields = instance_fields;
        data.static_values = static_values;
        data.direct_methods = direct_methods;
        data.virtual_methods = virtual_methods;
        Ok(())
    }

    /// Entry-point assignment policy.
    pub(crate) fn link_code(&self, method: &MethodRef) {
        let flags = method.access_flags();
        let entry = if flags.is_abstract() {
            EntryPoint::InterpreterBridge
        } else if self.config().instrumentation_forces_interpreter && !flags.is_native() {
            EntryPoint::InterpreterBridge
        } else if flags.is_static() && !method.is_class_initializer() {
            // Replaced once the declaring class reaches *initialized*.
            EntryPoint::ResolutionTrampoline
        } else if flags.is_native() {
            match self.code_source.compiled_code_for(method) {
                Some(code) => EntryPoint::Compiled(code),
                None => EntryPoint::NativeBridge,
            }
        } else {
            match self.code_source.compiled_code_for(method) {
                Some(code) => EntryPoint::Compiled(code),
                None => EntryPoint::InterpreterBridge,
            }
        };
        method.set_entry_point(entry);
    }

    /// Resolve the superclass and the directly implemented interfaces; the
    /// *loaded* state.
    fn load_super_and_interfaces(
        &self,
        klass: &ClassRef,
        dex_cache: &Arc<DexCache>,
        def: &ClassDef,
    ) -> Result<(), LinkError> {
        if let Some(super_idx) = def.superclass {
            let super_class = self.resolve_type(dex_cache, super_idx, klass.loader().as_ref())?;
            if super_class.is_interface() {
                return Err(LinkError::Linkage {
                    message: format!(
                        "class {} extends interface {}",
                        klass.descriptor().pretty(),
                        super_class.descriptor().pretty()
                    ),
                });
            }
            if !klass.can_access(&super_class) {
                return Err(LinkError::IllegalAccess {
                    message: format!(
                        "class {} cannot access its superclass {}",
                        klass.descriptor().pretty(),
                        super_class.descriptor().pretty()
                    ),
                });
            }
            klass.data().super_class = Some(super_class);
        }
        let mut direct_interfaces = Vec::with_capacity(def.interfaces.len());
        for interface_idx in &def.interfaces {
            let interface = self.resolve_type(dex_cache, *interface_idx, klass.loader().as_ref())?;
            if !klass.can_access(&interface) {
                return Err(LinkError::IllegalAccess {
                    message: format!(
                        "class {} cannot access its interface {}",
                        klass.descriptor().pretty(),
                        interface.descriptor().pretty()
                    ),
                });
            }
            direct_interfaces.push(interface);
        }
        let mut data = klass.data();
        data.direct_interfaces = direct_interfaces;
        klass.set_status_locked(&mut data, ClassStatus::Loaded);
        Ok(())
    }

    /// Super-class structural checks.
    fn link_super_class(&self, klass: &ClassRef) -> Result<(), LinkError> {
        let super_class = klass.super_class();
        let Some(super_class) = super_class else {
            // Only the root object class goes without a superclass.
            if klass.descriptor().as_str() != "Ljava/lang/Object;" {
                return Err(LinkError::Linkage {
                    message: format!(
                        "no superclass defined for {}",
                        klass.descriptor().pretty()
                    ),
                });
            }
            return Ok(());
        };
        if klass.is_interface() && !Arc::ptr_eq(&super_class, &self.object_class()) {
            return Err(LinkError::ClassFormat {
                message: format!(
                    "interface {} has superclass {}",
                    klass.descriptor().pretty(),
                    super_class.descriptor().pretty()
                ),
            });
        }
        debug_assert!(super_class.is_resolved());
        let super_flags = super_class.access_flags();
        // A super that turned final or interface since compilation is an
        // incompatible change.
        if super_flags.is_final() {
            return Err(LinkError::IncompatibleClassChange {
                message: format!(
                    "superclass {} of {} is final",
                    super_class.descriptor().pretty(),
                    klass.descriptor().pretty()
                ),
            });
        }
        if super_flags.is_interface() {
            return Err(LinkError::IncompatibleClassChange {
                message: format!(
                    "superclass {} of {} is an interface",
                    super_class.descriptor().pretty(),
                    klass.descriptor().pretty()
                ),
            });
        }
        Ok(())
    }

    /// Link a *loaded* class: supers, dispatch tables, field layout, and
    /// either in-place promotion to *resolved* or retirement of the temp
    /// record into a final-sized one.
    pub(crate) fn link_class(
        &self,
        klass: &ClassRef,
        interfaces_override: Option<&[ClassRef]>,
    ) -> Result<ClassRef, LinkError> {
        debug_assert_eq!(klass.status(), ClassStatus::Loaded);
        klass.set_status(ClassStatus::Resolving);

        self.link_super_class(klass)?;
        methods::link_methods(self, klass, interfaces_override)?;
        fields::link_fields(self, klass, false)?;
        fields::link_fields(self, klass, true)?;
        fields::create_reference_instance_offsets(self, klass);

        if !klass.is_temp() {
            // No embedded tables needed, or the record was allocated at its
            // final size during bootstrap.
            if self.config().embed_tables && klass.should_have_embedded_tables() {
                populate_embedded_tables(self, klass);
            }
            // This notifies waiters that saw the not-yet-resolved class in
            // the table during ensure-resolved.
            klass.set_status(ClassStatus::Resolved);
            return Ok(klass.clone());
        }
        self.retire_temp_class(klass)
    }

    /// The move-with-translation step: copy the temp record into a
    /// final-sized one, migrate every member's declaring-class reference,
    /// swap the table entry, retire the temp (waking its waiters).
    fn retire_temp_class(&self, temp: &ClassRef) -> Result<ClassRef, LinkError> {
        debug_assert!(!temp.is_resolved());
        let new_class = Class::alloc(
            temp.descriptor().clone(),
            temp.loader(),
            temp.primitive_kind(),
            temp.component_type().cloned(),
            0,
        );
        if let Some(class_class) = self.try_class_root(ClassRoot::JavaLangClass) {
            new_class.set_class_of(&class_class);
        }
        {
            let _no_suspend = NoSuspendScope::new("migrating class record to final size");
            let mut temp_data = temp.data();
            {
                let mut data = new_class.data();
                data.status = ClassStatus::Resolving;
                data.access_flags = temp_data.access_flags;
                data.reference_kind = temp_data.reference_kind;
                data.super_class = temp_data.super_class.clone();
                data.direct_interfaces = temp_data.direct_interfaces.clone();
                data.dex_cache = temp_data.dex_cache.clone();
                data.class_def = temp_data.class_def;
                data.iftable = temp_data.iftable.clone();
                data.vtable = temp_data.vtable.clone();
                data.imt = temp_data.imt.clone();
                data.direct_methods = std::mem::take(&mut temp_data.direct_methods);
                data.virtual_methods = std::mem::take(&mut temp_data.virtual_methods);
                data.instance_fields = std::mem::take(&mut temp_data.instance_fields);
                data.static_fields = std::mem::take(&mut temp_data.static_fields);
                data.static_values = std::mem::take(&mut temp_data.static_values);
                data.object_size = temp_data.object_size;
                data.class_size = temp_data.class_size;
                data.num_reference_instance_fields = temp_data.num_reference_instance_fields;
                data.num_reference_static_fields = temp_data.num_reference_static_fields;
                data.reference_offsets = temp_data.reference_offsets;
                data.variable_size = temp_data.variable_size;
                data.is_temp = false;
                // The temp must not keep aliases of the member arrays; a
                // scanner finding the same array from two class records
                // would double-visit.
                temp_data.iftable = Arc::default();
                temp_data.vtable = Arc::default();
                temp_data.imt = Arc::default();
            }
            // Migrate every member's back-reference to the final record.
            let new_data = new_class.data();
            for method in new_data
                .direct_methods
                .iter()
                .chain(new_data.virtual_methods.iter())
            {
                method.set_declaring_class(&new_class);
            }
            for field in new_data
                .instance_fields
                .iter()
                .chain(new_data.static_fields.iter())
            {
                field.set_declaring_class(&new_class);
            }
        }
        if self.config().embed_tables && new_class.should_have_embedded_tables() {
            populate_embedded_tables(self, &new_class);
        }

        {
            let mut tables = self.tables_write();
            let displaced = tables.table_mut(new_class.loader().as_ref()).update(&new_class);
            debug_assert!(displaced.map_or(false, |old| Arc::ptr_eq(&old, temp)));
        }
        // Waiters on the temp relocate through the table; waiters on the new
        // record see it resolved.
        temp.set_status(ClassStatus::Retired);
        new_class.set_status(ClassStatus::Resolved);
        Ok(new_class)
    }
}

/// Copy the imt and the leading vtable entries inline.
pub(crate) fn populate_embedded_tables(linker: &ClassLinker, klass: &ClassRef) {
    let config = linker.config();
    let mut data = klass.data();
    let embedded = EmbeddedTables {
        imt: data.imt.as_ref().clone(),
        vtable: data
            .vtable
            .iter()
            .take(config.embedded_vtable_limit)
            .cloned()
            .collect(),
    };
    data.embedded = Some(embedded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use ember_base::container::DexFileBuilder;
    use ember_base::flags::MethodAccessFlags;

    #[test]
    fn entry_point_policy_and_static_fixup() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("entry.dex");
        b.class("Ltest/Entry;")
            .super_class("Ljava/lang/Object;")
            .direct_method(
                "helper",
                "V",
                &[],
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            )
            .direct_method(
                "probe",
                "V",
                &[],
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
            )
            .virtual_method("touch", "V", &[], MethodAccessFlags::PUBLIC)
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let entry = testing::find(&linker, "Ltest/Entry;");
        let method = |name: &str| {
            entry
                .direct_methods()
                .into_iter()
                .chain(entry.virtual_methods())
                .find(|m| &**m.name() == name)
                .unwrap()
        };
        // Statics park on the trampoline until the class initializes.
        assert!(method("helper").entry_point().is_resolution_trampoline());
        assert!(method("probe").entry_point().is_resolution_trampoline());
        assert!(method("touch").entry_point().is_interpreter_bridge());

        assert!(matches!(linker.ensure_initialized(&entry, true, true), Ok(true)));
        assert!(method("helper").entry_point().is_interpreter_bridge());
        assert!(method("probe").entry_point().is_native_bridge());
    }

    #[test]
    fn post_boot_classes_retire_their_temp_records() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("temp.dex");
        b.class("Ltest/Temp;")
            .super_class("Ljava/lang/Object;")
            .virtual_method("go", "V", &[], MethodAccessFlags::PUBLIC)
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let final_class = testing::find(&linker, "Ltest/Temp;");
        assert!(!final_class.is_temp());
        assert!(final_class.is_resolved());
        // The final record carries the inline tables and owns its members.
        {
            let data = final_class.data();
            let embedded = data.embedded.as_ref().expect("embedded tables");
            assert_eq!(embedded.imt.len(), linker.config().imt_size);
            assert_eq!(embedded.vtable.len(), data.vtable.len());
        }
        for method in final_class
            .direct_methods()
            .into_iter()
            .chain(final_class.virtual_methods())
        {
            let declaring = method.declaring_class().expect("declaring");
            assert!(Arc::ptr_eq(&declaring, &final_class));
        }
        // The table answers with the final record, not the retired temp.
        let looked_up = testing::find(&linker, "Ltest/Temp;");
        assert!(Arc::ptr_eq(&looked_up, &final_class));
    }

    #[test]
    fn abstract_methods_bridge_to_the_interpreter() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("abs.dex");
        b.class("Ltest/Abs;")
            .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .super_class("Ljava/lang/Object;")
            .virtual_method(
                "todo",
                "V",
                &[],
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            )
            .finish();
        linker.append_to_boot_class_path(&b.build());
        let abs = testing::find(&linker, "Ltest/Abs;");
        let todo = abs.virtual_methods().first().cloned().unwrap();
        assert!(todo.entry_point().is_interpreter_bridge());
        // Abstract classes carry no embedded tables.
        assert!(abs.data().embedded.is_none());
    }
}
