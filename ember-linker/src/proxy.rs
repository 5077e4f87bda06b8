//! Proxy class synthesis: class records fabricated outside the container
//! path, from a name, an interface list, and method prototypes.

use std::sync::Arc;

use ember_base::descriptor::Descriptor;
use ember_base::flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

use crate::bootstrap::ClassRoot;
use crate::class::{Class, ClassRef, ClassStatus};
use crate::field::Field;
use crate::linker::ClassLinker;
use crate::loader::LoaderRef;
use crate::method::{EntryPoint, Method, MethodRef};
use crate::value::Value;
use crate::LinkError;

impl ClassLinker {
    /// Fabricate a proxy class implementing `interfaces`, with one virtual
    /// method per prototype and the declared `throws` recorded alongside.
    pub fn create_proxy_class(
        &self,
        name: &str,
        interfaces: &[ClassRef],
        loader: Option<&LoaderRef>,
        methods: &[MethodRef],
        throws: &[Vec<ClassRef>],
    ) -> Result<ClassRef, LinkError> {
        debug_assert_eq!(methods.len(), throws.len());
        let config = self.config();
        let proxy_base = self.class_root(ClassRoot::JavaLangReflectProxy);
        let descriptor = Descriptor::from_dotted(name);

        // Proxies are born at the statically-known proxy class size and
        // retire into a final-sized record during linking like any other
        // embedded-table class.
        let klass = Class::alloc(
            descriptor.clone(),
            loader.cloned(),
            None,
            None,
            Class::size_without_statics(false, 0, 0, config.pointer_size),
        );
        klass.set_class_of(&self.class_class());
        {
            let mut data = klass.data();
            data.access_flags = ClassAccessFlags::PROXY
                | ClassAccessFlags::PUBLIC
                | ClassAccessFlags::FINAL
                | ClassAccessFlags::PREVERIFIED;
            data.dex_cache = proxy_base.dex_cache();
            data.is_temp = self.is_init_done() && config.embed_tables;
            data.clinit_thread = Some(std::thread::current().id());
            klass.set_status_locked(&mut data, ClassStatus::Idx);
        }

        // Insert before loading members so the field and method
        // declaring-class back-references point at a table-visible record.
        if let Some(_existing) = self.insert_class(&klass) {
            return Err(LinkError::Linkage {
                message: format!("proxy class {name} already defined"),
            });
        }

        // Two static fields: the declared interfaces (so reflection does not
        // hand back the flattened closure) and the declared throws.
        let sfield_flags =
            FieldAccessFlags::STATIC | FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL;
        let interfaces_field = Field::new(
            Arc::from("interfaces"),
            Descriptor::parse("[Ljava/lang/Class;")?,
            sfield_flags,
            None,
            None,
        );
        interfaces_field.set_declaring_class(&klass);
        let throws_field = Field::new(
            Arc::from("throws"),
            Descriptor::parse("[[Ljava/lang/Class;")?,
            sfield_flags,
            None,
            None,
        );
        throws_field.set_declaring_class(&klass);

        // One direct method: the constructor, cloned from the proxy base
        // class and flipped public.
        let constructor = self.create_proxy_constructor(&klass, &proxy_base)?;

        // One virtual method per prototype, final and concrete, routed to
        // the invocation handler.
        let mut virtual_methods = Vec::with_capacity(methods.len());
        for prototype in methods {
            virtual_methods.push(create_proxy_method(&klass, prototype));
        }

        {
            let mut data = klass.data();
            data.static_fields = vec![interfaces_field.clone(), throws_field.clone()];
            data.static_values = vec![Value::Null, Value::Null];
            data.direct_methods = vec![constructor];
            data.virtual_methods = virtual_methods;
            data.super_class = Some(proxy_base.clone());
            data.direct_interfaces = interfaces.to_vec();
            klass.set_status_locked(&mut data, ClassStatus::Loaded);
        }

        // Link through the ordinary machinery; the proxy's interface list
        // rides in as the override.
        let new_class = match self.link_class(&klass, Some(interfaces)) {
            Ok(new_class) => new_class,
            Err(err) => {
                klass.set_erroneous(&err);
                return Err(err);
            }
        };
        debug_assert!(!self.is_init_done() || !config.embed_tables || klass.is_retired());

        // The declared lists live in the two static fields.
        new_class.set_static_value(
            0,
            Value::Array(interfaces.iter().cloned().map(Value::Type).collect()),
        );
        new_class.set_static_value(
            1,
            Value::Array(
                throws
                    .iter()
                    .map(|row| Value::Array(row.iter().cloned().map(Value::Type).collect()))
                    .collect(),
            ),
        );

        new_class.set_status(ClassStatus::Initialized);

        if cfg!(debug_assertions) {
            check_proxy_class(&new_class, methods);
        }
        Ok(new_class)
    }

    fn create_proxy_constructor(
        &self,
        klass: &ClassRef,
        proxy_base: &ClassRef,
    ) -> Result<MethodRef, LinkError> {
        let base_constructor = proxy_base
            .direct_methods()
            .into_iter()
            .find(|m| m.is_constructor())
            .ok_or(LinkError::MissingLoadedValue("proxy base constructor"))?;
        let constructor = Method::copy_of(&base_constructor, MethodAccessFlags::empty());
        // The base constructor is protected; the clone must be callable.
        constructor.clear_access_flags(
            MethodAccessFlags::PROTECTED | MethodAccessFlags::PRIVATE,
        );
        constructor.add_access_flags(MethodAccessFlags::PUBLIC);
        constructor.set_declaring_class(klass);
        self.link_code(&constructor);
        Ok(constructor)
    }

    /// The concrete method backing a proxy's interface method, given the
    /// proxy dispatch record. Searches the declared interfaces (and their
    /// supers via the flattened table).
    #[must_use]
    pub fn find_method_for_proxy(
        &self,
        proxy_class: &ClassRef,
        proxy_method: &MethodRef,
    ) -> Option<MethodRef> {
        debug_assert!(proxy_class.is_proxy());
        let iftable = proxy_class.iftable();
        for entry in &iftable.entries {
            if let (Some(dex), Some(idx)) = (proxy_method.dex(), proxy_method.method_idx()) {
                if let Some(found) = entry.interface.find_declared_virtual_method_by_idx(dex, idx)
                {
                    return Some(found);
                }
            }
            if let Some(found) = entry
                .interface
                .find_declared_virtual_method(proxy_method.name(), proxy_method.proto())
            {
                return Some(found);
            }
        }
        None
    }

    /// Canonical descriptor of a proxy class from its dotted name.
    #[must_use]
    pub fn proxy_descriptor(name: &str) -> Descriptor {
        Descriptor::from_dotted(name)
    }
}

fn create_proxy_method(klass: &ClassRef, prototype: &MethodRef) -> MethodRef {
    // The copy inherits the prototype's constant-pool references, so
    // resolution against the interface's container still works.
    let method = Method::copy_of(prototype, MethodAccessFlags::empty());
    method.add_access_flags(MethodAccessFlags::FINAL);
    method.clear_access_flags(MethodAccessFlags::ABSTRACT | MethodAccessFlags::DEFAULT);
    method.set_declaring_class(klass);
    method.set_entry_point(EntryPoint::ProxyInvoke);
    method
}

fn check_proxy_class(klass: &ClassRef, prototypes: &[MethodRef]) {
    debug_assert!(klass.instance_fields().is_empty());
    let constructor = &klass.direct_methods()[0];
    debug_assert!(constructor.is_constructor());
    debug_assert!(constructor.access_flags().is_public());
    // Iterate the prototypes cleanly, one virtual method each.
    let virtuals = klass.virtual_methods();
    for (method, prototype) in virtuals.iter().zip(prototypes) {
        debug_assert!(method.has_same_name_and_signature(prototype));
        debug_assert!(method.access_flags().is_final());
        debug_assert!(!method.access_flags().is_abstract());
        debug_assert_eq!(method.entry_point(), EntryPoint::ProxyInvoke);
    }
}
