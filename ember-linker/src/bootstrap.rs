//! Bootstrap: hand-craft the self-referential root classes before any full
//! loading machinery exists, then re-run them through the normal path so
//! their constant pools are populated, checking record identity throughout.

use std::sync::Arc;

use ember_base::container::{DexFile, DexFileBuilder};
use ember_base::descriptor::{Descriptor, PrimitiveKind};
use ember_base::flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

use crate::class::{Class, ClassRef, ClassStatus, IfTable, IfTableEntry, ReferenceKind};
use crate::linker::ClassLinker;
use crate::LinkError;

/// Well-known class slots, installed during boot and read thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassRoot {
    JavaLangClass,
    JavaLangObject,
    ClassArrayClass,
    ObjectArrayClass,
    JavaLangString,
    JavaLangDexCache,
    JavaLangRefReference,
    JavaLangReflectAccessibleObject,
    JavaLangReflectConstructor,
    JavaLangReflectField,
    JavaLangReflectMethod,
    JavaLangReflectProxy,
    StringArrayClass,
    FieldArrayClass,
    MethodArrayClass,
    ConstructorArrayClass,
    JavaLangClassLoader,
    JavaLangThrowable,
    JavaLangClassNotFoundException,
    JavaLangStackTraceElement,
    StackTraceElementArrayClass,
    PrimitiveBoolean,
    PrimitiveByte,
    PrimitiveChar,
    PrimitiveShort,
    PrimitiveInt,
    PrimitiveLong,
    PrimitiveFloat,
    PrimitiveDouble,
    PrimitiveVoid,
    BooleanArrayClass,
    ByteArrayClass,
    CharArrayClass,
    ShortArrayClass,
    IntArrayClass,
    LongArrayClass,
    FloatArrayClass,
    DoubleArrayClass,
}
impl ClassRoot {
    pub const ALL: [ClassRoot; 38] = [
        ClassRoot::JavaLangClass,
        ClassRoot::JavaLangObject,
        ClassRoot::ClassArrayClass,
        ClassRoot::ObjectArrayClass,
        ClassRoot::JavaLangString,
        ClassRoot::JavaLangDexCache,
        ClassRoot::JavaLangRefReference,
        ClassRoot::JavaLangReflectAccessibleObject,
        ClassRoot::JavaLangReflectConstructor,
        ClassRoot::JavaLangReflectField,
        ClassRoot::JavaLangReflectMethod,
        ClassRoot::JavaLangReflectProxy,
        ClassRoot::StringArrayClass,
        ClassRoot::FieldArrayClass,
        ClassRoot::MethodArrayClass,
        ClassRoot::ConstructorArrayClass,
        ClassRoot::JavaLangClassLoader,
        ClassRoot::JavaLangThrowable,
        ClassRoot::JavaLangClassNotFoundException,
        ClassRoot::JavaLangStackTraceElement,
        ClassRoot::StackTraceElementArrayClass,
        ClassRoot::PrimitiveBoolean,
        ClassRoot::PrimitiveByte,
        ClassRoot::PrimitiveChar,
        ClassRoot::PrimitiveShort,
        ClassRoot::PrimitiveInt,
        ClassRoot::PrimitiveLong,
        ClassRoot::PrimitiveFloat,
        ClassRoot::PrimitiveDouble,
        ClassRoot::PrimitiveVoid,
        ClassRoot::BooleanArrayClass,
        ClassRoot::ByteArrayClass,
        ClassRoot::CharArrayClass,
        ClassRoot::ShortArrayClass,
        ClassRoot::IntArrayClass,
        ClassRoot::LongArrayClass,
        ClassRoot::FloatArrayClass,
        ClassRoot::DoubleArrayClass,
    ];
    pub const COUNT: usize = ClassRoot::ALL.len();

    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            ClassRoot::JavaLangClass => "Ljava/lang/Class;",
            ClassRoot::JavaLangObject => "Ljava/lang/Object;",
            ClassRoot::ClassArrayClass => "[Ljava/lang/Class;",
            ClassRoot::ObjectArrayClass => "[Ljava/lang/Object;",
            ClassRoot::JavaLangString => "Ljava/lang/String;",
            ClassRoot::JavaLangDexCache => "Ljava/lang/DexCache;",
            ClassRoot::JavaLangRefReference => "Ljava/lang/ref/Reference;",
            ClassRoot::JavaLangReflectAccessibleObject => {
                "Ljava/lang/reflect/AccessibleObject;"
            }
            ClassRoot::JavaLangReflectConstructor => "Ljava/lang/reflect/Constructor;",
            ClassRoot::JavaLangReflectField => "Ljava/lang/reflect/Field;",
            ClassRoot::JavaLangReflectMethod => "Ljava/lang/reflect/Method;",
            ClassRoot::JavaLangReflectProxy => "Ljava/lang/reflect/Proxy;",
            ClassRoot::StringArrayClass => "[Ljava/lang/String;",
            ClassRoot::FieldArrayClass => "[Ljava/lang/reflect/Field;",
            ClassRoot::MethodArrayClass => "[Ljava/lang/reflect/Method;",
            ClassRoot::ConstructorArrayClass => "[Ljava/lang/reflect/Constructor;",
            ClassRoot::JavaLangClassLoader => "Ljava/lang/ClassLoader;",
            ClassRoot::JavaLangThrowable => "Ljava/lang/Throwable;",
            ClassRoot::JavaLangClassNotFoundException => {
                "Ljava/lang/ClassNotFoundException;"
            }
            ClassRoot::JavaLangStackTraceElement => "Ljava/lang/StackTraceElement;",
            ClassRoot::StackTraceElementArrayClass => "[Ljava/lang/StackTraceElement;",
            ClassRoot::PrimitiveBoolean => "Z",
            ClassRoot::PrimitiveByte => "B",
            ClassRoot::PrimitiveChar => "C",
            ClassRoot::PrimitiveShort => "S",
            ClassRoot::PrimitiveInt => "I",
            ClassRoot::PrimitiveLong => "J",
            ClassRoot::PrimitiveFloat => "F",
            ClassRoot::PrimitiveDouble => "D",
            ClassRoot::PrimitiveVoid => "V",
            ClassRoot::BooleanArrayClass => "[Z",
            ClassRoot::ByteArrayClass => "[B",
            ClassRoot::CharArrayClass => "[C",
            ClassRoot::ShortArrayClass => "[S",
            ClassRoot::IntArrayClass => "[I",
            ClassRoot::LongArrayClass => "[J",
            ClassRoot::FloatArrayClass => "[F",
            ClassRoot::DoubleArrayClass => "[D",
        }
    }

    #[must_use]
    pub fn primitive(kind: PrimitiveKind) -> ClassRoot {
        match kind {
            PrimitiveKind::Boolean => ClassRoot::PrimitiveBoolean,
            PrimitiveKind::Byte => ClassRoot::PrimitiveByte,
            PrimitiveKind::Char => ClassRoot::PrimitiveChar,
            PrimitiveKind::Short => ClassRoot::PrimitiveShort,
            PrimitiveKind::Int => ClassRoot::PrimitiveInt,
            PrimitiveKind::Long => ClassRoot::PrimitiveLong,
            PrimitiveKind::Float => ClassRoot::PrimitiveFloat,
            PrimitiveKind::Double => ClassRoot::PrimitiveDouble,
            PrimitiveKind::Void => ClassRoot::PrimitiveVoid,
        }
    }
}
impl ClassLinker {
    /// The full no-image boot sequence. `boot_class_path` must contain the
    /// core container (see [`core_boot_container`]) or an equivalent.
    pub fn boot_without_image(
        &self,
        boot_class_path: Vec<Arc<DexFile>>,
    ) -> Result<(), LinkError> {
        tracing::info!("class linker boot (no image)");
        assert!(!self.is_init_done(), "boot ran twice");
        let config = self.config().clone();

        // The class of classes comes first; nothing can be allocated before
        // an object can name its own class. Its class pointer is itself.
        let java_lang_class = Class::alloc_class_class(
            Descriptor::parse("Ljava/lang/Class;")?,
            Class::size_without_statics(true, config.imt_size, 0, config.pointer_size),
        );
        java_lang_class.data().variable_size = true;

        let alloc = |descriptor: &str, component: Option<&ClassRef>| -> Result<ClassRef, LinkError> {
            let klass = Class::alloc(
                Descriptor::parse(descriptor)?,
                None,
                None,
                component.cloned(),
                Class::size_without_statics(false, 0, 0, config.pointer_size),
            );
            klass.set_class_of(&java_lang_class);
            Ok(klass)
        };

        // Class[] is needed for reflection support.
        let class_array_class = alloc("[Ljava/lang/Class;", Some(&java_lang_class))?;

        // The root object class, backfilled as the super of Class.
        let java_lang_object = alloc("Ljava/lang/Object;", None)?;
        java_lang_class.data().super_class = Some(java_lang_object.clone());
        java_lang_object.set_status(ClassStatus::Loaded);

        let object_array_class = alloc("[Ljava/lang/Object;", Some(&java_lang_object))?;

        // The char primitive early: strings carry char-array storage, and
        // the component width must be known before any string exists.
        let char_class = Class::alloc(
            Descriptor::parse("C")?,
            None,
            Some(PrimitiveKind::Char),
            None,
            Class::size_without_statics(false, 0, 0, config.pointer_size),
        );
        char_class.set_class_of(&java_lang_class);

        let char_array_class = alloc("[C", Some(&char_class))?;

        let java_lang_string = alloc("Ljava/lang/String;", None)?;
        java_lang_string.add_access_flags(ClassAccessFlags::STRING_CLASS);
        java_lang_string.data().variable_size = true;
        java_lang_string.set_status(ClassStatus::Resolved);

        let java_lang_ref_reference = alloc("Ljava/lang/ref/Reference;", None)?;
        java_lang_ref_reference.data().object_size = 4 * config.pointer_size;
        java_lang_ref_reference.set_status(ClassStatus::Resolved);

        // Save the work so far into the root vector.
        self.set_class_root(ClassRoot::JavaLangClass, &java_lang_class);
        self.set_class_root(ClassRoot::JavaLangObject, &java_lang_object);
        self.set_class_root(ClassRoot::ClassArrayClass, &class_array_class);
        self.set_class_root(ClassRoot::ObjectArrayClass, &object_array_class);
        self.set_class_root(ClassRoot::CharArrayClass, &char_array_class);
        self.set_class_root(ClassRoot::JavaLangString, &java_lang_string);
        self.set_class_root(ClassRoot::JavaLangRefReference, &java_lang_ref_reference);

        // The primitive type classes; char finishes after the boot class
        // path is in place.
        for kind in [
            PrimitiveKind::Boolean,
            PrimitiveKind::Byte,
            PrimitiveKind::Short,
            PrimitiveKind::Int,
            PrimitiveKind::Long,
            PrimitiveKind::Float,
            PrimitiveKind::Double,
            PrimitiveKind::Void,
        ] {
            let class = self.create_primitive_class(&java_lang_class, kind)?;
            self.set_class_root(ClassRoot::primitive(kind), &class);
        }

        // int[] and long[] back the constant-pool storage of a full runtime.
        let int_array_class = alloc("[I", self.try_class_root(ClassRoot::PrimitiveInt).as_ref())?;
        self.set_class_root(ClassRoot::IntArrayClass, &int_array_class);
        let long_array_class =
            alloc("[J", self.try_class_root(ClassRoot::PrimitiveLong).as_ref())?;
        self.set_class_root(ClassRoot::LongArrayClass, &long_array_class);

        // DexCache cannot come later: registering the boot class path
        // allocates caches.
        let java_lang_dex_cache = alloc("Ljava/lang/DexCache;", None)?;
        self.set_class_root(ClassRoot::JavaLangDexCache, &java_lang_dex_cache);
        java_lang_dex_cache.set_status(ClassStatus::Resolved);

        let string_array_class = alloc("[Ljava/lang/String;", Some(&java_lang_string))?;
        self.set_class_root(ClassRoot::StringArrayClass, &string_array_class);

        // Register the boot class path under the dex lock.
        assert!(!boot_class_path.is_empty(), "boot class path is empty");
        for dex in &boot_class_path {
            self.append_to_boot_class_path(dex);
        }

        // Run the char class through primitive initialization to finish it.
        self.initialize_primitive_class(&char_class)?;
        self.set_class_root(ClassRoot::PrimitiveChar, &char_class);

        // Object, String and DexCache are re-run through the full loading
        // path to populate their constant pools; this must give back the
        // hand-crafted records.
        java_lang_object.reset_for_reload();
        self.check_boot_identity(&java_lang_object, "Ljava/lang/Object;")?;
        java_lang_string.reset_for_reload();
        self.check_boot_identity(&java_lang_string, "Ljava/lang/String;")?;
        java_lang_dex_cache.reset_for_reload();
        self.check_boot_identity(&java_lang_dex_cache, "Ljava/lang/DexCache;")?;

        // The single shared iftable every array class carries. Cloneable and
        // Serializable have no super-interfaces, so the two entries are the
        // whole closure.
        let cloneable = self.find_system_class("Ljava/lang/Cloneable;")?;
        let serializable = self.find_system_class("Ljava/io/Serializable;")?;
        self.set_array_iftable(Arc::new(IfTable {
            entries: vec![
                IfTableEntry {
                    interface: cloneable.clone(),
                    methods: Vec::new(),
                },
                IfTableEntry {
                    interface: serializable.clone(),
                    methods: Vec::new(),
                },
            ],
        }));

        // Primitive array classes; these need Object's vtable.
        let array_roots = [
            (ClassRoot::BooleanArrayClass, "[Z"),
            (ClassRoot::ByteArrayClass, "[B"),
            (ClassRoot::CharArrayClass, "[C"),
            (ClassRoot::ShortArrayClass, "[S"),
            (ClassRoot::IntArrayClass, "[I"),
            (ClassRoot::LongArrayClass, "[J"),
            (ClassRoot::FloatArrayClass, "[F"),
            (ClassRoot::DoubleArrayClass, "[D"),
        ];
        for (root, descriptor) in array_roots {
            let class = self.find_system_class(descriptor)?;
            self.set_class_root(root, &class);
        }

        self.check_boot_identity(&class_array_class, "[Ljava/lang/Class;")?;
        self.check_boot_identity(&object_array_class, "[Ljava/lang/Object;")?;
        self.check_boot_identity(&string_array_class, "[Ljava/lang/String;")?;

        debug_assert!(class_array_class
            .direct_interfaces()
            .first()
            .map_or(false, |i| Arc::ptr_eq(i, &cloneable)));
        debug_assert!(object_array_class
            .direct_interfaces()
            .get(1)
            .map_or(false, |i| Arc::ptr_eq(i, &serializable)));

        // Class itself was defined while its array was; just check identity.
        self.check_boot_identity(&java_lang_class, "Ljava/lang/Class;")?;

        // Reflection roots.
        let accessible =
            self.find_system_class("Ljava/lang/reflect/AccessibleObject;")?;
        self.set_class_root(ClassRoot::JavaLangReflectAccessibleObject, &accessible);
        let proxy = self.find_system_class("Ljava/lang/reflect/Proxy;")?;
        self.set_class_root(ClassRoot::JavaLangReflectProxy, &proxy);
        let field = self.find_system_class("Ljava/lang/reflect/Field;")?;
        self.set_class_root(ClassRoot::JavaLangReflectField, &field);
        let field_array = self.find_system_class("[Ljava/lang/reflect/Field;")?;
        self.set_class_root(ClassRoot::FieldArrayClass, &field_array);
        let constructor = self.find_system_class("Ljava/lang/reflect/Constructor;")?;
        self.set_class_root(ClassRoot::JavaLangReflectConstructor, &constructor);
        let constructor_array =
            self.find_system_class("[Ljava/lang/reflect/Constructor;")?;
        self.set_class_root(ClassRoot::ConstructorArrayClass, &constructor_array);
        let method = self.find_system_class("Ljava/lang/reflect/Method;")?;
        self.set_class_root(ClassRoot::JavaLangReflectMethod, &method);
        let method_array = self.find_system_class("[Ljava/lang/reflect/Method;")?;
        self.set_class_root(ClassRoot::MethodArrayClass, &method_array);

        // Reference and its specially-flagged subclasses.
        java_lang_ref_reference.reset_for_reload();
        self.check_boot_identity(&java_lang_ref_reference, "Ljava/lang/ref/Reference;")?;
        for (descriptor, kind) in [
            ("Ljava/lang/ref/SoftReference;", ReferenceKind::Soft),
            ("Ljava/lang/ref/WeakReference;", ReferenceKind::Weak),
            ("Ljava/lang/ref/PhantomReference;", ReferenceKind::Phantom),
            ("Ljava/lang/ref/FinalizerReference;", ReferenceKind::Finalizer),
        ] {
            let class = self.find_system_class(descriptor)?;
            class.data().reference_kind = kind;
        }

        // The class loader class, flagged so instances can be recognized.
        let class_loader = self.find_system_class("Ljava/lang/ClassLoader;")?;
        class_loader.add_access_flags(ClassAccessFlags::CLASS_LOADER_CLASS);
        self.set_class_root(ClassRoot::JavaLangClassLoader, &class_loader);

        // Throwable and friends, as a convenience for the rest of the
        // runtime.
        let throwable = self.find_system_class("Ljava/lang/Throwable;")?;
        self.set_class_root(ClassRoot::JavaLangThrowable, &throwable);
        let cnfe = self.find_system_class("Ljava/lang/ClassNotFoundException;")?;
        self.set_class_root(ClassRoot::JavaLangClassNotFoundException, &cnfe);
        let stack_trace_element =
            self.find_system_class("Ljava/lang/StackTraceElement;")?;
        self.set_class_root(ClassRoot::JavaLangStackTraceElement, &stack_trace_element);
        let ste_array = self.find_system_class("[Ljava/lang/StackTraceElement;")?;
        self.set_class_root(ClassRoot::StackTraceElementArrayClass, &ste_array);

        // Void must be resolved in the core constant pool so reflection over
        // void methods behaves.
        {
            let dex_cache = java_lang_object
                .dex_cache()
                .ok_or(LinkError::MissingLoadedValue("core dex cache"))?;
            let void_idx = dex_cache
                .dex()
                .find_type_idx(&Descriptor::parse("V")?)
                .ok_or(LinkError::MissingLoadedValue("void type in core container"))?;
            let resolved = self.resolve_type(&dex_cache, void_idx, None)?;
            debug_assert!(Arc::ptr_eq(
                &resolved,
                &self.class_root(ClassRoot::PrimitiveVoid)
            ));
        }

        self.finish_init()
    }

    /// Re-run a hand-crafted record through find-class and require identity.
    fn check_boot_identity(&self, expected: &ClassRef, descriptor: &str) -> Result<(), LinkError> {
        let found = self.find_system_class(descriptor)?;
        if !Arc::ptr_eq(&found, expected) {
            return Err(LinkError::Linkage {
                message: format!("boot relink of {descriptor} produced a different record"),
            });
        }
        Ok(())
    }

    fn create_primitive_class(
        &self,
        java_lang_class: &ClassRef,
        kind: PrimitiveKind,
    ) -> Result<ClassRef, LinkError> {
        let klass = Class::alloc(
            Descriptor::from_primitive(kind),
            None,
            Some(kind),
            None,
            Class::size_without_statics(false, 0, 0, self.config().pointer_size),
        );
        klass.set_class_of(java_lang_class);
        self.initialize_primitive_class(&klass)?;
        Ok(klass)
    }

    /// Primitive classes carry no members and are born initialized.
    fn initialize_primitive_class(&self, klass: &ClassRef) -> Result<(), LinkError> {
        debug_assert!(klass.is_primitive());
        {
            let mut data = klass.data();
            data.access_flags =
                ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT;
            klass.set_status_locked(&mut data, ClassStatus::Initialized);
        }
        let existing = self.insert_class(klass);
        debug_assert!(existing.is_none(), "primitive class inserted twice");
        Ok(())
    }

    /// All roots present, slow paths disabled: normal loading from here on.
    fn finish_init(&self) -> Result<(), LinkError> {
        for root in ClassRoot::ALL {
            if self.try_class_root(root).is_none() {
                return Err(LinkError::MissingLoadedValue("class root missing after boot"));
            }
        }
        self.set_init_done();
        tracing::info!(
            "class linker boot complete; {} classes loaded",
            self.num_loaded_classes()
        );
        Ok(())
    }
}

/// The core boot container: the minimal closed set of system classes the
/// bootstrap and the tests need, built programmatically.
#[must_use]
pub fn core_boot_container() -> Arc<DexFile> {
    let mut b = DexFileBuilder::new("core.dex");
    let public = MethodAccessFlags::PUBLIC;
    let ctor = MethodAccessFlags::PUBLIC | MethodAccessFlags::CONSTRUCTOR;

    b.class("Ljava/lang/Object;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .direct_method("<init>", "V", &[], ctor)
        .virtual_method("equals", "Z", &["Ljava/lang/Object;"], public)
        .virtual_method("hashCode", "I", &[], public)
        .virtual_method("toString", "Ljava/lang/String;", &[], public)
        .virtual_method("clone", "Ljava/lang/Object;", &[], MethodAccessFlags::PROTECTED)
        .virtual_method("finalize", "V", &[], MethodAccessFlags::PROTECTED)
        .finish();

    b.class("Ljava/lang/Class;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
        .super_class("Ljava/lang/Object;")
        .instance_field("name", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)
        .virtual_method("getName", "Ljava/lang/String;", &[], public)
        .finish();

    b.class("Ljava/lang/Cloneable;")
        .access_flags(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        )
        .super_class("Ljava/lang/Object;")
        .finish();

    b.class("Ljava/io/Serializable;")
        .access_flags(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        )
        .super_class("Ljava/lang/Object;")
        .finish();

    b.class("Ljava/lang/String;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
        .super_class("Ljava/lang/Object;")
        .interface("Ljava/io/Serializable;")
        .instance_field("value", "[C", FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL)
        .instance_field("hash", "I", FieldAccessFlags::PRIVATE)
        .virtual_method("length", "I", &[], public)
        .virtual_method("charAt", "C", &["I"], public)
        .finish();

    b.class("Ljava/lang/DexCache;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
        .super_class("Ljava/lang/Object;")
        .instance_field("location", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)
        .instance_field("dexFile", "J", FieldAccessFlags::PRIVATE)
        .finish();

    // Reference: all fields are references, and referent stays last so the
    // scanner's special case holds.
    b.class("Ljava/lang/ref/Reference;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
        .super_class("Ljava/lang/Object;")
        .instance_field(
            "pendingNext",
            "Ljava/lang/ref/Reference;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field(
            "queue",
            "Ljava/lang/ref/ReferenceQueue;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field(
            "queueNext",
            "Ljava/lang/ref/Reference;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field("referent", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)
        .direct_method("<init>", "V", &["Ljava/lang/Object;"], ctor)
        .finish();

    for descriptor in [
        "Ljava/lang/ref/SoftReference;",
        "Ljava/lang/ref/WeakReference;",
        "Ljava/lang/ref/PhantomReference;",
    ] {
        b.class(descriptor)
            .access_flags(ClassAccessFlags::PUBLIC)
            .super_class("Ljava/lang/ref/Reference;")
            .direct_method("<init>", "V", &["Ljava/lang/Object;"], ctor)
            .finish();
    }
    b.class("Ljava/lang/ref/FinalizerReference;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
        .super_class("Ljava/lang/ref/Reference;")
        .instance_field("zombie", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)
        .direct_method("<init>", "V", &["Ljava/lang/Object;"], ctor)
        .finish();

    b.class("Ljava/lang/ClassLoader;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
        .super_class("Ljava/lang/Object;")
        .instance_field(
            "parent",
            "Ljava/lang/ClassLoader;",
            FieldAccessFlags::PRIVATE,
        )
        .virtual_method(
            "loadClass",
            "Ljava/lang/Class;",
            &["Ljava/lang/String;"],
            public,
        )
        .finish();

    b.class("Ljava/lang/Throwable;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Object;")
        .interface("Ljava/io/Serializable;")
        .instance_field(
            "detailMessage",
            "Ljava/lang/String;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field("cause", "Ljava/lang/Throwable;", FieldAccessFlags::PRIVATE)
        .instance_field(
            "stackTrace",
            "[Ljava/lang/StackTraceElement;",
            FieldAccessFlags::PRIVATE,
        )
        .direct_method("<init>", "V", &[], ctor)
        .direct_method("<init>", "V", &["Ljava/lang/String;"], ctor)
        .virtual_method("getMessage", "Ljava/lang/String;", &[], public)
        .finish();

    b.class("Ljava/lang/Exception;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Throwable;")
        .direct_method("<init>", "V", &["Ljava/lang/String;"], ctor)
        .finish();

    b.class("Ljava/lang/Error;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Throwable;")
        .direct_method("<init>", "V", &["Ljava/lang/String;"], ctor)
        .finish();

    b.class("Ljava/lang/ClassNotFoundException;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Exception;")
        .direct_method("<init>", "V", &["Ljava/lang/String;"], ctor)
        .finish();

    b.class("Ljava/lang/StackTraceElement;")
        .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
        .super_class("Ljava/lang/Object;")
        .instance_field(
            "declaringClass",
            "Ljava/lang/String;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field(
            "methodName",
            "Ljava/lang/String;",
            FieldAccessFlags::PRIVATE,
        )
        .instance_field("fileName", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)
        .instance_field("lineNumber", "I", FieldAccessFlags::PRIVATE)
        .finish();

    b.class("Ljava/lang/reflect/AccessibleObject;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Object;")
        .instance_field("override", "Z", FieldAccessFlags::PRIVATE)
        .finish();

    for descriptor in [
        "Ljava/lang/reflect/Field;",
        "Ljava/lang/reflect/Method;",
        "Ljava/lang/reflect/Constructor;",
    ] {
        b.class(descriptor)
            .access_flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .super_class("Ljava/lang/reflect/AccessibleObject;")
            .finish();
    }

    b.class("Ljava/lang/reflect/Proxy;")
        .access_flags(ClassAccessFlags::PUBLIC)
        .super_class("Ljava/lang/Object;")
        .instance_field(
            "h",
            "Ljava/lang/reflect/InvocationHandler;",
            FieldAccessFlags::PROTECTED,
        )
        .direct_method(
            "<init>",
            "V",
            &["Ljava/lang/reflect/InvocationHandler;"],
            ctor,
        )
        .finish();

    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn class_of_classes_is_self_referential() {
        let linker = testing::boot_linker();
        let class_class = linker.class_root(ClassRoot::JavaLangClass);
        let klass_of = class_class.class_of().expect("class pointer installed");
        assert!(Arc::ptr_eq(&klass_of, &class_class));
        // Everything else points at the class of classes.
        let object = linker.object_class();
        assert!(Arc::ptr_eq(&object.class_of().unwrap(), &class_class));
    }

    #[test]
    fn all_roots_are_installed_and_linked() {
        let linker = testing::boot_linker();
        for root in ClassRoot::ALL {
            let class = linker.class_root(root);
            assert_eq!(class.descriptor().as_str(), root.descriptor());
            assert!(
                class.is_resolved(),
                "{} not resolved after boot",
                root.descriptor()
            );
        }
        let class_class = linker.class_root(ClassRoot::JavaLangClass);
        assert!(Arc::ptr_eq(
            &class_class.super_class().unwrap(),
            &linker.object_class()
        ));
    }

    #[test]
    fn rerunning_roots_through_find_yields_identity() {
        let linker = testing::boot_linker();
        for descriptor in [
            "Ljava/lang/Object;",
            "Ljava/lang/Class;",
            "Ljava/lang/String;",
            "[C",
            "[I",
            "[Ljava/lang/Object;",
        ] {
            let first = linker.find_system_class(descriptor).unwrap();
            let second = linker.find_system_class(descriptor).unwrap();
            assert!(Arc::ptr_eq(&first, &second), "{descriptor} not stable");
        }
    }

    #[test]
    fn primitives_bypass_the_class_table() {
        let linker = testing::boot_linker();
        let int_class = linker.find_system_class("I").unwrap();
        assert!(int_class.is_primitive());
        assert!(int_class.is_initialized());
        assert!(Arc::ptr_eq(
            &int_class,
            &linker.class_root(ClassRoot::PrimitiveInt)
        ));
        assert!(linker.find_primitive_class_by_char('J').is_some());
        assert!(linker.find_primitive_class_by_char('Q').is_none());
    }

    #[test]
    fn arrays_share_the_single_iftable() {
        let linker = testing::boot_linker();
        let int_array = linker.find_system_class("[I").unwrap();
        let object_array = linker.find_system_class("[Ljava/lang/Object;").unwrap();
        let a = int_array.iftable();
        let b = object_array.iftable();
        assert!(Arc::ptr_eq(&a, &b), "array iftable is not shared");
        assert_eq!(a.count(), 2);
        assert_eq!(
            a.interface(0).descriptor().as_str(),
            "Ljava/lang/Cloneable;"
        );
        assert_eq!(
            a.interface(1).descriptor().as_str(),
            "Ljava/io/Serializable;"
        );
        // Arrays are born initialized, with the object vtable.
        assert!(int_array.is_initialized());
        assert_eq!(int_array.vtable().len(), linker.object_class().vtable().len());
    }

    #[test]
    fn reference_subclasses_carry_their_kinds() {
        let linker = testing::boot_linker();
        let cases = [
            ("Ljava/lang/ref/SoftReference;", ReferenceKind::Soft),
            ("Ljava/lang/ref/WeakReference;", ReferenceKind::Weak),
            ("Ljava/lang/ref/PhantomReference;", ReferenceKind::Phantom),
            ("Ljava/lang/ref/FinalizerReference;", ReferenceKind::Finalizer),
        ];
        for (descriptor, kind) in cases {
            let class = linker.find_system_class(descriptor).unwrap();
            assert_eq!(class.reference_kind(), kind, "{descriptor}");
        }
        let reference = linker.class_root(ClassRoot::JavaLangRefReference);
        assert_eq!(reference.reference_kind(), ReferenceKind::None);
        let string = linker.class_root(ClassRoot::JavaLangString);
        assert!(string
            .access_flags()
            .contains(ClassAccessFlags::STRING_CLASS));
    }

    #[test]
    fn root_visitation_short_circuits() {
        let linker = testing::boot_linker();
        let mut seen = 0usize;
        let completed = linker.visit_class_roots(&mut |_| {
            seen += 1;
            true
        });
        assert!(completed);
        assert_eq!(seen, ClassRoot::COUNT);

        let mut seen = 0usize;
        let completed = linker.visit_class_roots(&mut |_| {
            seen += 1;
            seen < 3
        });
        assert!(!completed);
        assert_eq!(seen, 3);
    }
}
