//! The initialization protocol: `<clinit>` ordering, per-class monitors,
//! recursive and concurrent entry, default-interface initialization, and
//! sticky failure recording. See JLS 12.4.2 for the locking protocol this
//! follows.

use std::sync::{Arc, MutexGuard};

use ember_base::container::EncodedValue;
use ember_base::flags::ClassAccessFlags;

use crate::class::{ClassData, ClassRef, ClassStatus};
use crate::dex_cache::DexCache;
use crate::linker::ClassLinker;
use crate::method::EntryPoint;
use crate::util;
use crate::value::Value;
use crate::{LinkError, ThrownException};

impl ClassLinker {
    /// Public surface: returns `Ok(true)` once the class is initialized,
    /// `Ok(false)` when the caller's restrictions (no statics / no parents)
    /// decline the work, and `Err` on real failure.
    pub fn ensure_initialized(
        &self,
        klass: &ClassRef,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> Result<bool, LinkError> {
        if klass.is_initialized() {
            return Ok(true);
        }
        self.initialize_class(klass, can_init_fields, can_init_parents)
    }

    /// The fast-fail guard: without statics or parents allowed, anything
    /// that would require running user code declines before taking a lock.
    fn can_initialize(
        &self,
        klass: &ClassRef,
        can_init_statics: bool,
        can_init_parents: bool,
    ) -> bool {
        if can_init_statics && can_init_parents {
            return true;
        }
        if !can_init_statics {
            if klass.find_class_initializer().is_some() {
                return false;
            }
            if !klass.static_fields().is_empty() && self.has_encoded_statics(klass) {
                return false;
            }
            if !klass.is_interface() {
                let iftable = klass.iftable();
                for entry in &iftable.entries {
                    if entry.interface.has_default_methods()
                        && !self.can_initialize(&entry.interface, can_init_statics, can_init_parents)
                    {
                        return false;
                    }
                }
            }
        }
        if klass.is_interface() {
            return true;
        }
        let Some(super_class) = klass.super_class() else {
            return true;
        };
        if !can_init_parents && !super_class.is_initialized() {
            return false;
        }
        self.can_initialize(&super_class, can_init_statics, can_init_parents)
    }

    fn has_encoded_statics(&self, klass: &ClassRef) -> bool {
        let data = klass.data();
        let (Some(cache), Some(def_idx)) = (&data.dex_cache, data.class_def) else {
            return false;
        };
        cache
            .dex()
            .class_def(def_idx)
            .map_or(false, |def| !def.static_values.is_empty())
    }

    pub(crate) fn initialize_class(
        &self,
        klass: &ClassRef,
        can_init_statics: bool,
        can_init_parents: bool,
    ) -> Result<bool, LinkError> {
        // An initialized class never changes state again; no lock needed.
        if klass.is_initialized() {
            return Ok(true);
        }
        if !self.can_initialize(klass, can_init_statics, can_init_parents) {
            return Ok(false);
        }
        util::allow_thread_suspension();

        loop {
            let mut data = klass.data();
            // Re-check under the lock in case another thread got ahead of us.
            match data.status {
                ClassStatus::Initialized => return Ok(true),
                ClassStatus::Erroneous => {
                    let err = klass.erroneous_error_locked(&data);
                    tracing::debug!(
                        "initialization of {} failed earlier: {err}",
                        klass.descriptor().pretty()
                    );
                    return Err(err);
                }
                _ => {}
            }
            debug_assert!(
                data.status.is_resolved(),
                "initializing {} in state {:?}",
                klass.descriptor().pretty(),
                data.status
            );

            if !data.status.is_verified() {
                drop(data);
                self.verify_class(klass)?;
                if !klass.status().is_verified() {
                    // Soft failure parked for a runtime retry; only the AOT
                    // path gets here.
                    debug_assert!(self.config().aot_mode);
                    return Ok(false);
                }
                continue;
            }

            if data.status == ClassStatus::Initializing {
                // Somebody is initializing: higher up our own stack, or on
                // another thread.
                if data.clinit_thread == Some(std::thread::current().id()) {
                    // Recursive entry during <clinit> is benign.
                    return Ok(true);
                }
                return self.wait_for_initialize_class(klass, data);
            }

            // Cross-loader agreement on inherited signatures is checked on
            // the initialization edge, without the monitor held.
            drop(data);
            if let Err(err) = self.validate_super_class_descriptors(klass) {
                klass.set_erroneous(&err);
                return Err(err);
            }

            let mut data = klass.data();
            if data.status != ClassStatus::Verified {
                // Raced with another initializer while unlocked; go around.
                continue;
            }
            // From here on other threads observe us initializing; state
            // changes must notify.
            data.clinit_thread = Some(std::thread::current().id());
            klass.set_status_locked(&mut data, ClassStatus::Initializing);
            break;
        }

        // Initialize super classes, must be done while we are initializing
        // for the JLS.
        if !klass.is_interface() {
            if let Some(super_class) = klass.super_class() {
                if !super_class.is_initialized() {
                    debug_assert!(can_init_parents);
                    let super_result =
                        self.initialize_class(&super_class, can_init_statics, true);
                    let failed = match &super_result {
                        Ok(done) => !done,
                        Err(_) => true,
                    };
                    if failed {
                        let err = super_result.err().unwrap_or_else(|| {
                            super_class.erroneous_error()
                        });
                        klass.set_erroneous(&err);
                        return Err(err);
                    }
                }
            }

            // Initialize interfaces with default methods, in declaration
            // order, skipping sub-hierarchies already walked.
            for interface in klass.direct_interfaces() {
                debug_assert!(interface.is_interface());
                if interface
                    .access_flags()
                    .contains(ClassAccessFlags::RECURSIVELY_INITIALIZED)
                {
                    continue;
                }
                match self.initialize_default_interface_recursive(
                    &interface,
                    can_init_statics,
                    can_init_parents,
                ) {
                    Ok(true) => {}
                    Ok(false) => {
                        let err = interface.erroneous_error();
                        klass.set_erroneous(&err);
                        return Err(err);
                    }
                    Err(err) => {
                        klass.set_erroneous(&err);
                        return Err(err);
                    }
                }
            }
        }

        // Eagerly publish the static fields into the constant pool, then
        // evaluate the encoded static-value stream.
        let run = self.initialize_static_fields(klass, can_init_statics);
        let run = run.and_then(|()| {
            if let Some(clinit) = klass.find_class_initializer() {
                debug_assert!(can_init_statics);
                self.clinit_runner
                    .run_clinit(self, klass, &clinit)
                    .map_err(|thrown| wrap_exception_in_initializer(klass, thrown))
            } else {
                Ok(())
            }
        });

        util::allow_thread_suspension();
        let mut data = klass.data();
        match run {
            Err(err) => {
                if data.erroneous.is_none() {
                    data.erroneous = Some(err.clone());
                }
                data.clinit_thread = None;
                klass.set_status_locked(&mut data, ClassStatus::Erroneous);
                Err(err)
            }
            Ok(()) => {
                data.clinit_thread = None;
                klass.set_status_locked(&mut data, ClassStatus::Initialized);
                drop(data);
                tracing::debug!("initialized class {}", klass.descriptor().pretty());
                // Opportunistically point static methods at their real
                // destinations.
                self.fixup_static_trampolines(klass);
                Ok(true)
            }
        }
    }

    /// Run down the interface tree in declaration order, initializing only
    /// the interfaces that carry default methods, and marking every visited
    /// interface so later class initializations skip the traversal.
    fn initialize_default_interface_recursive(
        &self,
        interface: &ClassRef,
        can_init_statics: bool,
        can_init_parents: bool,
    ) -> Result<bool, LinkError> {
        debug_assert!(interface.is_interface());
        for super_interface in interface.direct_interfaces() {
            if !super_interface
                .access_flags()
                .contains(ClassAccessFlags::RECURSIVELY_INITIALIZED)
            {
                let done = self.initialize_default_interface_recursive(
                    &super_interface,
                    can_init_statics,
                    can_init_parents,
                )?;
                if !done {
                    return Ok(false);
                }
            }
        }

        let result = if interface.has_default_methods() {
            self.ensure_initialized(interface, can_init_statics, can_init_parents)?
        } else {
            // Nothing to run; only the mark matters.
            true
        };
        if result {
            interface.add_access_flags(ClassAccessFlags::RECURSIVELY_INITIALIZED);
        }
        Ok(result)
    }

    /// Wait out another thread's initialization. A failure over there
    /// surfaces here as a fresh no-class-def-found naming that failure.
    fn wait_for_initialize_class<'a>(
        &self,
        klass: &'a ClassRef,
        mut data: MutexGuard<'a, ClassData>,
    ) -> Result<bool, LinkError> {
        loop {
            data = klass.wait(data);
            match data.status {
                ClassStatus::Initialized => return Ok(true),
                ClassStatus::Erroneous => {
                    let cause = data.erroneous.clone().map(Box::new);
                    return Err(LinkError::NoClassDefFound {
                        descriptor: klass.descriptor().clone(),
                        cause,
                    });
                }
                _ => {
                    // Spurious wakeup or still initializing; keep waiting.
                }
            }
        }
    }

    fn initialize_static_fields(
        &self,
        klass: &ClassRef,
        can_init_statics: bool,
    ) -> Result<(), LinkError> {
        let static_fields = klass.static_fields();
        if static_fields.is_empty() {
            return Ok(());
        }
        let Some(dex_cache) = klass.dex_cache() else {
            return Ok(());
        };
        // Publishing the fields here saves the resolver the expensive
        // static-field walks later.
        for field in &static_fields {
            if let Some(idx) = field.field_idx() {
                if dex_cache.resolved_field(idx).is_none() {
                    dex_cache.set_resolved_field(idx, field.clone());
                }
            }
        }

        let Some(def_idx) = klass.data().class_def else {
            return Ok(());
        };
        let dex = dex_cache.dex().clone();
        let def = dex.class_def(def_idx)?;
        if def.static_values.is_empty() {
            return Ok(());
        }
        debug_assert!(can_init_statics);
        for (slot, encoded) in def.static_values.iter().enumerate() {
            debug_assert!(slot < static_fields.len());
            let value = self.eval_encoded_value(&dex_cache, klass, encoded)?;
            klass.set_static_value(slot, value);
        }
        Ok(())
    }

    fn eval_encoded_value(
        &self,
        dex_cache: &Arc<DexCache>,
        klass: &ClassRef,
        encoded: &EncodedValue,
    ) -> Result<Value, LinkError> {
        Ok(match encoded {
            EncodedValue::Byte(v) => Value::Byte(*v),
            EncodedValue::Short(v) => Value::Short(*v),
            EncodedValue::Char(v) => Value::Char(*v),
            EncodedValue::Int(v) => Value::Int(*v),
            EncodedValue::Long(v) => Value::Long(*v),
            EncodedValue::Float(v) => Value::Float(*v),
            EncodedValue::Double(v) => Value::Double(*v),
            EncodedValue::Boolean(v) => Value::Boolean(*v),
            EncodedValue::Null => Value::Null,
            EncodedValue::String(idx) => Value::String(self.resolve_string(dex_cache, *idx)?),
            EncodedValue::Type(idx) => {
                Value::Type(self.resolve_type(dex_cache, *idx, klass.loader().as_ref())?)
            }
        })
    }

    /// Once *initialized*, static methods stop routing through the
    /// resolution trampoline.
    pub(crate) fn fixup_static_trampolines(&self, klass: &ClassRef) {
        debug_assert!(klass.is_initialized());
        for method in klass.direct_methods() {
            let flags = method.access_flags();
            if !flags.is_static() || method.is_class_initializer() {
                continue;
            }
            if method.entry_point() != EntryPoint::ResolutionTrampoline {
                continue;
            }
            let entry = if self.config().instrumentation_forces_interpreter && !flags.is_native() {
                EntryPoint::InterpreterBridge
            } else if let Some(code) = self.code_source.compiled_code_for(&method) {
                EntryPoint::Compiled(code)
            } else if flags.is_native() {
                EntryPoint::NativeBridge
            } else {
                EntryPoint::InterpreterBridge
            };
            method.set_entry_point(entry);
        }
    }

    /// Cross-loader super-class validation: every slot this class overrides
    /// in its superclass's vtable (and every interface slot it implements
    /// across loaders) must agree on the resolved identity of the return
    /// type and all parameter types from both loaders.
    pub(crate) fn validate_super_class_descriptors(
        &self,
        klass: &ClassRef,
    ) -> Result<(), LinkError> {
        if klass.is_interface() {
            return Ok(());
        }
        if let Some(super_class) = klass.super_class() {
            if !same_loader(klass, &super_class) {
                let vtable = klass.vtable();
                let super_vtable = super_class.vtable();
                for i in 0..super_vtable.len() {
                    if !Arc::ptr_eq(&vtable[i], &super_vtable[i]) {
                        self.check_signature_across_loaders(
                            klass,
                            &vtable[i],
                            &super_vtable[i],
                        )?;
                    }
                }
            }
        }
        let iftable = klass.iftable();
        for entry in &iftable.entries {
            if same_loader(klass, &entry.interface) {
                continue;
            }
            let interface_methods = entry.interface.virtual_methods();
            for (j, interface_method) in interface_methods.iter().enumerate() {
                let implementing = &entry.methods[j];
                let owned_here = implementing
                    .declaring_class()
                    .map_or(false, |d| Arc::ptr_eq(&d, klass));
                if owned_here {
                    self.check_signature_across_loaders(klass, implementing, interface_method)?;
                }
            }
        }
        Ok(())
    }

    /// Both methods must resolve every type in their shared signature to the
    /// same class record through their respective loaders.
    fn check_signature_across_loaders(
        &self,
        klass: &ClassRef,
        ours: &crate::method::MethodRef,
        theirs: &crate::method::MethodRef,
    ) -> Result<(), LinkError> {
        let our_loader = ours
            .declaring_class()
            .and_then(|c| c.loader());
        let their_loader = theirs
            .declaring_class()
            .and_then(|c| c.loader());
        let mut check = |descriptor: &ember_base::descriptor::Descriptor| -> Result<(), LinkError> {
            if descriptor.is_primitive() {
                return Ok(());
            }
            let from_ours = self
                .find_class(descriptor, our_loader.as_ref())
                .map_err(|err| signature_check_failure(klass, ours, descriptor, &err))?;
            let from_theirs = self
                .find_class(descriptor, their_loader.as_ref())
                .map_err(|err| signature_check_failure(klass, theirs, descriptor, &err))?;
            if !Arc::ptr_eq(&from_ours, &from_theirs) {
                return Err(LinkError::Linkage {
                    message: format!(
                        "class {} method {} resolves {} differently in its superclass or interface",
                        klass.descriptor().pretty(),
                        ours.pretty(),
                        descriptor.pretty()
                    ),
                });
            }
            Ok(())
        };
        check(&ours.proto().return_type)?;
        for param in &ours.proto().params {
            check(param)?;
        }
        Ok(())
    }
}

fn same_loader(a: &ClassRef, b: &ClassRef) -> bool {
    a.loader_key() == b.loader_key()
}

fn signature_check_failure(
    klass: &ClassRef,
    method: &crate::method::MethodRef,
    descriptor: &ember_base::descriptor::Descriptor,
    err: &LinkError,
) -> LinkError {
    LinkError::Linkage {
        message: format!(
            "class {} method {} could not resolve {} for cross-loader signature check: {err}",
            klass.descriptor().pretty(),
            method.pretty(),
            descriptor.pretty()
        ),
    }
}

fn wrap_exception_in_initializer(klass: &ClassRef, thrown: ThrownException) -> LinkError {
    // Errors pass through as-is; everything else wraps.
    if thrown.is_error {
        LinkError::Thrown(thrown)
    } else {
        LinkError::ExceptionInInitializer {
            class: klass.descriptor().clone(),
            cause: thrown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::class::ClassRef;
    use crate::loader::ClassLoader;
    use crate::method::MethodRef;
    use crate::testing;
    use ember_base::container::{DexFile, DexFileBuilder, EncodedValue};
    use ember_base::descriptor::Descriptor;
    use ember_base::flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

    fn clinit_flags() -> MethodAccessFlags {
        MethodAccessFlags::STATIC | MethodAccessFlags::CONSTRUCTOR
    }

    fn class_with_clinit(descriptor: &str) -> Arc<DexFile> {
        let mut b = DexFileBuilder::new("clinit.dex");
        b.class(descriptor)
            .super_class("Ljava/lang/Object;")
            .static_field("state", "I", FieldAccessFlags::PRIVATE)
            .direct_method("<clinit>", "V", &[], clinit_flags())
            .finish();
        b.build()
    }

    #[test]
    fn trivial_class_initializes_without_running_code() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_runner = ran.clone();
        let runner = move |_: &ClassLinker, _: &ClassRef, _: &MethodRef| {
            ran_in_runner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        let mut b = DexFileBuilder::new("trivial.dex");
        b.class("Ltest/Trivial;")
            .super_class("Ljava/lang/Object;")
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let k = testing::find(&linker, "Ltest/Trivial;");
        assert!(matches!(linker.ensure_initialized(&k, true, true), Ok(true)));
        assert!(k.is_initialized());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parallel_initialization_runs_clinit_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_runner = runs.clone();
        let runner = move |_: &ClassLinker, _: &ClassRef, _: &MethodRef| {
            runs_in_runner.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        linker.append_to_boot_class_path(&class_with_clinit("Ltest/K;"));
        let k = testing::find(&linker, "Ltest/K;");

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let linker = linker.clone();
                let k = k.clone();
                std::thread::spawn(move || linker.ensure_initialized(&k, true, true))
            })
            .collect();
        for t in threads {
            assert!(matches!(t.join().unwrap(), Ok(true)));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(k.is_initialized());

        // A late joiner returns immediately without touching the monitor
        // path.
        std::thread::sleep(Duration::from_millis(100));
        assert!(matches!(linker.ensure_initialized(&k, true, true), Ok(true)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clinit_exception_is_wrapped_and_sticky() {
        let runner = |_: &ClassLinker, _: &ClassRef, _: &MethodRef| {
            Err(ThrownException {
                exception_class: Descriptor::parse("Ljava/lang/RuntimeException;").unwrap(),
                message: Some("boom".to_owned()),
                is_error: false,
            })
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        linker.append_to_boot_class_path(&class_with_clinit("Ltest/Boom;"));
        let k = testing::find(&linker, "Ltest/Boom;");

        let err = linker
            .ensure_initialized(&k, true, true)
            .expect_err("clinit failure surfaces");
        assert!(matches!(err, LinkError::ExceptionInInitializer { .. }));
        assert!(k.is_erroneous());

        // The first failure is sticky: later attempts rethrow a fresh
        // no-class-def-found referencing it.
        let err = linker
            .ensure_initialized(&k, true, true)
            .expect_err("sticky failure");
        match err {
            LinkError::NoClassDefFound { cause, .. } => {
                assert!(matches!(
                    cause.as_deref(),
                    Some(LinkError::ExceptionInInitializer { .. })
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn error_exceptions_pass_through_unwrapped() {
        let runner = |_: &ClassLinker, _: &ClassRef, _: &MethodRef| {
            Err(ThrownException {
                exception_class: Descriptor::parse("Ljava/lang/Error;").unwrap(),
                message: None,
                is_error: true,
            })
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        linker.append_to_boot_class_path(&class_with_clinit("Ltest/Err;"));
        let k = testing::find(&linker, "Ltest/Err;");
        let err = linker.ensure_initialized(&k, true, true).expect_err("error");
        assert!(matches!(err, LinkError::Thrown(_)));
    }

    #[test]
    fn recursive_entry_during_clinit_is_benign() {
        let reentered = Arc::new(AtomicUsize::new(0));
        let reentered_in_runner = reentered.clone();
        let runner = move |linker: &ClassLinker, class: &ClassRef, _: &MethodRef| {
            // A <clinit> body touching its own class again must not wait.
            match linker.ensure_initialized(class, true, true) {
                Ok(true) => {
                    reentered_in_runner.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                other => panic!("recursive entry failed: {other:?}"),
            }
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        linker.append_to_boot_class_path(&class_with_clinit("Ltest/Rec;"));
        let k = testing::find(&linker, "Ltest/Rec;");
        assert!(matches!(linker.ensure_initialized(&k, true, true), Ok(true)));
        assert_eq!(reentered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fast_fail_declines_without_state_change() {
        let linker = testing::boot_linker();
        linker.append_to_boot_class_path(&class_with_clinit("Ltest/Guarded;"));
        let k = testing::find(&linker, "Ltest/Guarded;");
        // Statics forbidden but a <clinit> exists: decline, no state change.
        assert!(matches!(linker.ensure_initialized(&k, false, false), Ok(false)));
        assert!(!k.is_initialized());
        assert!(!k.is_erroneous());
        // With statics allowed it proceeds.
        assert!(matches!(linker.ensure_initialized(&k, true, true), Ok(true)));
    }

    #[test]
    fn encoded_static_values_are_assigned() {
        let linker = testing::boot_linker();
        let mut b = DexFileBuilder::new("statics.dex");
        let greeting = b.add_string("hello");
        let object_type = b.add_type("Ljava/lang/Object;");
        b.class("Ltest/S;")
            .super_class("Ljava/lang/Object;")
            .static_field("count", "I", FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL)
            .static_field(
                "greeting",
                "Ljava/lang/String;",
                FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
            )
            .static_field(
                "marker",
                "Ljava/lang/Class;",
                FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
            )
            .static_value(EncodedValue::Int(7))
            .static_value(EncodedValue::String(greeting))
            .static_value(EncodedValue::Type(object_type))
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let s = testing::find(&linker, "Ltest/S;");
        assert!(matches!(linker.ensure_initialized(&s, true, true), Ok(true)));
        assert!(matches!(s.static_value(0), Some(Value::Int(7))));
        match s.static_value(1) {
            Some(Value::String(text)) => {
                assert_eq!(&*text, "hello");
                // Interned: resolving again shares storage.
                assert!(Arc::ptr_eq(&text, &linker.intern("hello")));
            }
            other => panic!("unexpected value {other:?}"),
        }
        match s.static_value(2) {
            Some(Value::Type(class)) => {
                assert!(Arc::ptr_eq(&class, &linker.object_class()));
            }
            other => panic!("unexpected value {other:?}"),
        }
        // The fields were eagerly published into the constant pool.
        let cache = s.dex_cache().unwrap();
        let field = s.static_fields()[0].clone();
        assert!(cache
            .resolved_field(field.field_idx().unwrap())
            .map_or(false, |f| Arc::ptr_eq(&f, &field)));
    }

    #[test]
    fn default_interface_initialization_marks_hierarchy() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_runner = runs.clone();
        let runner = move |_: &ClassLinker, _: &ClassRef, _: &MethodRef| {
            runs_in_runner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let linker = testing::boot_linker_with(
            crate::linker::LinkerConfig::default(),
            Box::new(crate::services::AlwaysVerified),
            Box::new(runner),
        );
        let mut b = DexFileBuilder::new("defaults.dex");
        b.class("Ltest/WithDefault;")
            .access_flags(
                ClassAccessFlags::PUBLIC
                    | ClassAccessFlags::INTERFACE
                    | ClassAccessFlags::ABSTRACT,
            )
            .super_class("Ljava/lang/Object;")
            .virtual_method("d", "V", &[], MethodAccessFlags::PUBLIC)
            .direct_method("<clinit>", "V", &[], clinit_flags())
            .finish();
        b.class("Ltest/K1;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/WithDefault;")
            .finish();
        b.class("Ltest/K2;")
            .super_class("Ljava/lang/Object;")
            .interface("Ltest/WithDefault;")
            .finish();
        linker.append_to_boot_class_path(&b.build());

        let iface = testing::find(&linker, "Ltest/WithDefault;");
        assert!(iface.has_default_methods());
        let k1 = testing::find(&linker, "Ltest/K1;");
        assert!(matches!(linker.ensure_initialized(&k1, true, true), Ok(true)));
        // The interface's initializer ran because it carries defaults.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(iface
            .access_flags()
            .contains(ClassAccessFlags::RECURSIVELY_INITIALIZED));

        // The second class skips the already-walked interface.
        let k2 = testing::find(&linker, "Ltest/K2;");
        assert!(matches!(linker.ensure_initialized(&k2, true, true), Ok(true)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cross_loader_signature_mismatch_is_a_linkage_error() {
        let linker = testing::boot_linker();

        // Loader 2 defines S and its own version of C.
        let mut d2 = DexFileBuilder::new("l2.dex");
        d2.class("Ltest/C;")
            .super_class("Ljava/lang/Object;")
            .finish();
        d2.class("Ltest/S;")
            .super_class("Ljava/lang/Object;")
            .virtual_method("m", "Ltest/C;", &[], MethodAccessFlags::PUBLIC)
            .finish();
        let loader2 = ClassLoader::new("l2", None);
        loader2.append_to_class_path(d2.build());

        // Loader 1 is child-first with a different C, and K overriding m.
        let mut d1 = DexFileBuilder::new("l1.dex");
        d1.class("Ltest/C;")
            .super_class("Ljava/lang/Object;")
            .instance_field("extra", "I", FieldAccessFlags::PUBLIC)
            .finish();
        d1.class("Ltest/K;")
            .super_class("Ltest/S;")
            .virtual_method("m", "Ltest/C;", &[], MethodAccessFlags::PUBLIC)
            .finish();
        let loader1 = ClassLoader::with_delegation("l1", Some(loader2.clone()), false);
        loader1.append_to_class_path(d1.build());

        let k = linker
            .find_class(&Descriptor::parse("Ltest/K;").unwrap(), Some(&loader1))
            .expect("K links");
        // The two loaders disagree about Ltest/C;.
        let c1 = linker
            .find_class(&Descriptor::parse("Ltest/C;").unwrap(), Some(&loader1))
            .unwrap();
        let c2 = linker
            .find_class(&Descriptor::parse("Ltest/C;").unwrap(), Some(&loader2))
            .unwrap();
        assert!(!Arc::ptr_eq(&c1, &c2));

        let err = linker
            .ensure_initialized(&k, true, true)
            .expect_err("signature mismatch must fail");
        assert!(matches!(err, LinkError::Linkage { .. }), "got {err:?}");
        assert!(k.is_erroneous());
    }
}
