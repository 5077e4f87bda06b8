//! Shared helpers for the crate's tests: booted linkers and small
//! containers.

use std::sync::Arc;

use ember_base::container::{DexFile, DexFileBuilder};
use ember_base::descriptor::Descriptor;
use ember_base::flags::{ClassAccessFlags, MethodAccessFlags};

use crate::bootstrap::core_boot_container;
use crate::class::ClassRef;
use crate::linker::{ClassLinker, LinkerConfig};
use crate::services::{ClinitRunner, NoCompiledCode, Verifier};

pub(crate) fn boot_linker() -> Arc<ClassLinker> {
    let linker = Arc::new(ClassLinker::new(LinkerConfig::default()));
    linker
        .boot_without_image(vec![core_boot_container()])
        .expect("bootstrap");
    linker
}

pub(crate) fn boot_linker_with(
    config: LinkerConfig,
    verifier: Box<dyn Verifier>,
    clinit_runner: Box<dyn ClinitRunner>,
) -> Arc<ClassLinker> {
    let linker = Arc::new(ClassLinker::with_services(
        config,
        verifier,
        clinit_runner,
        Box::<NoCompiledCode>::default(),
    ));
    linker
        .boot_without_image(vec![core_boot_container()])
        .expect("bootstrap");
    linker
}

pub(crate) fn find(linker: &ClassLinker, descriptor: &str) -> ClassRef {
    linker
        .find_class(&Descriptor::parse(descriptor).expect("descriptor"), None)
        .unwrap_or_else(|err| panic!("find {descriptor}: {err}"))
}

/// One public interface `Ltest/Greeter;` with a single abstract method.
pub(crate) fn single_interface_container() -> Arc<DexFile> {
    let mut b = DexFileBuilder::new("greeter.dex");
    b.class("Ltest/Greeter;")
        .access_flags(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        )
        .super_class("Ljava/lang/Object;")
        .virtual_method(
            "greet",
            "Ljava/lang/String;",
            &[],
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        )
        .finish();
    b.build()
}
