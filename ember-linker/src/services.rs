//! Service traits for the collaborators the linker consumes but does not
//! implement: the bytecode verifier (an oracle), the machinery that runs
//! `<clinit>` bodies, and the provider of compiled code.

use ember_base::descriptor::Descriptor;

use crate::class::ClassRef;
use crate::linker::ClassLinker;
use crate::method::{CodeHandle, Method, MethodRef};
use crate::ThrownException;

/// The verifier's verdict on a class.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    NoFailure,
    /// Not provably safe now; re-verify at runtime (or interpret).
    SoftFailure(String),
    /// Structurally broken; the named error class is recorded sticky.
    HardFailure {
        error_class: Descriptor,
        message: String,
    },
}

pub trait Verifier: Send + Sync {
    fn verify_class(&self, class: &ClassRef) -> VerifyOutcome;
}

/// Every class passes verification.
#[derive(Debug, Default)]
pub struct AlwaysVerified;
impl Verifier for AlwaysVerified {
    fn verify_class(&self, _class: &ClassRef) -> VerifyOutcome {
        VerifyOutcome::NoFailure
    }
}

impl<F> Verifier for F
where
    F: Fn(&ClassRef) -> VerifyOutcome + Send + Sync,
{
    fn verify_class(&self, class: &ClassRef) -> VerifyOutcome {
        self(class)
    }
}

/// Runs a `<clinit>` body on behalf of the initialization protocol. The
/// linker interprets an `Err` as a pending exception in the initializing
/// thread.
pub trait ClinitRunner: Send + Sync {
    fn run_clinit(
        &self,
        linker: &ClassLinker,
        class: &ClassRef,
        clinit: &MethodRef,
    ) -> Result<(), ThrownException>;
}

/// A `<clinit>` that does nothing, successfully.
#[derive(Debug, Default)]
pub struct NoopClinitRunner;
impl ClinitRunner for NoopClinitRunner {
    fn run_clinit(
        &self,
        _linker: &ClassLinker,
        _class: &ClassRef,
        _clinit: &MethodRef,
    ) -> Result<(), ThrownException> {
        Ok(())
    }
}

impl<F> ClinitRunner for F
where
    F: Fn(&ClassLinker, &ClassRef, &MethodRef) -> Result<(), ThrownException> + Send + Sync,
{
    fn run_clinit(
        &self,
        linker: &ClassLinker,
        class: &ClassRef,
        clinit: &MethodRef,
    ) -> Result<(), ThrownException> {
        self(linker, class, clinit)
    }
}

/// Supplies compiled entry points from an ahead-of-time artifact or a JIT
/// code cache.
pub trait CodeSource: Send + Sync {
    fn compiled_code_for(&self, method: &Method) -> Option<CodeHandle>;
}

/// No compiled code anywhere; everything runs through the interpreter.
#[derive(Debug, Default)]
pub struct NoCompiledCode;
impl CodeSource for NoCompiledCode {
    fn compiled_code_for(&self, _method: &Method) -> Option<CodeHandle> {
        None
    }
}
