//! Verification driving: the state walk around the verifier oracle. The
//! oracle's analysis itself lives elsewhere; this module owns the statuses,
//! the sticky error, and the AOT retry branch.

use ember_base::flags::{ClassAccessFlags, MethodAccessFlags};

use crate::class::{ClassRef, ClassStatus};
use crate::linker::ClassLinker;
use crate::services::VerifyOutcome;
use crate::LinkError;

impl ClassLinker {
    /// Drive a resolved class to *verified* (or park it for a runtime retry
    /// in AOT mode). Hard failures are recorded sticky and returned.
    pub fn verify_class(&self, klass: &ClassRef) -> Result<(), LinkError> {
        {
            let mut data = klass.data();
            loop {
                if data.status.is_verified() {
                    return Ok(());
                }
                if data.status == ClassStatus::Erroneous {
                    let err = klass.erroneous_error_locked(&data);
                    return Err(err);
                }
                // Another thread is mid-verification; wait it out.
                if data.status == ClassStatus::Verifying
                    || data.status == ClassStatus::VerifyingAtRuntime
                {
                    data = klass.wait(data);
                    continue;
                }
                break;
            }
            debug_assert!(
                data.status.is_resolved(),
                "verifying {} in state {:?}",
                klass.descriptor().pretty(),
                data.status
            );

            // Classes vouched for ahead of time skip the oracle.
            if data.access_flags.contains(ClassAccessFlags::PREVERIFIED) {
                for method in data.direct_methods.iter().chain(data.virtual_methods.iter()) {
                    method.add_access_flags(MethodAccessFlags::PREVERIFIED);
                }
                klass.set_status_locked(&mut data, ClassStatus::Verified);
                return Ok(());
            }

            let next = if data.status == ClassStatus::RetryVerificationAtRuntime {
                ClassStatus::VerifyingAtRuntime
            } else {
                ClassStatus::Verifying
            };
            klass.set_status_locked(&mut data, next);
        }

        // Verify the superclass first; subclassing a broken class is itself
        // a definition failure.
        if let Some(super_class) = klass.super_class() {
            if !super_class.status().is_verified() {
                if let Err(cause) = self.verify_class(&super_class) {
                    let err = LinkError::NoClassDefFound {
                        descriptor: klass.descriptor().clone(),
                        cause: Some(Box::new(cause)),
                    };
                    tracing::debug!(
                        "rejecting {}: superclass {} failed verification",
                        klass.descriptor().pretty(),
                        super_class.descriptor().pretty()
                    );
                    klass.set_erroneous(&err);
                    return Err(err);
                }
            }
        }

        let outcome = self.verifier.verify_class(klass);
        let mut data = klass.data();
        match outcome {
            VerifyOutcome::NoFailure => {
                data.access_flags |= ClassAccessFlags::PREVERIFIED;
                for method in data.direct_methods.iter().chain(data.virtual_methods.iter()) {
                    method.add_access_flags(MethodAccessFlags::PREVERIFIED);
                }
                klass.set_status_locked(&mut data, ClassStatus::Verified);
                Ok(())
            }
            VerifyOutcome::SoftFailure(reason) => {
                tracing::warn!(
                    "soft verification failure for {}: {reason}",
                    klass.descriptor().pretty()
                );
                if self.config().aot_mode && data.status == ClassStatus::Verifying {
                    // Re-verified on the first runtime touch.
                    klass.set_status_locked(&mut data, ClassStatus::RetryVerificationAtRuntime);
                } else {
                    // At runtime a soft failure just means interpret; the
                    // class is usable but never preverified.
                    klass.set_status_locked(&mut data, ClassStatus::Verified);
                }
                Ok(())
            }
            VerifyOutcome::HardFailure {
                error_class,
                message,
            } => {
                let err = LinkError::VerifyError {
                    class: klass.descriptor().clone(),
                    error_class,
                    message,
                };
                if data.erroneous.is_none() {
                    data.erroneous = Some(err.clone());
                }
                klass.set_status_locked(&mut data, ClassStatus::Erroneous);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::linker::LinkerConfig;
    use crate::services::VerifyOutcome;
    use crate::testing;
    use ember_base::container::DexFileBuilder;
    use ember_base::descriptor::Descriptor;

    fn container_with(descriptor: &'static str) -> Arc<ember_base::container::DexFile> {
        let mut b = DexFileBuilder::new("verify.dex");
        b.class(descriptor).super_class("Ljava/lang/Object;").finish();
        b.build()
    }

    fn failing_verifier(target: &'static str) -> impl Fn(&ClassRef) -> VerifyOutcome + Send + Sync {
        move |class: &ClassRef| {
            if class.descriptor().as_str() == target {
                VerifyOutcome::HardFailure {
                    error_class: Descriptor::parse("Ljava/lang/VerifyError;").unwrap(),
                    message: "structurally damaged".to_owned(),
                }
            } else {
                VerifyOutcome::NoFailure
            }
        }
    }

    #[test]
    fn hard_failure_is_recorded_sticky() {
        let linker = testing::boot_linker_with(
            LinkerConfig::default(),
            Box::new(failing_verifier("Ltest/Bad;")),
            Box::new(crate::services::NoopClinitRunner),
        );
        linker.append_to_boot_class_path(&container_with("Ltest/Bad;"));
        let bad = testing::find(&linker, "Ltest/Bad;");

        let err = linker
            .ensure_initialized(&bad, true, true)
            .expect_err("hard failure surfaces");
        assert!(matches!(err, LinkError::VerifyError { .. }));
        assert!(bad.is_erroneous());

        // A verification failure is rethrown as recorded, not converted.
        let err = linker
            .find_system_class("Ltest/Bad;")
            .expect_err("sticky verify error");
        match err {
            LinkError::VerifyError { error_class, .. } => {
                assert_eq!(error_class.as_str(), "Ljava/lang/VerifyError;");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn soft_failure_at_runtime_still_verifies() {
        let verifier = |_: &ClassRef| VerifyOutcome::SoftFailure("unresolvable branch".into());
        let linker = testing::boot_linker_with(
            LinkerConfig::default(),
            Box::new(verifier),
            Box::new(crate::services::NoopClinitRunner),
        );
        linker.append_to_boot_class_path(&container_with("Ltest/Soft;"));
        let soft = testing::find(&linker, "Ltest/Soft;");
        assert!(matches!(linker.ensure_initialized(&soft, true, true), Ok(true)));
        assert!(soft.is_initialized());
    }

    #[test]
    fn soft_failure_in_aot_parks_for_runtime_retry() {
        // The bootstrap itself must verify cleanly; only the test class
        // soft-fails.
        let verifier = |class: &ClassRef| {
            if class.descriptor().as_str() == "Ltest/Soft;" {
                VerifyOutcome::SoftFailure("needs runtime types".into())
            } else {
                VerifyOutcome::NoFailure
            }
        };
        let config = LinkerConfig {
            aot_mode: true,
            ..LinkerConfig::default()
        };
        let linker = testing::boot_linker_with(
            config,
            Box::new(verifier),
            Box::new(crate::services::NoopClinitRunner),
        );
        linker.append_to_boot_class_path(&container_with("Ltest/Soft;"));
        let soft = testing::find(&linker, "Ltest/Soft;");
        assert!(matches!(linker.ensure_initialized(&soft, true, true), Ok(false)));
        assert_eq!(soft.status(), ClassStatus::RetryVerificationAtRuntime);
        assert!(!soft.is_erroneous());
    }

    #[test]
    fn subclass_of_unverifiable_class_is_rejected() {
        let linker = testing::boot_linker_with(
            LinkerConfig::default(),
            Box::new(failing_verifier("Ltest/BadSuper;")),
            Box::new(crate::services::NoopClinitRunner),
        );
        let mut b = DexFileBuilder::new("badsuper.dex");
        b.class("Ltest/BadSuper;").super_class("Ljava/lang/Object;").finish();
        b.class("Ltest/Child;").super_class("Ltest/BadSuper;").finish();
        linker.append_to_boot_class_path(&b.build());

        let child = testing::find(&linker, "Ltest/Child;");
        let err = linker
            .ensure_initialized(&child, true, true)
            .expect_err("child of broken super fails");
        assert!(matches!(err, LinkError::NoClassDefFound { .. }), "got {err:?}");
        assert!(child.is_erroneous());
    }
}
