#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// This is nice to have for cases where we might want to rely on it not returning anything.
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::too_many_lines)]
// The way this library is designed has many arguments. Grouping them together would be nice for
// readability, but it makes it harder to minimize dependencies which has other knock-on effects..
#![allow(clippy::too_many_arguments)]

use std::sync::Arc;

use ember_base::container::ContainerIndexError;
use ember_base::descriptor::{Descriptor, DescriptorError};

pub mod bootstrap;
pub mod class;
pub mod dex_cache;
pub mod field;
pub mod image;
pub mod init;
pub mod intern;
pub mod link;
pub mod linker;
pub mod loader;
pub mod method;
pub mod proxy;
pub mod resolve;
pub mod services;
pub mod table;
pub mod util;
pub mod value;
pub mod verify;

pub use class::{Class, ClassRef, ClassStatus};
pub use field::{Field, FieldRef};
pub use linker::{ClassLinker, LinkerConfig};
pub use method::{Method, MethodRef};

pub const ENV_TRACING_LEVEL: &str = "EMBER_LOG_LEVEL";
pub const DEFAULT_TRACING_LEVEL: tracing::Level = tracing::Level::WARN;

/// Compute the tracing level from the environment, for embedders that want
/// the linker's convention.
#[must_use]
pub fn compute_tracing_level() -> tracing::Level {
    let env_log = std::env::var(ENV_TRACING_LEVEL);
    if let Ok(env_log) = env_log {
        if env_log.eq_ignore_ascii_case("trace") || env_log == "*" {
            tracing::Level::TRACE
        } else if env_log.eq_ignore_ascii_case("debug") {
            tracing::Level::DEBUG
        } else if env_log.eq_ignore_ascii_case("info") {
            tracing::Level::INFO
        } else if env_log.eq_ignore_ascii_case("warn") {
            tracing::Level::WARN
        } else if env_log.eq_ignore_ascii_case("error") {
            tracing::Level::ERROR
        } else {
            DEFAULT_TRACING_LEVEL
        }
    } else {
        DEFAULT_TRACING_LEVEL
    }
}

/// An exception reported by a collaborator (the clinit runner), described
/// rather than represented: the linker has no throwable objects of its own.
#[derive(Debug, Clone)]
pub struct ThrownException {
    /// Descriptor of the thrown exception's class.
    pub exception_class: Descriptor,
    pub message: Option<String>,
    /// `Error` subclasses pass through initialization unwrapped.
    pub is_error: bool,
}

// Note: Currently all of these errors use non_exhaustive, but in the future that may be removed
// on some if there is a belief that they are likely to be stable.

/// The linker's failure value. The first failure recorded against a class is
/// sticky: the class goes *erroneous* and later attempts rethrow from the
/// record (see [`class::Class::erroneous_error`]).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum LinkError {
    /// Class lookup failed at the find-class surface.
    ClassNotFound { descriptor: Descriptor },
    /// Class lookup failed during resolution or on a sticky-erroneous class.
    NoClassDefFound {
        descriptor: Descriptor,
        cause: Option<Box<LinkError>>,
    },
    /// A class's own resolution re-entered it on the same thread.
    ClassCircularity { descriptor: Descriptor },
    /// Structural damage: too many methods, inconsistent counts, ...
    ClassFormat { message: String },
    /// Default-method conflicts, call-kind mismatches, final overrides,
    /// supers that turned final or interface.
    IncompatibleClassChange { message: String },
    /// Cross-loader or member visibility violation.
    IllegalAccess { message: String },
    /// Cross-loader signature mismatch, non-interface used as interface, ...
    Linkage { message: String },
    NoSuchMethod {
        class: Descriptor,
        name: Arc<str>,
        signature: String,
    },
    NoSuchField {
        class: Descriptor,
        name: Arc<str>,
    },
    /// Wraps a non-`Error` exception thrown from `<clinit>`.
    ExceptionInInitializer {
        class: Descriptor,
        cause: ThrownException,
    },
    /// An `Error` thrown from `<clinit>`; passed through unwrapped.
    Thrown(ThrownException),
    /// The verifier hard-failed; carries the error class it named.
    VerifyError {
        class: Descriptor,
        error_class: Descriptor,
        message: String,
    },
    OutOfMemory,
    /// An index into a source container was out of range; a sign of a
    /// malformed container or an internal bug.
    Container(ContainerIndexError),
    /// A descriptor string failed to parse.
    BadDescriptor(DescriptorError),
    /// Some code loaded a value and then tried accessing it but it was missing.
    /// This might be a sign that it shouldn't assume that, or a sign of a bug elsewhere.
    MissingLoadedValue(&'static str),
}
impl From<ContainerIndexError> for LinkError {
    fn from(err: ContainerIndexError) -> Self {
        Self::Container(err)
    }
}
impl From<DescriptorError> for LinkError {
    fn from(err: DescriptorError) -> Self {
        Self::BadDescriptor(err)
    }
}
impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::ClassNotFound { descriptor } => {
                write!(f, "class not found: {}", descriptor.pretty())
            }
            LinkError::NoClassDefFound { descriptor, cause } => {
                write!(f, "no class definition found: {}", descriptor.pretty())?;
                if let Some(cause) = cause {
                    write!(f, " (caused by: {cause})")?;
                }
                Ok(())
            }
            LinkError::ClassCircularity { descriptor } => {
                write!(f, "class circularity: {}", descriptor.pretty())
            }
            LinkError::ClassFormat { message } => write!(f, "class format: {message}"),
            LinkError::IncompatibleClassChange { message } => {
                write!(f, "incompatible class change: {message}")
            }
            LinkError::IllegalAccess { message } => write!(f, "illegal access: {message}"),
            LinkError::Linkage { message } => write!(f, "linkage: {message}"),
            LinkError::NoSuchMethod {
                class,
                name,
                signature,
            } => write!(
                f,
                "no such method: {}.{}{}",
                class.pretty(),
                name,
                signature
            ),
            LinkError::NoSuchField { class, name } => {
                write!(f, "no such field: {}.{}", class.pretty(), name)
            }
            LinkError::ExceptionInInitializer { class, cause } => write!(
                f,
                "exception in initializer of {}: {}",
                class.pretty(),
                cause.exception_class.pretty()
            ),
            LinkError::Thrown(cause) => write!(f, "thrown: {}", cause.exception_class.pretty()),
            LinkError::VerifyError {
                class,
                error_class: _,
                message,
            } => write!(f, "verification of {} failed: {message}", class.pretty()),
            LinkError::OutOfMemory => write!(f, "out of memory"),
            LinkError::Container(err) => write!(f, "container index: {err:?}"),
            LinkError::BadDescriptor(err) => write!(f, "bad descriptor: {err:?}"),
            LinkError::MissingLoadedValue(what) => {
                write!(f, "missing previously loaded value: {what}")
            }
        }
    }
}
impl std::error::Error for LinkError {}

#[cfg(test)]
pub(crate) mod testing;
