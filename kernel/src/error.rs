//! Kernel-wide error type.
//!
//! A single tagged sum is used across the whole core instead of the
//! pointer-with-embedded-tag convention of the predecessor kernel (see
//! DESIGN.md, Open Question 1). Every fallible core function returns
//! `Result<T, KernelError>`; only the syscall boundary collapses a
//! `KernelError` down to a negative `errno`-shaped integer.

use core::fmt;

/// Every error kind produced by the core subsystems.
///
/// Values are deliberately a flat enum rather than per-subsystem error
/// types: the predecessor kernel shares one error vocabulary across PMM,
/// VMM, scheduler, process and loader code, and callers at the syscall
/// boundary need a single type to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A malformed argument was passed to a core function.
    BadArgs,
    /// An address was not in canonical form.
    NotCanonical,
    /// A handle or descriptor referred to the wrong kind of entity.
    BadEntity,
    /// A pointer or reference no longer refers to a live object.
    Dangling,
    /// The requested item does not exist.
    NoSuch,
    /// An item with that identity already exists.
    Redefined,
    /// The resource is currently locked or in use.
    Busy,
    /// An allocation failed.
    BadAlloc,
    /// Too many of something (process table full, too many FDs, ...).
    TooMany,
    /// Too few of something.
    TooLess,
    /// A size or count exceeded an upper bound.
    TooBig,
    /// A size or count fell below a lower bound.
    TooSmall,
    /// A fixed structural limit was hit.
    Limits,
    /// A resource pool is exhausted.
    Depleted,
    /// The object does not support reads.
    NoRead,
    /// The object does not support writes.
    NoWrite,
    /// No operations vtable is installed for this object kind.
    NoOperations,
    /// An operation that was assumed implicit did not happen.
    Impilict,
    /// The subsystem has not been initialized yet.
    NotInit,
    /// A tree or table traversal did not start from a valid root.
    NotRooted,
    /// A lower-level call returned an error that is being propagated.
    ErrReturn,
    /// An arithmetic or counter operation overflowed.
    Overflow,
    /// An unrecognized syscall number was dispatched.
    BadSystemcall,
    /// A name or id could not be resolved.
    CannotLookup,
    /// An on-disk or wire structure failed validation.
    BadEntry,
    /// An accounting structure has no record of the expected entry.
    NotRecorded,
    /// An expected field or resource was absent.
    Missing,
}

impl KernelError {
    /// The positive small-integer code this error maps to; the syscall
    /// boundary returns `-code` to userspace.
    pub const fn code(self) -> i32 {
        match self {
            KernelError::BadArgs => 1,
            KernelError::NotCanonical => 2,
            KernelError::BadEntity => 3,
            KernelError::Dangling => 4,
            KernelError::NoSuch => 5,
            KernelError::Redefined => 6,
            KernelError::Busy => 7,
            KernelError::BadAlloc => 8,
            KernelError::TooMany => 9,
            KernelError::TooLess => 10,
            KernelError::TooBig => 11,
            KernelError::TooSmall => 12,
            KernelError::Limits => 13,
            KernelError::Depleted => 14,
            KernelError::NoRead => 15,
            KernelError::NoWrite => 16,
            KernelError::NoOperations => 17,
            KernelError::Impilict => 18,
            KernelError::NotInit => 19,
            KernelError::NotRooted => 20,
            KernelError::ErrReturn => 21,
            KernelError::Overflow => 22,
            KernelError::BadSystemcall => 23,
            KernelError::CannotLookup => 24,
            KernelError::BadEntry => 25,
            KernelError::NotRecorded => 26,
            KernelError::Missing => 27,
        }
    }

    /// Translate to a POSIX-style negative `errno` for the syscall ABI.
    pub const fn to_errno(self) -> isize {
        -(self.code() as isize)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::BadArgs => "bad arguments",
            KernelError::NotCanonical => "address not canonical",
            KernelError::BadEntity => "wrong kind of entity",
            KernelError::Dangling => "dangling reference",
            KernelError::NoSuch => "no such entry",
            KernelError::Redefined => "already exists",
            KernelError::Busy => "resource busy",
            KernelError::BadAlloc => "allocation failed",
            KernelError::TooMany => "too many",
            KernelError::TooLess => "too few",
            KernelError::TooBig => "too big",
            KernelError::TooSmall => "too small",
            KernelError::Limits => "structural limit reached",
            KernelError::Depleted => "resource pool depleted",
            KernelError::NoRead => "not readable",
            KernelError::NoWrite => "not writable",
            KernelError::NoOperations => "no operations installed",
            KernelError::Impilict => "implicit operation missing",
            KernelError::NotInit => "not initialized",
            KernelError::NotRooted => "not rooted",
            KernelError::ErrReturn => "propagated error",
            KernelError::Overflow => "overflow",
            KernelError::BadSystemcall => "bad syscall number",
            KernelError::CannotLookup => "lookup failed",
            KernelError::BadEntry => "malformed entry",
            KernelError::NotRecorded => "not recorded",
            KernelError::Missing => "missing",
        };
        f.write_str(msg)
    }
}

/// Convenience alias used throughout the core.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_small_and_positive() {
        assert_eq!(KernelError::BadArgs.code(), 1);
        assert_eq!(KernelError::Missing.code(), 27);
    }

    #[test]
    fn errno_is_negated_code() {
        assert_eq!(KernelError::NoSuch.to_errno(), -5);
    }

    #[test]
    fn display_is_nonempty_for_every_variant() {
        let variants = [
            KernelError::BadArgs,
            KernelError::NotCanonical,
            KernelError::BadEntity,
            KernelError::Dangling,
            KernelError::NoSuch,
            KernelError::Redefined,
            KernelError::Busy,
            KernelError::BadAlloc,
            KernelError::TooMany,
            KernelError::TooLess,
            KernelError::TooBig,
            KernelError::TooSmall,
            KernelError::Limits,
            KernelError::Depleted,
            KernelError::NoRead,
            KernelError::NoWrite,
            KernelError::NoOperations,
            KernelError::Impilict,
            KernelError::NotInit,
            KernelError::NotRooted,
            KernelError::ErrReturn,
            KernelError::Overflow,
            KernelError::BadSystemcall,
            KernelError::CannotLookup,
            KernelError::BadEntry,
            KernelError::NotRecorded,
            KernelError::Missing,
        ];
        for v in variants {
            assert!(!alloc::format!("{v}").is_empty());
        }
    }
}

#[cfg(test)]
extern crate alloc;
