//! Pointer-shaped types and the managed-pointer policy.
//!
//! Classification is purely type-driven: a pointer is collector-managed iff its
//! address-space tag equals the one reserved by the embedding system. The tag
//! carries no other meaning and is agreed upon between front end and collector
//! out-of-band.

use crate::error::{Result, RootMapError};
use std::fmt;

// =============================================================================
// AddressSpace
// =============================================================================

/// Address-space tag attached to a pointer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct AddressSpace(pub u32);

impl AddressSpace {
    /// The default (unmanaged) address space.
    pub const GENERIC: Self = Self(0);
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addrspace({})", self.0)
    }
}

// =============================================================================
// Types
// =============================================================================

/// A pointer type, identified only by its address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PointerType {
    /// Address-space tag.
    pub address_space: AddressSpace,
}

impl PointerType {
    /// Pointer into the given address space.
    #[inline]
    pub const fn new(address_space: AddressSpace) -> Self {
        Self { address_space }
    }

    /// Pointer into the generic address space.
    #[inline]
    pub const fn generic() -> Self {
        Self::new(AddressSpace::GENERIC)
    }
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Return type.
    pub ret: Box<Type>,
    /// Parameter types, in order.
    pub params: Vec<Type>,
}

impl FunctionType {
    /// Create a function type.
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self {
            ret: Box::new(ret),
            params,
        }
    }

    /// Number of source-level arguments.
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Indices of the parameters that carry collector-managed pointers.
    ///
    /// Non-pointer parameters are never roots and are skipped rather than
    /// reported as classifier misuse.
    pub fn managed_params(&self, classifier: &dyn PointerClassifier) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter_map(|(idx, ty)| match ty {
                Type::Pointer(ptr) if classifier.is_managed_pointer(ptr) => Some(idx),
                _ => None,
            })
            .collect()
    }
}

/// The slice of the compiler's type system this subsystem needs to see.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value.
    Void,
    /// Integer of the given bit width.
    Int {
        /// Width in bits.
        bits: u16,
    },
    /// Floating point of the given bit width.
    Float {
        /// Width in bits.
        bits: u16,
    },
    /// Pointer.
    Pointer(PointerType),
    /// Function signature.
    Function(FunctionType),
    /// Anonymous aggregate.
    Struct(Vec<Type>),
}

impl Type {
    /// Pointer into `address_space`.
    #[inline]
    pub const fn pointer(address_space: u32) -> Self {
        Type::Pointer(PointerType::new(AddressSpace(address_space)))
    }

    /// Integer of `bits` width.
    #[inline]
    pub const fn int(bits: u16) -> Self {
        Type::Int { bits }
    }

    /// Returns the pointer type if this type is pointer-shaped.
    #[inline]
    pub fn as_pointer(&self) -> Option<&PointerType> {
        match self {
            Type::Pointer(ptr) => Some(ptr),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Int { bits } => write!(f, "i{bits}"),
            Type::Float { bits } => write!(f, "f{bits}"),
            Type::Pointer(ptr) if ptr.address_space == AddressSpace::GENERIC => f.write_str("ptr"),
            Type::Pointer(ptr) => write!(f, "ptr {}", ptr.address_space),
            Type::Function(func) => {
                write!(f, "{} (", func.ret)?;
                for (idx, param) in func.params.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                f.write_str(")")
            }
            Type::Struct(fields) => {
                f.write_str("{ ")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

// =============================================================================
// ManagedPointerType
// =============================================================================

/// A pointer type the classifier has proven to be collector-managed.
///
/// Only obtainable through [`PointerClassifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedPointerType(PointerType);

impl ManagedPointerType {
    /// The underlying pointer type.
    #[inline]
    pub fn pointer(&self) -> PointerType {
        self.0
    }

    /// The managed address space.
    #[inline]
    pub fn address_space(&self) -> AddressSpace {
        self.0.address_space
    }
}

// =============================================================================
// PointerClassifier
// =============================================================================

/// Decides whether a pointer type denotes collector-managed memory.
pub trait PointerClassifier: Send + Sync {
    /// Human-readable policy name, for diagnostics.
    fn name(&self) -> &str;

    /// Classify a pointer type. Total and deterministic.
    fn is_managed_pointer(&self, ty: &PointerType) -> bool;

    /// Classify an arbitrary type.
    ///
    /// Fails with [`RootMapError::InvalidArgument`] for non-pointer types.
    fn is_managed(&self, ty: &Type) -> Result<bool> {
        match ty {
            Type::Pointer(ptr) => Ok(self.is_managed_pointer(ptr)),
            other => Err(RootMapError::invalid_argument(format!(
                "`{other}` is not a pointer type"
            ))),
        }
    }

    /// Upgrade a pointer type to a [`ManagedPointerType`] if it is managed.
    fn classify(&self, ty: &PointerType) -> Option<ManagedPointerType> {
        self.is_managed_pointer(ty).then_some(ManagedPointerType(*ty))
    }
}

/// Classifies by comparing against a single reserved address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceClassifier {
    managed: AddressSpace,
}

impl AddressSpaceClassifier {
    /// Classifier that treats `managed` as the collector's heap.
    #[inline]
    pub const fn new(managed: AddressSpace) -> Self {
        Self { managed }
    }

    /// The reserved address space.
    #[inline]
    pub const fn managed_address_space(&self) -> AddressSpace {
        self.managed
    }
}

impl Default for AddressSpaceClassifier {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MANAGED_ADDRESS_SPACE)
    }
}

impl PointerClassifier for AddressSpaceClassifier {
    fn name(&self) -> &str {
        "address-space"
    }

    #[inline]
    fn is_managed_pointer(&self, ty: &PointerType) -> bool {
        ty.address_space == self.managed
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reserved_space_is_managed() {
        let classifier = AddressSpaceClassifier::default();
        assert_eq!(classifier.is_managed(&Type::pointer(1)), Ok(true));
        assert_eq!(classifier.is_managed(&Type::pointer(0)), Ok(false));
        assert_eq!(classifier.is_managed(&Type::pointer(2)), Ok(false));
    }

    #[test]
    fn test_non_pointer_is_invalid_argument() {
        let classifier = AddressSpaceClassifier::default();
        for ty in [
            Type::Void,
            Type::int(8),
            Type::Float { bits: 64 },
            Type::Struct(vec![Type::pointer(1)]),
            Type::Function(FunctionType::new(Type::Void, vec![])),
        ] {
            let err = classifier.is_managed(&ty).unwrap_err();
            assert!(matches!(err, RootMapError::InvalidArgument(_)), "{ty}");
        }
    }

    #[test]
    fn test_custom_reserved_space() {
        let classifier = AddressSpaceClassifier::new(AddressSpace(7));
        assert!(classifier.is_managed_pointer(&PointerType::new(AddressSpace(7))));
        assert!(!classifier.is_managed_pointer(&PointerType::new(AddressSpace(1))));
    }

    #[test]
    fn test_classify_yields_managed_type() {
        let classifier = AddressSpaceClassifier::default();
        let managed = classifier
            .classify(&PointerType::new(AddressSpace(1)))
            .unwrap();
        assert_eq!(managed.address_space(), AddressSpace(1));
        assert!(classifier.classify(&PointerType::generic()).is_none());
    }

    #[test]
    fn test_managed_params() {
        // i8 (ptr addrspace(1), ptr addrspace(1)), as in the statepoint example
        let sig = FunctionType::new(
            Type::int(8),
            vec![Type::pointer(1), Type::int(32), Type::pointer(0), Type::pointer(1)],
        );
        let classifier = AddressSpaceClassifier::default();
        assert_eq!(sig.managed_params(&classifier), vec![0, 3]);
        assert_eq!(sig.arity(), 4);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::pointer(0).to_string(), "ptr");
        assert_eq!(Type::pointer(1).to_string(), "ptr addrspace(1)");
        let sig = FunctionType::new(Type::int(8), vec![Type::pointer(1), Type::pointer(1)]);
        assert_eq!(
            Type::Function(sig).to_string(),
            "i8 (ptr addrspace(1), ptr addrspace(1))"
        );
    }

    proptest! {
        #[test]
        fn test_property_classification_agrees_with_tag(
            reserved in any::<u32>(),
            space in any::<u32>(),
        ) {
            let classifier = AddressSpaceClassifier::new(AddressSpace(reserved));
            let ty = Type::pointer(space);
            let first = classifier.is_managed(&ty);
            prop_assert_eq!(first.clone(), Ok(space == reserved));
            prop_assert_eq!(classifier.is_managed(&ty), first);
        }
    }
}
