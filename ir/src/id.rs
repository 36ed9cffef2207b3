//! Stable arena identifiers.
//!
//! Every IR node lives in an arena owned by its [`Fusion`](crate::Fusion) or
//! [`Kernel`](crate::kir::Kernel) and is referred to by a typed index. Ids are
//! assigned in creation order and never recycled, so comparing ids compares
//! creation order.

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Position of the node in its arena.
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena exceeds u32::MAX nodes"))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

pub(crate) use define_id;
