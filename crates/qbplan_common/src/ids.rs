//! Opaque ID newtypes for floorplanning entities.
//!
//! [`ModuleId`], [`NetId`], and [`CellId`] are thin `u32` wrappers used as
//! dense indices into the design's module list, net list, and the quad-cell
//! arena. They are `Copy`, `Hash`, `Ord`, and `Serialize`/`Deserialize`.

/// Declares a `u32` newtype ID with raw conversion, `Display`, and serde support.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Creates an ID from a raw `u32` index.
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw `u32` index.
            pub fn as_raw(self) -> u32 {
                self.0
            }

            /// Returns the ID as a `usize` for indexing.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Opaque, copyable ID for a movable module (circuit block).
    ModuleId
);

define_id!(
    /// Opaque, copyable ID for a net connecting module pins and I/O pads.
    NetId
);

define_id!(
    /// Opaque, copyable ID for a cell of the quad-tree partition.
    CellId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn module_id_roundtrip() {
        let id = ModuleId::from_raw(42);
        assert_eq!(id.as_raw(), 42);
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn id_equality_and_order() {
        let a = CellId::from_raw(3);
        let b = CellId::from_raw(3);
        let c = CellId::from_raw(4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn id_hash_in_set() {
        let mut set = HashSet::new();
        set.insert(NetId::from_raw(1));
        set.insert(NetId::from_raw(2));
        set.insert(NetId::from_raw(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = ModuleId::from_raw(55);
        let json = serde_json::to_string(&id).unwrap();
        let restored: ModuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn id_display() {
        let id = NetId::from_raw(42);
        assert_eq!(format!("{id}"), "42");
    }
}
