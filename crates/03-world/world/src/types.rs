//! Type identifiers, message ids and lifecycle event payloads shared by every
//! world component.

use reference::{RefId, Uid};

/// Base type of every persisted component.
pub const RTID_WORLD_COMPONENT: Uid = Uid::from_u128(0xE9B38216_67A4_424D_ABF4_D1CADD1E3B15);
/// Base type of every world object.
pub const RTID_WORLD_OBJECT: Uid = Uid::from_u128(0xFCC02596_AD72_4EDD_A7ED_32330F759CD1);
/// Base type of every object sub-element.
pub const RTID_OBJECT_SUB_ELEMENT: Uid = Uid::from_u128(0x8ABED30D_422F_45AE_93DF_EF6D3877F151);
/// Base type of the nodes that place objects.
pub const RTID_OBJECT_NODE: Uid = Uid::from_u128(0x708DFF17_2613_4F7D_BAA3_9BC4E4A718CB);

/// Group joined by anything interested in component lifecycle traffic.
pub const MGID_WORLD_COMPONENT: Uid = Uid::from_u128(0x3F8B2C61_7A4E_4D09_B5C2_91E7D04A6B13);

/// Broadcast to every registered reference before the world tears down.
pub const WORLD_DISPOSING: u32 = 0x0100;
pub const WORLD_COMPONENT_CREATED: u32 = 0x0110;
pub const WORLD_COMPONENT_LOADING: u32 = 0x0111;
/// Context holds the name of the property that changed.
pub const WORLD_COMPONENT_MODIFIED: u32 = 0x0112;
pub const WORLD_COMPONENT_DELETED: u32 = 0x0113;

/// How a component is derived from an existing one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CloneMethod {
    /// Not a clone.
    #[default]
    None,
    /// Fully independent copy.
    Copy,
    /// Share the existing object itself.
    ObjectInstance,
    /// Share the underlying data with a new object.
    DataInstance,
}

impl CloneMethod {
    /// Methods that hand back the resident object instead of building one.
    pub fn reuses_instance(self) -> bool {
        matches!(self, CloneMethod::None | CloneMethod::ObjectInstance)
    }
}

/// Payload of [`WORLD_COMPONENT_CREATED`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentCreated {
    /// Database-local type id, 0 for internal components.
    pub local_type_id: u32,
    pub method: CloneMethod,
}

/// Payload of [`WORLD_COMPONENT_LOADING`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentLoading {
    /// Id of the rows being read. Differs from the component's own id when
    /// the load produces a clone.
    pub source_ref_id: RefId,
    pub local_type_id: u32,
    pub method: CloneMethod,
}
