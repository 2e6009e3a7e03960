//! Collision shape sub-elements. Every shape kind shares one element type
//! and differs only in its table and dimension columns.

use std::any::Any;

use log::warn;
use reference::{RefId, Uid};
use smallvec::SmallVec;
use world_query::{quote_literal, IntoParam, Value};

use crate::sub_element::{is_sub_element_type, spawn_element};
use crate::{
    ComponentCore, ComponentCreated, ComponentLoading, ElementCore, ObjectRef, ObjectSubElement,
    Spawned, SubElementCategory, TypeCatalog, World, WorldComponent, WorldError, WorldResult,
};

/// Base type of every collision shape.
pub const RTID_COLLISION_SHAPE_ELEMENT: Uid = Uid::from_u128(0xA7F8231B_BDCB_4954_B0D8_5FC206081B0E);
pub const RTID_BOX_COLLISION_SHAPE: Uid = Uid::from_u128(0x5E0C7D22_1B9F_4C47_8E53_A4D1F60B2C91);
pub const RTID_SPHERE_COLLISION_SHAPE: Uid = Uid::from_u128(0x9A41B3E7_6C0D_4F28_B1A5_3E7C92D4F860);
pub const RTID_CYLINDER_COLLISION_SHAPE: Uid = Uid::from_u128(0xC2D85F14_8E3A_47B9_A06C_5B19E7F3D24A);
pub const RTID_CONE_COLLISION_SHAPE: Uid = Uid::from_u128(0x17E6A9C3_D45B_4A80_9F2E_6C83B1057D9E);
pub const RTID_CAPSULE_COLLISION_SHAPE: Uid = Uid::from_u128(0x12E48001_F868_4318_A9D6_E03F6B2656CC);
pub const RTID_HULL_COLLISION_SHAPE: Uid = Uid::from_u128(0x3D5C75AC_6993_415E_B898_5E1F23885B61);

/// Category under which objects file their collision shapes.
pub const OSECID_COLLISION_SHAPES: Uid = Uid::from_u128(0xFF337EAC_C68E_4C21_8445_3A5B042A82EF);

pub const COLLISION_SHAPES: SubElementCategory = SubElementCategory {
    id: OSECID_COLLISION_SHAPES,
    name: "Collision Shapes",
    types: &[
        RTID_BOX_COLLISION_SHAPE,
        RTID_SPHERE_COLLISION_SHAPE,
        RTID_CYLINDER_COLLISION_SHAPE,
        RTID_CONE_COLLISION_SHAPE,
        RTID_CAPSULE_COLLISION_SHAPE,
        RTID_HULL_COLLISION_SHAPE,
    ],
};

/// Storage layout of one shape kind.
#[derive(Debug)]
pub struct ShapeSchema {
    pub type_id: Uid,
    pub name: &'static str,
    pub table: &'static str,
    pub schema: &'static str,
    pub columns: &'static [&'static str],
    pub defaults: &'static [f32],
}

impl ShapeSchema {
    fn insert_sql(&self) -> String {
        let params: Vec<String> = (3..self.columns.len() + 3).map(|n| format!("?{n}")).collect();
        format!(
            "INSERT INTO {} (RefId, RefCount, {}) VALUES(?1, ?2, {})",
            quote_literal(self.table),
            self.columns.join(", "),
            params.join(", ")
        )
    }

    fn update_sql(&self) -> String {
        let assignments: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(n, column)| format!("{column}=?{}", n + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE RefId=?{}",
            quote_literal(self.table),
            assignments.join(", "),
            self.columns.len() + 1
        )
    }

    fn load_sql(&self) -> String {
        format!("SELECT * FROM {} WHERE RefId=?1", quote_literal(self.table))
    }
}

pub const BOX_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_BOX_COLLISION_SHAPE,
    name: "Box",
    table: "ObjectSubElements::BoxCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::BoxCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        SizeX REAL, SizeY REAL, SizeZ REAL);",
    columns: &["SizeX", "SizeY", "SizeZ"],
    defaults: &[1.0, 1.0, 1.0],
};

pub const SPHERE_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_SPHERE_COLLISION_SHAPE,
    name: "Sphere",
    table: "ObjectSubElements::SphereCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::SphereCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        Radius REAL);",
    columns: &["Radius"],
    defaults: &[0.5],
};

pub const CYLINDER_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_CYLINDER_COLLISION_SHAPE,
    name: "Cylinder",
    table: "ObjectSubElements::CylinderCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::CylinderCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        Radius REAL, Height REAL);",
    columns: &["Radius", "Height"],
    defaults: &[0.5, 1.0],
};

pub const CONE_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_CONE_COLLISION_SHAPE,
    name: "Cone",
    table: "ObjectSubElements::ConeCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::ConeCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        Radius REAL, Height REAL);",
    columns: &["Radius", "Height"],
    defaults: &[0.5, 1.0],
};

pub const CAPSULE_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_CAPSULE_COLLISION_SHAPE,
    name: "Capsule",
    table: "ObjectSubElements::CapsuleCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::CapsuleCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        Radius REAL, Height REAL);",
    columns: &["Radius", "Height"],
    defaults: &[0.5, 2.0],
};

pub const HULL_SHAPE: ShapeSchema = ShapeSchema {
    type_id: RTID_HULL_COLLISION_SHAPE,
    name: "Hull",
    table: "ObjectSubElements::HullCollisionShape",
    schema: "CREATE TABLE IF NOT EXISTS 'ObjectSubElements::HullCollisionShape' (
        RefId INTEGER PRIMARY KEY, RefCount INTEGER NOT NULL DEFAULT 0,
        ExtentX REAL, ExtentY REAL, ExtentZ REAL);",
    columns: &["ExtentX", "ExtentY", "ExtentZ"],
    defaults: &[1.0, 1.0, 1.0],
};

pub static SHAPES: [&ShapeSchema; 6] = [
    &BOX_SHAPE,
    &SPHERE_SHAPE,
    &CYLINDER_SHAPE,
    &CONE_SHAPE,
    &CAPSULE_SHAPE,
    &HULL_SHAPE,
];

pub fn shape_schema(type_id: &Uid) -> Option<&'static ShapeSchema> {
    SHAPES.iter().copied().find(|shape| shape.type_id == *type_id)
}

/// A collision shape attached to a world object.
pub struct CollisionShapeElement {
    element: ElementCore,
    shape: &'static ShapeSchema,
    dimensions: SmallVec<[f32; 3]>,
}

impl CollisionShapeElement {
    pub fn new(ref_id: RefId, parent: ObjectRef, shape: &'static ShapeSchema) -> Self {
        Self {
            element: ElementCore::new(ref_id, parent),
            shape,
            dimensions: SmallVec::from_slice(shape.defaults),
        }
    }

    pub fn shape(&self) -> &'static ShapeSchema {
        self.shape
    }

    /// Dimensions in column order (e.g. radius then height).
    pub fn dimensions(&self) -> &[f32] {
        &self.dimensions
    }

    pub fn set_dimensions(&mut self, world: &mut World, dimensions: &[f32]) -> WorldResult<()> {
        if dimensions.len() != self.shape.columns.len() {
            return Err(WorldError::InvalidDimensions {
                shape: self.shape.name,
                expected: self.shape.columns.len(),
                found: dimensions.len(),
            });
        }
        self.persist_dimensions(world, dimensions)?;
        self.dimensions = SmallVec::from_slice(dimensions);
        self.on_component_modified(world, "Dimensions");
        Ok(())
    }

    fn persist_dimensions(&self, world: &mut World, dimensions: &[f32]) -> WorldResult<()> {
        if !self.should_serialize() {
            return Ok(());
        }
        let mut params: Vec<Value> = dimensions.iter().map(|d| d.into_param()).collect();
        params.push(self.element.component().ref_id().into_param());
        world.execute_cached(&self.shape.update_sql(), "update collision shape", params)
    }

    fn insert_component_data(&self, world: &mut World) -> WorldResult<()> {
        if !self.should_serialize() {
            return Ok(());
        }
        let core = self.element.component();
        let soft = core
            .key()
            .map_or(0, |key| world.manager().reference_count(key, false));
        let mut params = vec![core.ref_id().into_param(), soft.into_param()];
        params.extend(self.dimensions.iter().map(|d| d.into_param()));
        world.execute_cached(&self.shape.insert_sql(), "insert collision shape", params)
    }
}

impl reference::Reference for CollisionShapeElement {
    fn reference_type(&self) -> Uid {
        self.shape.type_id
    }

    fn query_reference_type(&self, type_id: &Uid) -> bool {
        *type_id == self.shape.type_id
            || *type_id == RTID_COLLISION_SHAPE_ELEMENT
            || is_sub_element_type(type_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl WorldComponent for CollisionShapeElement {
    fn core(&self) -> &ComponentCore {
        self.element.component()
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        self.element.component_mut()
    }

    fn database_table(&self) -> &'static str {
        self.shape.table
    }

    fn type_table_schema(&self) -> &'static str {
        self.shape.schema
    }

    fn on_component_created(&mut self, world: &mut World, event: &ComponentCreated) -> WorldResult<()> {
        self.insert_component_data(world)?;
        world.component_created(self.core(), event);
        Ok(())
    }

    fn on_component_loading(&mut self, world: &mut World, event: &ComponentLoading) -> WorldResult<()> {
        let columns = self.shape.columns;
        let stored = world
            .select_row(
                &self.shape.load_sql(),
                vec![event.source_ref_id.into_param()],
                |query| {
                    columns
                        .iter()
                        .map(|column| query.column::<f32>(*column))
                        .collect::<SmallVec<[Option<f32>; 3]>>()
                },
            )?
            .ok_or(WorldError::MissingRow(event.source_ref_id))?;
        for (slot, (value, default)) in self
            .dimensions
            .iter_mut()
            .zip(stored.into_iter().zip(self.shape.defaults))
        {
            *slot = value.unwrap_or(*default);
        }

        world.component_loading(self.core(), self.shape.table, event)?;
        if event.source_ref_id != self.core().ref_id() {
            self.insert_component_data(world)?;
        }
        Ok(())
    }

    fn on_component_deleted(&mut self, world: &mut World) {
        world.component_deleted(self.core(), self.shape.table);
    }
}

impl ObjectSubElement for CollisionShapeElement {
    fn element(&self) -> &ElementCore {
        &self.element
    }

    fn element_mut(&mut self) -> &mut ElementCore {
        &mut self.element
    }

    fn element_category(&self) -> Uid {
        OSECID_COLLISION_SHAPES
    }

    fn display_name(&self) -> &str {
        self.shape.name
    }

    fn apply_element_rescale(&mut self, world: &mut World, scale: f32) -> WorldResult<()> {
        let scaled: SmallVec<[f32; 3]> = self.dimensions.iter().map(|d| d * scale).collect();
        self.set_dimensions(world, &scaled)
    }
}

fn alloc_shape(type_id: Uid, ref_id: RefId, parent: ObjectRef) -> Option<Spawned<dyn ObjectSubElement>> {
    let shape = shape_schema(&type_id)?;
    Some(spawn_element(CollisionShapeElement::new(ref_id, parent, shape)))
}

fn clone_shape(
    type_id: Uid,
    ref_id: RefId,
    parent: ObjectRef,
    init: &dyn ObjectSubElement,
) -> Option<Spawned<dyn ObjectSubElement>> {
    let shape = shape_schema(&type_id)?;
    let mut element = CollisionShapeElement::new(ref_id, parent, shape);
    match init.as_any().downcast_ref::<CollisionShapeElement>() {
        Some(source) if source.shape.type_id == type_id => {
            element.dimensions = source.dimensions.clone();
        }
        _ => warn!("cloning {} shape from an incompatible element; using defaults", shape.name),
    }
    Some(spawn_element(element))
}

pub(crate) fn register_collision_shapes(catalog: &mut TypeCatalog) {
    for shape in SHAPES {
        let name = format!("{} Collision Shape", shape.name);
        catalog.register_sub_element_type(shape.type_id, &name, alloc_shape, clone_shape);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_statements_follow_the_column_list() {
        assert_eq!(
            CAPSULE_SHAPE.insert_sql(),
            "INSERT INTO 'ObjectSubElements::CapsuleCollisionShape' (RefId, RefCount, Radius, Height) VALUES(?1, ?2, ?3, ?4)"
        );
        assert_eq!(
            BOX_SHAPE.update_sql(),
            "UPDATE 'ObjectSubElements::BoxCollisionShape' SET SizeX=?1, SizeY=?2, SizeZ=?3 WHERE RefId=?4"
        );
    }

    #[test]
    fn every_shape_is_in_the_collision_category() {
        for shape in SHAPES {
            assert!(COLLISION_SHAPES.accepts(&shape.type_id), "{}", shape.name);
            assert_eq!(shape.columns.len(), shape.defaults.len());
            assert!(shape.schema.contains(shape.table));
        }
        assert!(shape_schema(&RTID_COLLISION_SHAPE_ELEMENT).is_none());
    }
}
