//! Command-line utility for looking inside world databases.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use world::{
    TypeCatalog, World, WorldConfig, WorldObject, OSECID_COLLISION_SHAPES,
    RTID_BOX_COLLISION_SHAPE, RTID_DUMMY_OBJECT, RTID_SPHERE_COLLISION_SHAPE,
};
use world_query::{quote_literal, IntoParam};

const SELECT_OBJECT_TYPES: &str =
    "SELECT LocalId, Name, Identifier, DatabaseTable FROM 'ObjectTypes' ORDER BY LocalId";
const SELECT_SUB_ELEMENT_TYPES: &str =
    "SELECT LocalId, Name, Identifier, DatabaseTable FROM 'ObjectSubElementTypes' ORDER BY LocalId";
const SELECT_LINKS: &str = "SELECT SubElementTypeId, SubElementId \
     FROM 'Objects::Base::All::SubElements' WHERE ObjectId=?1 ORDER BY Id";

/// One row of a type table, with the number of rows its component table holds.
#[derive(Clone, Debug)]
pub struct TypeRow {
    pub local_id: u32,
    pub name: String,
    pub identifier: String,
    pub table: String,
    pub rows: i64,
}

#[derive(Clone, Debug)]
pub struct ObjectRow {
    pub type_name: String,
    pub ref_id: u32,
    pub ref_count: i32,
    pub sub_elements: Vec<(String, u32)>,
}

/// Text rendering helpers used by the CLI commands.
mod render {
    use std::fmt::Write;

    use super::{ObjectRow, TypeRow};

    fn type_section(out: &mut String, title: &str, rows: &[TypeRow]) {
        writeln!(out, "{title}:").expect("write title");
        if rows.is_empty() {
            out.push_str("  (none)\n");
        }
        for row in rows {
            writeln!(
                out,
                "  #{} {} {} '{}' rows={}",
                row.local_id, row.name, row.identifier, row.table, row.rows
            )
            .expect("write type");
        }
    }

    /// Format the object and sub-element type tables.
    pub fn types(objects: &[TypeRow], elements: &[TypeRow]) -> String {
        let mut out = String::new();
        type_section(&mut out, "Object types", objects);
        type_section(&mut out, "Sub-element types", elements);
        out
    }

    /// Format stored objects and the sub-elements linked to them.
    pub fn objects(rows: &[ObjectRow]) -> String {
        if rows.is_empty() {
            return "No stored objects\n".to_owned();
        }
        let mut out = String::new();
        for row in rows {
            writeln!(out, "{} #{} refs={}", row.type_name, row.ref_id, row.ref_count)
                .expect("write object");
            for (name, id) in &row.sub_elements {
                writeln!(out, "  - {name} #{id}").expect("write sub-element");
            }
        }
        out
    }
}

/// Inspect and seed world databases.
#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect world databases", long_about = None)]
struct Cli {
    /// Path to the world database file.
    #[arg(value_name = "DB")]
    database: PathBuf,

    /// JSON world configuration; its storage is replaced by DB.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the object and sub-element types recorded in the database.
    Types,
    /// List stored objects with their reference counts and sub-elements.
    Objects,
    /// Write a new database holding a few dummies with collision shapes.
    Demo {
        /// Number of dummy objects to create.
        #[arg(short = 'n', long, default_value_t = 3)]
        count: u32,
        /// Replace an existing database file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective world configuration as JSON.
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), &cli.database)?;
    let catalog = TypeCatalog::with_builtin_types();

    match cli.command {
        Command::Types => {
            let mut world = open_world(config, &catalog, &cli.database)?;
            let objects = type_rows(&mut world, SELECT_OBJECT_TYPES)?;
            let elements = type_rows(&mut world, SELECT_SUB_ELEMENT_TYPES)?;
            print!("{}", render::types(&objects, &elements));
        }
        Command::Objects => {
            let mut world = open_world(config, &catalog, &cli.database)?;
            let rows = object_rows(&mut world)?;
            print!("{}", render::objects(&rows));
        }
        Command::Demo { count, force } => {
            write_demo(config, &catalog, &cli.database, count, force)?;
        }
        Command::Config => println!("{}", config.to_json_string()?),
    }
    Ok(())
}

fn load_config(path: Option<&Path>, database: &Path) -> Result<WorldConfig> {
    let config = match path {
        Some(path) => WorldConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration {path:?}"))?,
        None => WorldConfig::default(),
    };
    Ok(WorldConfig {
        storage: WorldConfig::file(database).storage,
        ..config
    })
}

fn open_world(config: WorldConfig, catalog: &TypeCatalog, database: &Path) -> Result<World> {
    if !database.exists() {
        bail!("world database {database:?} does not exist");
    }
    World::open(config, catalog).with_context(|| format!("failed to open {database:?}"))
}

fn type_rows(world: &mut World, sql: &str) -> Result<Vec<TypeRow>> {
    let mut rows = world.select_rows(sql, Vec::new(), |query| TypeRow {
        local_id: query.column("LocalId").unwrap_or_default(),
        name: query.column("Name").unwrap_or_default(),
        identifier: query.column("Identifier").unwrap_or_default(),
        table: query.column("DatabaseTable").unwrap_or_default(),
        rows: 0,
    })?;
    for row in &mut rows {
        if world.table_exists(&row.table)? {
            let count = format!("SELECT COUNT(*) FROM {}", quote_literal(&row.table));
            row.rows = world
                .select_row(&count, Vec::new(), |query| query.column::<i64>(0usize))?
                .flatten()
                .unwrap_or_default();
        }
    }
    Ok(rows)
}

fn object_rows(world: &mut World) -> Result<Vec<ObjectRow>> {
    let element_names: HashMap<u32, String> = type_rows(world, SELECT_SUB_ELEMENT_TYPES)?
        .into_iter()
        .map(|row| (row.local_id, row.name))
        .collect();

    let mut objects = Vec::new();
    for object_type in type_rows(world, SELECT_OBJECT_TYPES)? {
        if object_type.rows == 0 {
            continue;
        }
        let sql = format!(
            "SELECT RefId, RefCount FROM {} ORDER BY RefId",
            quote_literal(&object_type.table)
        );
        let stored = world.select_rows(&sql, Vec::new(), |query| {
            (
                query.column::<u32>("RefId").unwrap_or_default(),
                query.column::<i32>("RefCount").unwrap_or_default(),
            )
        })?;
        for (ref_id, ref_count) in stored {
            let sub_elements = world.select_rows(SELECT_LINKS, vec![ref_id.into_param()], |query| {
                let local_id = query.column::<u32>("SubElementTypeId").unwrap_or_default();
                let name = element_names
                    .get(&local_id)
                    .cloned()
                    .unwrap_or_else(|| format!("<type {local_id}>"));
                (name, query.column::<u32>("SubElementId").unwrap_or_default())
            })?;
            objects.push(ObjectRow {
                type_name: object_type.name.clone(),
                ref_id,
                ref_count,
                sub_elements,
            });
        }
    }
    Ok(objects)
}

fn write_demo(
    config: WorldConfig,
    catalog: &TypeCatalog,
    database: &Path,
    count: u32,
    force: bool,
) -> Result<()> {
    if database.exists() {
        if !force {
            bail!("{database:?} already exists (use --force to replace it)");
        }
        fs::remove_file(database).with_context(|| format!("failed to remove {database:?}"))?;
    }

    let mut world = World::create(config, catalog)?;
    for index in 0..count {
        let object = world.create_object(false, RTID_DUMMY_OBJECT)?;
        world.add_reference(object.key(), None, false);
        let shape = if index % 2 == 0 {
            RTID_BOX_COLLISION_SHAPE
        } else {
            RTID_SPHERE_COLLISION_SHAPE
        };
        object
            .borrow_mut()
            .create_sub_element(&mut world, OSECID_COLLISION_SHAPES, shape)?;
    }
    world.dispose();
    info!("wrote {count} demo object(s) to {database:?}");
    println!("Wrote {count} dummy object(s) to {}", database.display());
    Ok(())
}
