//! Entity metadata graph.
//!
//! Entities, columns and relations are described here once and looked up by the
//! query builders through a [`MetadataRegistry`]. Nothing in this module talks to
//! a database; it is the read-only model that property paths resolve against.
//!
//! ```ignore
//! use polyorm::metadata::{ColumnMetadata, EntityMetadata, MetadataRegistry};
//!
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     EntityMetadata::new("Post", "post")
//!         .column(ColumnMetadata::primary("id").generated())
//!         .column(ColumnMetadata::new("title"))
//!         .column(ColumnMetadata::new("viewCount"))
//!         .column(ColumnMetadata::new("deletedAt").delete_date()),
//! );
//! ```

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Converts property values to database values and back.
pub trait ValueTransformer: Send + Sync {
    fn to_database(&self, value: Value) -> Value;

    fn from_database(&self, value: Value) -> Value {
        value
    }
}

/// How the database fills a column on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Increment,
    Uuid,
}

/// One mapped column.
#[derive(Clone)]
pub struct ColumnMetadata {
    /// Property name on the entity (last segment of `property_path`)
    pub property_name: String,
    /// Dotted path from the entity root, e.g. `counters.likes` for embedded columns
    pub property_path: String,
    pub database_name: String,
    pub is_primary: bool,
    pub is_unique: bool,
    pub is_nullable: bool,
    pub generation: Option<Generation>,
    pub is_create_date: bool,
    pub is_update_date: bool,
    pub is_delete_date: bool,
    pub is_version: bool,
    pub is_discriminator: bool,
    pub transformer: Option<Arc<dyn ValueTransformer>>,
}

impl fmt::Debug for ColumnMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMetadata")
            .field("property_path", &self.property_path)
            .field("database_name", &self.database_name)
            .field("is_primary", &self.is_primary)
            .field("generation", &self.generation)
            .field("has_transformer", &self.transformer.is_some())
            .finish_non_exhaustive()
    }
}

impl ColumnMetadata {
    /// Column whose database name equals its property name.
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self {
            property_path: property.clone(),
            database_name: property.clone(),
            property_name: property,
            is_primary: false,
            is_unique: false,
            is_nullable: false,
            generation: None,
            is_create_date: false,
            is_update_date: false,
            is_delete_date: false,
            is_version: false,
            is_discriminator: false,
            transformer: None,
        }
    }

    /// Primary key column.
    pub fn primary(property: impl Into<String>) -> Self {
        let mut col = Self::new(property);
        col.is_primary = true;
        col
    }

    /// Override the database column name.
    pub fn named(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }

    /// Place the column inside an embedded object (`prefix.property`).
    pub fn embedded_in(mut self, prefix: &str) -> Self {
        self.property_path = format!("{prefix}.{}", self.property_name);
        self
    }

    /// Auto-increment primary key.
    pub fn generated(mut self) -> Self {
        self.generation = Some(Generation::Increment);
        self
    }

    /// Database-generated UUID.
    pub fn generated_uuid(mut self) -> Self {
        self.generation = Some(Generation::Uuid);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn create_date(mut self) -> Self {
        self.is_create_date = true;
        self
    }

    pub fn update_date(mut self) -> Self {
        self.is_update_date = true;
        self
    }

    /// Soft-delete timestamp column.
    pub fn delete_date(mut self) -> Self {
        self.is_delete_date = true;
        self.is_nullable = true;
        self
    }

    pub fn version(mut self) -> Self {
        self.is_version = true;
        self
    }

    pub fn discriminator(mut self) -> Self {
        self.is_discriminator = true;
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn ValueTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generation.is_some()
    }

    /// Apply the column transformer to an outgoing value.
    pub fn to_database(&self, value: Value) -> Value {
        match &self.transformer {
            Some(t) => t.to_database(value),
            None => value,
        }
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// A foreign-key column paired with the column it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    /// Foreign-key column (database name)
    pub name: String,
    /// Referenced column (database name)
    pub referenced: String,
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced: referenced.into(),
        }
    }
}

/// Junction table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionMetadata {
    pub table_path: String,
    /// Junction columns referencing the owning entity
    pub owner_columns: Vec<JoinColumn>,
    /// Junction columns referencing the related entity
    pub inverse_columns: Vec<JoinColumn>,
}

/// One relation property.
///
/// For owner-side `ManyToOne`/`OneToOne` the join columns live on this entity's
/// table. For `OneToMany` and inverse `OneToOne` they live on the target's table
/// and reference this entity. `ManyToMany` goes through `junction`.
#[derive(Debug, Clone)]
pub struct RelationMetadata {
    pub property_path: String,
    pub kind: RelationKind,
    /// Name of the related entity
    pub target: String,
    pub is_owner: bool,
    pub join_columns: Vec<JoinColumn>,
    pub junction: Option<JunctionMetadata>,
}

impl RelationMetadata {
    /// Owner side `ManyToOne` with join columns on this entity.
    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>, join_columns: Vec<JoinColumn>) -> Self {
        Self {
            property_path: property.into(),
            kind: RelationKind::ManyToOne,
            target: target.into(),
            is_owner: true,
            join_columns,
            junction: None,
        }
    }

    /// Owner side `OneToOne` with join columns on this entity.
    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>, join_columns: Vec<JoinColumn>) -> Self {
        Self {
            kind: RelationKind::OneToOne,
            ..Self::many_to_one(property, target, join_columns)
        }
    }

    /// Inverse side `OneToMany`; `join_columns` are the target's foreign keys.
    pub fn one_to_many(property: impl Into<String>, target: impl Into<String>, join_columns: Vec<JoinColumn>) -> Self {
        Self {
            property_path: property.into(),
            kind: RelationKind::OneToMany,
            target: target.into(),
            is_owner: false,
            join_columns,
            junction: None,
        }
    }

    /// `ManyToMany` through a junction table.
    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>, junction: JunctionMetadata) -> Self {
        Self {
            property_path: property.into(),
            kind: RelationKind::ManyToMany,
            target: target.into(),
            is_owner: true,
            join_columns: Vec::new(),
            junction: Some(junction),
        }
    }

    /// Join columns stored on the owning entity's own table.
    pub fn owns_join_columns(&self) -> bool {
        self.is_owner && matches!(self.kind, RelationKind::ManyToOne | RelationKind::OneToOne)
    }
}

/// Single-table inheritance information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inheritance {
    /// Discriminator column (database name)
    pub column: String,
    /// This entity's discriminator value followed by its descendants' values
    pub values: Vec<String>,
    /// Root entities see every row of the table
    pub is_root: bool,
}

/// One mapped entity.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: String,
    /// Table name, optionally schema-qualified (`public.post`)
    pub table_path: String,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<RelationMetadata>,
    pub inheritance: Option<Inheritance>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>, table_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_path: table_path.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            inheritance: None,
        }
    }

    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relations.push(relation);
        self
    }

    /// Mark as a child in single-table inheritance.
    pub fn child_of(mut self, column: impl Into<String>, values: &[&str]) -> Self {
        self.inheritance = Some(Inheritance {
            column: column.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
            is_root: false,
        });
        self
    }

    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_primary)
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary)
    }

    pub fn delete_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_delete_date)
    }

    pub fn update_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_update_date)
    }

    pub fn version_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_version)
    }

    pub fn find_column_with_database_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.database_name == name)
    }

    pub fn find_column_with_property_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.property_name == name && c.property_path == name)
    }

    pub fn find_column_with_property_path(&self, path: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.property_path == path)
    }

    /// Columns of an embedded object (`prefix.*`).
    pub fn find_embedded_columns(&self, prefix: &str) -> Vec<&ColumnMetadata> {
        self.columns
            .iter()
            .filter(|c| {
                c.property_path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
            })
            .collect()
    }

    pub fn find_relation_with_property_path(&self, path: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.property_path == path)
    }
}

/// Registry of entity metadata, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any previous entity of the same name.
    pub fn register(&mut self, entity: EntityMetadata) -> Arc<EntityMetadata> {
        let entity = Arc::new(entity);
        self.entities.insert(entity.name.clone(), Arc::clone(&entity));
        entity
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Option<&Arc<EntityMetadata>> {
        self.entities.get(name)
    }

    /// Look up an entity by its table path.
    pub fn find_by_table(&self, table_path: &str) -> Option<&Arc<EntityMetadata>> {
        self.entities.values().find(|e| e.table_path == table_path)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
