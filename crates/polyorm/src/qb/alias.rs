use crate::error::{OrmError, OrmResult};
use crate::metadata::EntityMetadata;
use crate::qb::expression_map::ExpressionMap;
use std::sync::Arc;

/// Role of an alias inside the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasType {
    From,
    Join,
    Other,
}

/// A named table, entity or sub-query reference.
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub alias_type: AliasType,
    pub metadata: Option<Arc<EntityMetadata>>,
    pub table_path: Option<String>,
    pub sub_query: Option<Box<ExpressionMap>>,
}

impl Alias {
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Entity metadata, or `MissingMetadata` for raw table / sub-query aliases.
    pub fn metadata(&self) -> OrmResult<&EntityMetadata> {
        self.metadata.as_deref().ok_or_else(|| OrmError::MissingMetadata {
            target: self.name.clone(),
        })
    }

    /// Physical table path: the entity's table, or the raw table name.
    pub fn table_path(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .map(|m| m.table_path.as_str())
            .or(self.table_path.as_deref())
    }
}

/// Input to [`ExpressionMap::create_alias`].
#[derive(Debug, Clone)]
pub struct AliasDescriptor {
    pub name: Option<String>,
    pub alias_type: AliasType,
    pub metadata: Option<Arc<EntityMetadata>>,
    pub table_path: Option<String>,
    pub sub_query: Option<Box<ExpressionMap>>,
}

impl AliasDescriptor {
    pub fn new(alias_type: AliasType) -> Self {
        Self {
            name: None,
            alias_type,
            metadata: None,
            table_path: None,
            sub_query: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn entity(mut self, metadata: Arc<EntityMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn table(mut self, table_path: impl Into<String>) -> Self {
        self.table_path = Some(table_path.into());
        self
    }

    pub fn sub_query(mut self, map: ExpressionMap) -> Self {
        self.sub_query = Some(Box::new(map));
        self
    }
}
