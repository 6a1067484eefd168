//! Property-path resolution.
//!
//! A property path (`title`, `counters.likes`, `author`, `author.id`) resolves
//! against entity metadata to one or more physical columns. The most specific
//! match wins:
//!
//! 1. a column whose database name equals the path
//! 2. a top-level column whose property name equals the path
//! 3. a column whose property path equals the path (embedded columns)
//! 4. every column of an embedded object named by the path
//! 5. the owner-side join columns of a relation (`author`), or the single join
//!    column referencing a given target column (`author.id`)
//!
//! String conditions go through [`Assembler::compile_text`], which walks the
//! token stream from [`crate::sql::tokenize`] and only rewrites whole
//! `alias.path` identifier chains, so `id` is never matched inside `userId`.

use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, EntityMetadata, JoinColumn, MetadataRegistry};
use crate::qb::assembler::Assembler;
use crate::sql::{Sql, Token, tokenize};
use std::borrow::Cow;

/// A physical column a property path resolved to.
#[derive(Debug, Clone, Copy)]
pub enum ColumnTarget<'m> {
    Column(&'m ColumnMetadata),
    /// Foreign-key column of an owner-side relation
    JoinColumn(&'m JoinColumn),
}

impl<'m> ColumnTarget<'m> {
    pub fn database_name(&self) -> &'m str {
        match self {
            ColumnTarget::Column(c) => &c.database_name,
            ColumnTarget::JoinColumn(j) => &j.name,
        }
    }

    pub fn metadata(&self) -> Option<&'m ColumnMetadata> {
        match self {
            ColumnTarget::Column(c) => Some(c),
            ColumnTarget::JoinColumn(_) => None,
        }
    }
}

/// Resolve `path` on `entity`. An empty result means the path is unknown.
pub fn resolve_property<'m>(
    entity: &'m EntityMetadata,
    registry: &MetadataRegistry,
    path: &str,
) -> Vec<ColumnTarget<'m>> {
    if let Some(c) = entity.find_column_with_database_name(path) {
        return vec![ColumnTarget::Column(c)];
    }
    if let Some(c) = entity.find_column_with_property_name(path) {
        return vec![ColumnTarget::Column(c)];
    }
    if let Some(c) = entity.find_column_with_property_path(path) {
        return vec![ColumnTarget::Column(c)];
    }
    let embedded = entity.find_embedded_columns(path);
    if !embedded.is_empty() {
        return embedded.into_iter().map(ColumnTarget::Column).collect();
    }
    resolve_relation_columns(entity, registry, path)
}

fn resolve_relation_columns<'m>(
    entity: &'m EntityMetadata,
    registry: &MetadataRegistry,
    path: &str,
) -> Vec<ColumnTarget<'m>> {
    if let Some(relation) = entity.find_relation_with_property_path(path) {
        if relation.owns_join_columns() {
            return relation.join_columns.iter().map(ColumnTarget::JoinColumn).collect();
        }
        return Vec::new();
    }

    // `author.id`: the join column that references the target's `id` column
    let Some((relation_path, sub_path)) = path.rsplit_once('.') else {
        return Vec::new();
    };
    let Some(relation) = entity.find_relation_with_property_path(relation_path) else {
        return Vec::new();
    };
    if !relation.owns_join_columns() {
        return Vec::new();
    }
    let Some(target) = registry.get(&relation.target) else {
        return Vec::new();
    };
    let referenced = match target.find_column_with_property_path(sub_path) {
        Some(c) => c.database_name.as_str(),
        None => sub_path,
    };
    relation
        .join_columns
        .iter()
        .filter(|j| j.referenced == referenced)
        .map(ColumnTarget::JoinColumn)
        .collect()
}

impl Assembler<'_> {
    /// Compile user SQL text: `alias.path` chains of entity aliases become
    /// escaped column references, `:name` becomes a parameter reference,
    /// everything else passes through.
    pub(crate) fn compile_text(&self, text: &str) -> OrmResult<Sql> {
        let mut sql = Sql::empty();
        for token in tokenize(text) {
            match token {
                Token::Word(word) => {
                    sql.push(&self.replace_property_path(word)?);
                }
                Token::Param { name, spread: false } => {
                    sql.push_param(name);
                }
                Token::Param { name, spread: true } => {
                    sql.push_spread(name);
                }
                other => {
                    sql.push(other.text());
                }
            }
        }
        Ok(sql)
    }

    fn replace_property_path<'w>(&self, word: &'w str) -> OrmResult<Cow<'w, str>> {
        let Some((alias_name, path)) = word.split_once('.') else {
            return Ok(Cow::Borrowed(word));
        };
        let Some(alias) = self.map.find_alias(alias_name) else {
            return Ok(Cow::Borrowed(word));
        };
        let Some(entity) = alias.metadata.as_deref() else {
            return Ok(Cow::Borrowed(word));
        };
        let targets = resolve_property(entity, self.env.registry, path);
        match targets.as_slice() {
            [] => Err(OrmError::unknown_column(alias_name, path)),
            [target] => Ok(Cow::Owned(self.column_ref(alias_name, target.database_name()))),
            many => Err(OrmError::invalid_condition(format!(
                "'{word}' maps to {} columns and cannot be used in a string condition",
                many.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RelationMetadata;

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.register(
            EntityMetadata::new("User", "user")
                .column(ColumnMetadata::primary("id").named("user_id")),
        );
        registry.register(
            EntityMetadata::new("Post", "post")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("userId"))
                .column(ColumnMetadata::new("title").named("post_title"))
                .column(ColumnMetadata::new("likes").embedded_in("counters").named("countersLikes"))
                .column(ColumnMetadata::new("shares").embedded_in("counters").named("countersShares"))
                .relation(RelationMetadata::many_to_one(
                    "author",
                    "User",
                    vec![JoinColumn::new("authorId", "user_id")],
                )),
        );
        registry
    }

    fn names(targets: &[ColumnTarget<'_>]) -> Vec<String> {
        targets.iter().map(|t| t.database_name().to_string()).collect()
    }

    #[test]
    fn precedence_database_name_then_property() {
        let registry = registry();
        let post = registry.get("Post").unwrap();
        assert_eq!(names(&resolve_property(post, &registry, "post_title")), ["post_title"]);
        assert_eq!(names(&resolve_property(post, &registry, "title")), ["post_title"]);
        assert_eq!(names(&resolve_property(post, &registry, "counters.likes")), ["countersLikes"]);
        assert_eq!(
            names(&resolve_property(post, &registry, "counters")),
            ["countersLikes", "countersShares"]
        );
    }

    #[test]
    fn relation_paths_resolve_to_join_columns() {
        let registry = registry();
        let post = registry.get("Post").unwrap();
        assert_eq!(names(&resolve_property(post, &registry, "author")), ["authorId"]);
        assert_eq!(names(&resolve_property(post, &registry, "author.id")), ["authorId"]);
        assert!(resolve_property(post, &registry, "author.name").is_empty());
        assert!(resolve_property(post, &registry, "missing").is_empty());
    }
}
