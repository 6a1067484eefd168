//! Reading back what a write produced.
//!
//! Dialects with `RETURNING`/`OUTPUT` hand generated values back with the
//! statement itself. Elsewhere the written rows are re-selected by primary key
//! after the write, inside the same runner (and transaction).

use crate::error::OrmResult;
use crate::metadata::{ColumnMetadata, EntityMetadata, Generation};
use crate::qb::alias::{AliasDescriptor, AliasType};
use crate::qb::condition::{Conjunction, FindWhere, WhereClause, WhereCondition};
use crate::qb::expression_map::{ExpressionMap, QueryType, ValueSet, WriteValue};
use crate::qb::operator::FindOperator;
use crate::row::Row;
use crate::value::Value;
use std::sync::Arc;

/// Value-set keys that address `column`: property path, property name, column name.
pub(crate) fn column_keys(column: &ColumnMetadata) -> Vec<&str> {
    let mut keys = vec![column.property_path.as_str()];
    for key in [column.property_name.as_str(), column.database_name.as_str()] {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// The concrete value a row provides for `column`, if any.
pub(crate) fn provided_value<'s>(set: &'s ValueSet, column: &ColumnMetadata) -> Option<&'s Value> {
    column_keys(column)
        .into_iter()
        .find_map(|key| match set.get(key) {
            Some(WriteValue::Value(value)) => Some(value),
            _ => None,
        })
}

/// Give UUID-generated primary columns a value when a row leaves them out, so
/// the written keys are known without a round trip.
pub(crate) fn fill_generated_uuids(entity: &EntityMetadata, value_sets: &mut [ValueSet]) {
    let columns: Vec<_> = entity
        .primary_columns()
        .filter(|c| c.generation == Some(Generation::Uuid))
        .collect();
    for set in value_sets.iter_mut() {
        for column in &columns {
            let provided = column_keys(column).into_iter().any(|key| set.get(key).is_some());
            if !provided {
                set.insert(
                    column.property_path.clone(),
                    WriteValue::Value(Value::Uuid(uuid::Uuid::new_v4())),
                );
            }
        }
    }
}

/// Primary keys of inserted rows, one [`Row`] per value set whose key is fully
/// known: from returned rows, from the values themselves, or from the driver's
/// first insert id counting up.
pub(crate) fn insert_identifiers(
    entity: &EntityMetadata,
    value_sets: &[ValueSet],
    returned: &[Row],
    last_insert_id: Option<i64>,
) -> Vec<Row> {
    let primary: Vec<_> = entity.primary_columns().collect();
    if primary.is_empty() {
        return Vec::new();
    }
    let mut identifiers = Vec::with_capacity(value_sets.len());
    'rows: for (i, set) in value_sets.iter().enumerate() {
        let mut pairs = Vec::with_capacity(primary.len());
        for column in &primary {
            let value = returned
                .get(i)
                .and_then(|row| row.get(&column.database_name))
                .cloned()
                .or_else(|| provided_value(set, column).cloned())
                .or_else(|| match (column.generation, last_insert_id) {
                    (Some(Generation::Increment), Some(first)) => Some(Value::Int(first + i as i64)),
                    _ => None,
                });
            match value {
                Some(value) => pairs.push((column.database_name.clone(), value)),
                None => continue 'rows,
            }
        }
        identifiers.push(Row::from_pairs(pairs));
    }
    identifiers
}

/// SELECT of `columns` for the rows whose primary keys are `identifiers`.
pub(crate) fn reload_map(
    alias: &str,
    entity: &Arc<EntityMetadata>,
    columns: &[&ColumnMetadata],
    identifiers: &[Row],
) -> OrmResult<ExpressionMap> {
    let mut map = ExpressionMap::new(QueryType::Select);
    map.create_alias(
        AliasDescriptor::new(AliasType::From)
            .named(alias)
            .entity(Arc::clone(entity)),
    )?;
    map.set_main_alias(alias)?;

    let primary: Vec<_> = entity.primary_columns().collect();
    let mut selected: Vec<&ColumnMetadata> = primary.clone();
    for column in columns {
        if !selected.iter().any(|c| c.database_name == column.database_name) {
            selected.push(column);
        }
    }
    for column in selected {
        map.add_select(
            format!("{alias}.{}", column.property_path),
            Some(column.database_name.clone()),
        );
    }

    let key_of = |row: &Row, column: &ColumnMetadata| row.get(&column.database_name).cloned().unwrap_or(Value::Null);
    let condition = match primary.as_slice() {
        [pk] => WhereCondition::from(FindWhere::new().op(
            pk.property_path.clone(),
            FindOperator::In(identifiers.iter().map(|row| key_of(row, pk)).collect()),
        )),
        _ => WhereCondition::from(
            identifiers
                .iter()
                .map(|row| {
                    primary
                        .iter()
                        .fold(FindWhere::new(), |w, pk| w.eq(pk.property_path.clone(), key_of(row, pk)))
                })
                .collect::<Vec<_>>(),
        ),
    };
    map.add_where(WhereClause {
        conjunction: Conjunction::None,
        condition,
    });
    // Written rows may be soft-deleted ones.
    map.with_deleted = true;
    Ok(map)
}

/// Put reloaded rows in the order of `identifiers`.
pub(crate) fn align_rows(entity: &EntityMetadata, identifiers: &[Row], mut rows: Vec<Row>) -> Vec<Row> {
    let primary: Vec<_> = entity.primary_columns().collect();
    let mut aligned = Vec::with_capacity(rows.len());
    for id in identifiers {
        let position = rows.iter().position(|row| {
            primary
                .iter()
                .all(|pk| same_key(row.get(&pk.database_name), id.get(&pk.database_name)))
        });
        if let Some(position) = position {
            aligned.push(rows.swap_remove(position));
        }
    }
    aligned.extend(rows);
    aligned
}

/// Key equality that tolerates drivers widening integer and text types.
fn same_key(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => false,
    }
}
