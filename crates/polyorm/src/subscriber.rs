//! Entity write subscribers.
//!
//! Subscribers are registered on the [`DataSource`](crate::DataSource) and fire
//! around builder writes when `call_listeners` is on (the default). Every hook
//! has a no-op default, so an implementation only overrides what it needs.
//!
//! ```ignore
//! struct Audit;
//!
//! #[async_trait]
//! impl EntitySubscriber for Audit {
//!     fn listen_to(&self) -> Option<&str> {
//!         Some("Post")
//!     }
//!
//!     async fn before_insert(&self, event: &mut WriteEvent) -> OrmResult<()> {
//!         for row in &mut event.values {
//!             row.insert("createdBy".into(), "system".into());
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::OrmResult;
use crate::metadata::EntityMetadata;
use crate::qb::{QueryType, ValueSet};
use crate::row::Row;
use async_trait::async_trait;
use std::sync::Arc;

/// What a write hook sees.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub entity: Arc<EntityMetadata>,
    pub query_type: QueryType,
    /// Inserted rows or the SET list; before-hooks may modify them
    pub values: Vec<ValueSet>,
    /// Rows affected, once the statement ran
    pub affected: Option<u64>,
    /// Generated values per written row, once the statement ran
    pub generated: Vec<Row>,
}

impl WriteEvent {
    pub(crate) fn new(entity: Arc<EntityMetadata>, query_type: QueryType, values: Vec<ValueSet>) -> Self {
        Self {
            entity,
            query_type,
            values,
            affected: None,
            generated: Vec::new(),
        }
    }
}

/// Hooks around entity writes.
///
/// Errors returned by a before-hook abort the write; errors from an after-hook
/// fail the write (and roll back its automatic transaction).
#[async_trait]
pub trait EntitySubscriber: Send + Sync {
    /// Entity name this subscriber is limited to; `None` listens to all.
    fn listen_to(&self) -> Option<&str> {
        None
    }

    async fn before_insert(&self, _event: &mut WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn after_insert(&self, _event: &WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_update(&self, _event: &mut WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn after_update(&self, _event: &WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_remove(&self, _event: &mut WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn after_remove(&self, _event: &WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_soft_remove(&self, _event: &mut WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn after_soft_remove(&self, _event: &WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn before_recover(&self, _event: &mut WriteEvent) -> OrmResult<()> {
        Ok(())
    }

    async fn after_recover(&self, _event: &WriteEvent) -> OrmResult<()> {
        Ok(())
    }
}

fn listens(subscriber: &dyn EntitySubscriber, entity: &EntityMetadata) -> bool {
    subscriber.listen_to().is_none_or(|name| name == entity.name)
}

/// Fire the before-hook matching the event's query type, in registration order.
pub(crate) async fn broadcast_before(
    subscribers: &[Arc<dyn EntitySubscriber>],
    event: &mut WriteEvent,
) -> OrmResult<()> {
    for subscriber in subscribers {
        if !listens(subscriber.as_ref(), &event.entity) {
            continue;
        }
        match event.query_type {
            QueryType::Insert => subscriber.before_insert(event).await?,
            QueryType::Update => subscriber.before_update(event).await?,
            QueryType::Delete => subscriber.before_remove(event).await?,
            QueryType::SoftDelete => subscriber.before_soft_remove(event).await?,
            QueryType::Restore => subscriber.before_recover(event).await?,
            QueryType::Select | QueryType::Relation => {}
        }
    }
    Ok(())
}

/// Fire the after-hook matching the event's query type, in registration order.
pub(crate) async fn broadcast_after(
    subscribers: &[Arc<dyn EntitySubscriber>],
    event: &WriteEvent,
) -> OrmResult<()> {
    for subscriber in subscribers {
        if !listens(subscriber.as_ref(), &event.entity) {
            continue;
        }
        match event.query_type {
            QueryType::Insert => subscriber.after_insert(event).await?,
            QueryType::Update => subscriber.after_update(event).await?,
            QueryType::Delete => subscriber.after_remove(event).await?,
            QueryType::SoftDelete => subscriber.after_soft_remove(event).await?,
            QueryType::Restore => subscriber.after_recover(event).await?,
            QueryType::Select | QueryType::Relation => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnMetadata, EntityMetadata};
    use std::sync::Mutex;

    struct Recorder {
        only: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EntitySubscriber for Recorder {
        fn listen_to(&self) -> Option<&str> {
            self.only
        }

        async fn before_insert(&self, event: &mut WriteEvent) -> OrmResult<()> {
            self.seen.lock().unwrap().push(format!("before_insert:{}", event.entity.name));
            event.values.push(ValueSet::new().set("title", "added"));
            Ok(())
        }

        async fn after_remove(&self, event: &WriteEvent) -> OrmResult<()> {
            self.seen.lock().unwrap().push(format!("after_remove:{:?}", event.affected));
            Ok(())
        }
    }

    fn post() -> Arc<EntityMetadata> {
        Arc::new(EntityMetadata::new("Post", "post").column(ColumnMetadata::primary("id")))
    }

    #[tokio::test]
    async fn before_hooks_can_modify_values() {
        let recorder = Arc::new(Recorder {
            only: None,
            seen: Mutex::new(Vec::new()),
        });
        let subscribers: Vec<Arc<dyn EntitySubscriber>> = vec![recorder.clone()];
        let mut event = WriteEvent::new(post(), QueryType::Insert, Vec::new());

        broadcast_before(&subscribers, &mut event).await.unwrap();

        assert_eq!(event.values.len(), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["before_insert:Post"]);
    }

    #[tokio::test]
    async fn listen_to_filters_other_entities() {
        let recorder = Arc::new(Recorder {
            only: Some("User"),
            seen: Mutex::new(Vec::new()),
        });
        let subscribers: Vec<Arc<dyn EntitySubscriber>> = vec![recorder.clone()];
        let mut event = WriteEvent::new(post(), QueryType::Delete, Vec::new());
        event.affected = Some(2);

        broadcast_after(&subscribers, &event).await.unwrap();

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn after_hook_dispatch_follows_query_type() {
        let recorder = Arc::new(Recorder {
            only: Some("Post"),
            seen: Mutex::new(Vec::new()),
        });
        let subscribers: Vec<Arc<dyn EntitySubscriber>> = vec![recorder.clone()];
        let mut event = WriteEvent::new(post(), QueryType::Delete, Vec::new());
        event.affected = Some(2);

        broadcast_after(&subscribers, &event).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["after_remove:Some(2)"]);
    }
}
