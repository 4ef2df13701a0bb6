//! Result shaping: turns a raw backend `Outcome` into a publishable value.

use docbridge_core::{ResultShape, Value};

use crate::backend::{BackendError, Outcome};
use crate::traits::Cursor;

/// How an outcome is shaped, one variant per result-shape category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStrategy {
    /// Drain the cursor into one ordered array.
    DrainCursor,
    /// Keep only the acknowledgment's public fields.
    WriteFields,
    /// Publish the outcome as returned.
    Passthrough,
}

impl From<ResultShape> for ResultStrategy {
    fn from(shape: ResultShape) -> Self {
        match shape {
            ResultShape::List => Self::DrainCursor,
            ResultShape::WriteResult => Self::WriteFields,
            ResultShape::SingleValue => Self::Passthrough,
        }
    }
}

impl ResultStrategy {
    /// Shape `outcome`. `None` means the operation produced nothing to publish.
    ///
    /// Cursors are drained whatever the strategy, since an open cursor has no
    /// payload representation.
    ///
    /// # Errors
    ///
    /// Propagates cursor failures raised while draining.
    pub async fn apply(self, outcome: Outcome) -> Result<Option<Value>, BackendError> {
        let shaped = match (self, outcome) {
            (_, Outcome::Cursor(cursor)) => Value::Array(drain(cursor).await?),
            (_, Outcome::Value(Value::Null)) => return Ok(None),
            (_, Outcome::Value(value)) => value,
            (Self::Passthrough, Outcome::Write(ack)) => Value::Document(ack.to_document()),
            (Self::WriteFields | Self::DrainCursor, Outcome::Write(ack)) => {
                Value::Document(ack.public_fields())
            }
        };
        Ok(Some(shaped))
    }
}

async fn drain(mut cursor: Box<dyn Cursor>) -> Result<Vec<Value>, BackendError> {
    let mut items = Vec::new();
    while let Some(batch) = cursor.next_batch().await? {
        items.extend(batch);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use docbridge_core::Document;

    use super::*;
    use crate::backend::{VecCursor, WriteAck};

    fn delete_ack() -> WriteAck {
        let mut raw = Document::new();
        raw.insert("n".to_string(), Value::Int(2));
        WriteAck::Delete {
            acknowledged: true,
            deleted_count: 2,
            raw_result: raw,
        }
    }

    #[test]
    fn strategy_follows_shape() {
        assert_eq!(ResultStrategy::from(ResultShape::List), ResultStrategy::DrainCursor);
        assert_eq!(ResultStrategy::from(ResultShape::WriteResult), ResultStrategy::WriteFields);
        assert_eq!(ResultStrategy::from(ResultShape::SingleValue), ResultStrategy::Passthrough);
    }

    #[tokio::test]
    async fn drains_every_batch_in_order() {
        let items: Vec<Value> = (0..250).map(Value::Int).collect();
        let cursor = VecCursor::new(items.clone(), 7);
        let shaped = ResultStrategy::DrainCursor
            .apply(Outcome::Cursor(Box::new(cursor)))
            .await
            .unwrap();
        assert_eq!(shaped, Some(Value::Array(items)));
    }

    #[tokio::test]
    async fn empty_cursor_is_an_empty_list() {
        let cursor = VecCursor::new(Vec::new(), 10);
        let shaped = ResultStrategy::DrainCursor
            .apply(Outcome::Cursor(Box::new(cursor)))
            .await
            .unwrap();
        assert_eq!(shaped, Some(Value::Array(Vec::new())));
    }

    #[tokio::test]
    async fn write_fields_drop_raw_result() {
        let shaped = ResultStrategy::WriteFields
            .apply(Outcome::Write(delete_ack()))
            .await
            .unwrap();
        let Some(Value::Document(doc)) = shaped else {
            panic!("expected a document");
        };
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["deleted_count"], Value::Int(2));
        assert_eq!(doc["acknowledged"], Value::Bool(true));
    }

    #[tokio::test]
    async fn passthrough_keeps_values() {
        let shaped = ResultStrategy::Passthrough
            .apply(Outcome::Value(Value::Int(7)))
            .await
            .unwrap();
        assert_eq!(shaped, Some(Value::Int(7)));

        let shaped = ResultStrategy::Passthrough
            .apply(Outcome::Write(delete_ack()))
            .await
            .unwrap();
        assert!(matches!(shaped, Some(Value::Document(ref d)) if d.contains_key("raw_result")));
    }

    #[tokio::test]
    async fn null_means_nothing_to_publish() {
        for strategy in [
            ResultStrategy::DrainCursor,
            ResultStrategy::WriteFields,
            ResultStrategy::Passthrough,
        ] {
            assert_eq!(strategy.apply(Outcome::Value(Value::Null)).await.unwrap(), None);
        }
    }
}
