use async_trait::async_trait;
use event_bus::EventBus;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    AggregateId, DomainEvent, EventEnvelope, EventStoreError, Result, Sequence, StoredEvent,
    store::{
        EventStore, TopicMapper, Transformer, decode_rows, publish, relay_message,
        validate_envelope,
    },
};

const EVENT_COLUMNS: &str = "aggregate_type, aggregate_id, sequence, event_type, event_version, payload, metadata, timestamp";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    instance_id: Option<String>,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            instance_id: None,
        }
    }

    /// Tags outbox entries with an instance id and restricts outbox reads
    /// to that id.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_stored(row: PgRow) -> Result<StoredEvent> {
        Ok(StoredEvent {
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: AggregateId::new(row.try_get::<String, _>("aggregate_id")?),
            sequence: Sequence::new(row.try_get::<String, _>("sequence")?),
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            payload: row.try_get("payload")?,
            metadata: row.try_get("metadata")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn map_insert_error(error: sqlx::Error, stored: &StoredEvent) -> EventStoreError {
        if let sqlx::Error::Database(ref db_err) = error
            && db_err.constraint() == Some("unique_aggregate_sequence")
        {
            return EventStoreError::DuplicateSequence {
                aggregate_id: stored.aggregate_id.clone(),
                sequence: stored.sequence.clone(),
            };
        }
        EventStoreError::Database(error)
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for PostgresEventStore {
    #[tracing::instrument(skip(self, aggregate_id), fields(aggregate_id = %aggregate_id))]
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE aggregate_id = $1)")
                .bind(aggregate_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(())
        } else {
            Err(EventStoreError::AggregateNotFound(aggregate_id.clone()))
        }
    }

    #[tracing::instrument(
        skip(self, envelope),
        fields(aggregate_id = %envelope.aggregate_id, sequence = %envelope.sequence)
    )]
    async fn store_event(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        let stored = envelope.to_stored()?;
        validate_envelope(&stored)?;

        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(&stored.aggregate_type)
        .bind(stored.aggregate_id.as_str())
        .bind(stored.sequence.as_str())
        .bind(&stored.event_type)
        .bind(&stored.event_version)
        .bind(&stored.payload)
        .bind(&stored.metadata)
        .bind(stored.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::map_insert_error(e, &stored))?;

        sqlx::query(&format!(
            "INSERT INTO outbox_events ({EVENT_COLUMNS}, instance_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&stored.aggregate_type)
        .bind(stored.aggregate_id.as_str())
        .bind(stored.sequence.as_str())
        .bind(&stored.event_type)
        .bind(&stored.event_version)
        .bind(&stored.payload)
        .bind(&stored.metadata)
        .bind(stored.timestamp)
        .bind(self.instance_id.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("event_store_events_stored_total").increment(1);
        Ok(())
    }

    #[tracing::instrument(skip(self, aggregate_id), fields(aggregate_id = %aggregate_id))]
    async fn retrieve_events(
        &self,
        aggregate_id: &AggregateId,
        after: Option<&Sequence>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE aggregate_id = $1 AND ($2::TEXT IS NULL OR sequence > $2)
            ORDER BY sequence ASC
            "#
        ))
        .bind(aggregate_id.as_str())
        .bind(after.map(Sequence::as_str))
        .fetch_all(&self.pool)
        .await?;

        let stored = rows
            .into_iter()
            .map(Self::row_to_stored)
            .collect::<Result<Vec<_>>>()?;
        decode_rows(stored)
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_outbox_events(&self) -> Result<Vec<EventEnvelope<E>>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM outbox_events
            WHERE ($1::TEXT IS NULL OR instance_id = $1)
            ORDER BY sequence ASC
            "#
        ))
        .bind(self.instance_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let stored = rows
            .into_iter()
            .map(Self::row_to_stored)
            .collect::<Result<Vec<_>>>()?;
        decode_rows(stored)
    }

    #[tracing::instrument(
        skip(self, envelope, bus, topic_mapper, transformer),
        fields(sequence = %envelope.sequence)
    )]
    async fn send_and_delete_outbox_event(
        &self,
        envelope: &EventEnvelope<E>,
        bus: &dyn EventBus,
        topic_mapper: &TopicMapper<E>,
        transformer: &Transformer<E>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Concurrent relays skip rows another relay is already publishing.
        let locked: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM outbox_events
            WHERE aggregate_id = $1 AND sequence = $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(envelope.aggregate_id.as_str())
        .bind(envelope.sequence.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            tracing::debug!("Outbox entry already relayed or claimed");
            return Ok(());
        }

        let (topic, message) = relay_message(envelope, topic_mapper, transformer)?;
        publish(bus, &topic, message).await?;

        sqlx::query("DELETE FROM outbox_events WHERE aggregate_id = $1 AND sequence = $2")
            .bind(envelope.aggregate_id.as_str())
            .bind(envelope.sequence.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
