use surrealdb::RecordId;

use crate::storage::types::text_chunk::TextChunk;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(TextChunkEmbedding, "text_chunk_embedding", {
    /// Record link to the owning text_chunk
    chunk_id: RecordId,
    /// Denormalized source id for bulk deletes
    source_id: String,
    /// Embedding vector
    embedding: Vec<f32>,
    /// Denormalized user id (for scoping + permissions)
    user_id: String
});

impl TextChunkEmbedding {
    /// Recreate the HNSW index with a new embedding dimension.
    ///
    /// This is useful when the embedding length changes; Surreal requires the
    /// index definition to be recreated with the updated dimension.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_embedding_text_chunk_embedding ON TABLE {table};
             DEFINE INDEX idx_embedding_text_chunk_embedding ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Create a new text chunk embedding
    ///
    /// `chunk_id` is the **key** part of the text_chunk id (e.g. the UUID),
    /// not "text_chunk:uuid".
    pub fn new(chunk_id: &str, source_id: String, embedding: Vec<f32>, user_id: String) -> Self {
        let now = Utc::now();

        Self {
            // NOTE: `stored_object!` macro defines `id` as `String`
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            // Create a record<text_chunk> link: text_chunk:<chunk_id>
            chunk_id: RecordId::from_table_key(TextChunk::table_name(), chunk_id),
            source_id,
            embedding,
            user_id,
        }
    }

    /// Get a single embedding by its chunk RecordId
    pub async fn get_by_chunk_id(
        chunk_id: &RecordId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT * FROM {} WHERE chunk_id = $chunk_id LIMIT 1",
            Self::table_name()
        );

        let mut result = db
            .client
            .query(query)
            .bind(("chunk_id", chunk_id.clone()))
            .await
            .map_err(AppError::Database)?;

        let embeddings: Vec<Self> = result.take(0).map_err(AppError::Database)?;

        Ok(embeddings.into_iter().next())
    }

    /// Delete embeddings for a given chunk RecordId
    pub async fn delete_by_chunk_id(
        chunk_id: &RecordId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE FROM {} WHERE chunk_id = $chunk_id",
            Self::table_name()
        );

        db.client
            .query(query)
            .bind(("chunk_id", chunk_id.clone()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete all embeddings that belong to chunks with a given `source_id`
    ///
    /// This uses a subquery to the `text_chunk` table:
    ///
    /// DELETE FROM text_chunk_embedding
    /// WHERE chunk_id IN (SELECT id FROM text_chunk WHERE source_id = $source_id)
    pub async fn delete_by_source_id(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        #[allow(clippy::missing_docs_in_private_items)]
        #[derive(Deserialize)]
        struct IdRow {
            id: RecordId,
        }
        let ids_query = format!(
            "SELECT id FROM {} WHERE source_id = $source_id",
            TextChunk::table_name()
        );
        let mut res = db
            .client
            .query(ids_query)
            .bind(("source_id", source_id.to_owned()))
            .await
            .map_err(AppError::Database)?;
        let ids: Vec<IdRow> = res.take(0).map_err(AppError::Database)?;

        if ids.is_empty() {
            return Ok(());
        }
        let delete_query = format!(
            "DELETE FROM {} WHERE chunk_id IN $chunk_ids",
            Self::table_name()
        );
        db.client
            .query(delete_query)
            .bind((
                "chunk_ids",
                ids.into_iter().map(|row| row.id).collect::<Vec<_>>(),
            ))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }
}
