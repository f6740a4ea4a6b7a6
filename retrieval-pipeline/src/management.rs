//! Management Surface (C13): confirmed destructive clear with a mandatory
//! pre-backup, JSON/Cypher-shaped export, and a dependency health probe.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager},
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

const CONFIRMATION_CODE: &str = "DELETE_ALL_DATA";
const EXPORT_RECORD_CAP: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct ExportResult {
    pub export_id: String,
    pub download_path: String,
    pub size_bytes: usize,
    pub record_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub backup: Option<ExportResult>,
    pub cleared: bool,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub connection: bool,
    pub latency_ms: u64,
    pub issues: Vec<String>,
}

pub struct ManagementSurface {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
}

impl ManagementSurface {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager) -> Self {
        Self { db, storage }
    }

    /// Writes a capped dump of entities and relations through the storage
    /// abstraction and returns where it landed.
    pub async fn export(&self, format: &str) -> Result<ExportResult, AppError> {
        let entities: Vec<serde_json::Value> = self
            .db
            .client
            .select("knowledge_entity")
            .await
            .map_err(AppError::from)?;
        let relations: Vec<serde_json::Value> = self
            .db
            .client
            .select("relates_to")
            .await
            .map_err(AppError::from)?;

        let capped_entities: Vec<_> = entities.into_iter().take(EXPORT_RECORD_CAP).collect();
        let remaining = EXPORT_RECORD_CAP.saturating_sub(capped_entities.len());
        let capped_relations: Vec<_> = relations.into_iter().take(remaining).collect();
        let record_count = capped_entities.len() + capped_relations.len();

        let payload = if format == "cypher" {
            render_cypher(&capped_entities, &capped_relations)
        } else {
            serde_json::to_string_pretty(&json!({
                "entities": capped_entities,
                "relations": capped_relations,
            }))
            .map_err(|err| AppError::InternalError(err.to_string()))?
        };

        let export_id = Uuid::new_v4().to_string();
        let extension = if format == "cypher" { "cypher" } else { "json" };
        let download_path = format!("exports/{export_id}.{extension}");
        let size_bytes = payload.len();

        self.storage
            .put(&download_path, Bytes::from(payload))
            .await
            .map_err(|err| AppError::InternalError(err.to_string()))?;

        Ok(ExportResult {
            export_id,
            download_path,
            size_bytes,
            record_count,
        })
    }

    /// Refuses unless `confirm` is set and `code` matches exactly. Backs up
    /// first by default, per the mandatory-pre-backup invariant.
    pub async fn clear(
        &self,
        confirm: bool,
        code: &str,
        backup_first: bool,
    ) -> Result<ClearResult, AppError> {
        if !confirm || code != CONFIRMATION_CODE {
            return Err(AppError::Validation(format!(
                "clear requires confirm=true and code=\"{CONFIRMATION_CODE}\""
            )));
        }

        let backup = if backup_first {
            Some(self.export("json").await?)
        } else {
            None
        };

        self.db
            .client
            .query("DELETE relates_to; DELETE knowledge_entity;")
            .await
            .map_err(AppError::from)?;

        Ok(ClearResult {
            backup,
            cleared: true,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let start = Instant::now();
        let mut issues = Vec::new();

        let connection = match self.db.client.query("RETURN true").await {
            Ok(_) => true,
            Err(err) => {
                issues.push(format!("database: {err}"));
                false
            }
        };
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let status = if connection {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        HealthReport {
            status,
            connection,
            latency_ms,
            issues,
        }
    }
}

fn render_cypher(entities: &[serde_json::Value], relations: &[serde_json::Value]) -> String {
    let mut out = String::new();
    for entity in entities {
        out.push_str(&format!("CREATE (:Entity {entity});\n"));
    }
    for relation in relations {
        out.push_str(&format!("CREATE ()-[:RELATES_TO {relation}]->();\n"));
    }
    out
}
