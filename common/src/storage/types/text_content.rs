use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::file_info::FileInfo;

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Deserialize, Serialize)]
pub struct TextContentSearchResult {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub created_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub updated_at: DateTime<Utc>,

    pub text: String,
    #[serde(default)]
    pub file_info: Option<FileInfo>,
    #[serde(default)]
    pub url_info: Option<UrlInfo>,
    #[serde(default)]
    pub context: Option<String>,
    pub category: String,
    pub user_id: String,

    pub score: f32,
    // Highlighted fields from the query aliases
    #[serde(default)]
    pub highlighted_text: Option<String>,
    #[serde(default)]
    pub highlighted_category: Option<String>,
    #[serde(default)]
    pub highlighted_context: Option<String>,
    #[serde(default)]
    pub highlighted_file_name: Option<String>,
    #[serde(default)]
    pub highlighted_url: Option<String>,
    #[serde(default)]
    pub highlighted_url_title: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UrlInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image_id: String,
}

stored_object!(TextContent, "text_content", {
    text: String,
    file_info: Option<FileInfo>,
    url_info: Option<UrlInfo>,
    context: Option<String>,
    category: String,
    user_id: String
});

impl TextContent {
    pub fn new(
        text: String,
        context: Option<String>,
        category: String,
        file_info: Option<FileInfo>,
        url_info: Option<UrlInfo>,
        user_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            text,
            file_info,
            url_info,
            context,
            category,
            user_id,
        }
    }

    pub async fn patch(
        id: &str,
        context: &str,
        category: &str,
        text: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let now = Utc::now();

        let _res: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/context", context))
            .patch(PatchOp::replace("/category", category))
            .patch(PatchOp::replace("/text", text))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(now),
            ))
            .await?;

        Ok(())
    }

    pub async fn has_other_with_file(
        file_id: &str,
        exclude_id: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT VALUE id FROM type::table($table_name) WHERE file_info.id = $file_id AND id != type::thing($table_name, $exclude_id) LIMIT 1",
            )
            .bind(("table_name", TextContent::table_name()))
            .bind(("file_id", file_id.to_owned()))
            .bind(("exclude_id", exclude_id.to_owned()))
            .await?;

        let existing: Option<surrealdb::sql::Thing> = response.take(0)?;

        Ok(existing.is_some())
    }

    pub async fn search(
        db: &SurrealDbClient,
        search_terms: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TextContentSearchResult>, AppError> {
        let sql = r#"
            SELECT
                *, 
                search::highlight('<b>', '</b>', 0) AS highlighted_text,
                search::highlight('<b>', '</b>', 1) AS highlighted_category,
                search::highlight('<b>', '</b>', 2) AS highlighted_context,
                search::highlight('<b>', '</b>', 3) AS highlighted_file_name, 
                search::highlight('<b>', '</b>', 4) AS highlighted_url,       
                search::highlight('<b>', '</b>', 5) AS highlighted_url_title, 
                (
                    IF search::score(0) != NONE THEN search::score(0) ELSE 0 END +  
                    IF search::score(1) != NONE THEN search::score(1) ELSE 0 END +  
                    IF search::score(2) != NONE THEN search::score(2) ELSE 0 END +  
                    IF search::score(3) != NONE THEN search::score(3) ELSE 0 END +  
                    IF search::score(4) != NONE THEN search::score(4) ELSE 0 END +  
                    IF search::score(5) != NONE THEN search::score(5) ELSE 0 END    
                ) AS score  
            FROM text_content
            WHERE
                (
                    text @0@ $terms OR
                    category @1@ $terms OR
                    context @2@ $terms OR
                    file_info.file_name @3@ $terms OR
                    url_info.url @4@ $terms OR
                    url_info.title @5@ $terms
                )
                AND user_id = $user_id
            ORDER BY score DESC
            LIMIT $limit;
        "#;

        Ok(db
            .client
            .query(sql)
            .bind(("terms", search_terms.to_owned()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }
}
