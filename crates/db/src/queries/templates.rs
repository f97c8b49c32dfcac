//! Template database operations.

use sqlx::PgPool;
use uuid::Uuid;

use courier_core::template::Template;
use courier_core::{Error, Result};

use crate::models::TemplateRow;

pub async fn create(pool: &PgPool, template: &Template) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO templates (id, name, channel, body, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(template.id)
    .bind(&template.name)
    .bind(template.channel.as_str())
    .bind(&template.body)
    .bind(template.created_at)
    .bind(template.updated_at)
    .execute(pool)
    .await
    .map_err(map_duplicate_name)?;

    Ok(())
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Template> {
    let row = sqlx::query_as::<_, TemplateRow>(
        "SELECT id, name, channel, body, created_at, updated_at FROM templates WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(Error::TemplateNotFound)?;

    row.try_into()
}

pub async fn list(pool: &PgPool) -> Result<Vec<Template>> {
    let rows = sqlx::query_as::<_, TemplateRow>(
        "SELECT id, name, channel, body, created_at, updated_at FROM templates \
         ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

fn map_duplicate_name(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505")
            && db_err.constraint().is_some_and(|c| c.contains("name"))
        {
            return Error::DuplicateTemplateName;
        }
    }
    Error::Database(err)
}
