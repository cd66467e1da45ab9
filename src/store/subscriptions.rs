use secrecy::ExposeSecret;
use secrecy::Secret;
use sqlx::PgPool;
use uuid::Uuid;

use super::WebhookSubscription;
use crate::domain::EventType;
use crate::queue::PgTransaction;

pub struct NewSubscription {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<EventType>,
    pub secret: Secret<String>,
}

fn event_strings(events: &[EventType]) -> Vec<String> {
    events.iter().map(|e| e.as_str().to_string()).collect()
}

pub async fn insert_subscription(
    tx: &mut PgTransaction,
    new: &NewSubscription,
) -> Result<WebhookSubscription, sqlx::Error> {
    sqlx::query_as::<_, WebhookSubscription>(
        r#"
        INSERT INTO webhooks (id, url, events, active, secret)
        VALUES ($1, $2, $3, TRUE, $4)
        RETURNING *
        "#,
    )
    .bind(new.id)
    .bind(&new.url)
    .bind(event_strings(&new.events))
    .bind(new.secret.expose_secret())
    .fetch_one(&mut **tx)
    .await
}

pub async fn get_subscription(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<WebhookSubscription>, sqlx::Error> {
    sqlx::query_as::<_, WebhookSubscription>("SELECT * FROM webhooks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_subscriptions(pool: &PgPool) -> Result<Vec<WebhookSubscription>, sqlx::Error> {
    sqlx::query_as::<_, WebhookSubscription>("SELECT * FROM webhooks ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
}

/// Partial update; absent fields keep their current values.
#[derive(Default)]
pub struct SubscriptionChanges {
    pub url: Option<String>,
    pub events: Option<Vec<EventType>>,
    pub active: Option<bool>,
}

pub async fn update_subscription(
    pool: &PgPool,
    id: Uuid,
    changes: &SubscriptionChanges,
) -> Result<Option<WebhookSubscription>, sqlx::Error> {
    sqlx::query_as::<_, WebhookSubscription>(
        r#"
        UPDATE webhooks
        SET url = COALESCE($2, url),
            events = COALESCE($3, events),
            active = COALESCE($4, active),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&changes.url)
    .bind(changes.events.as_deref().map(event_strings))
    .bind(changes.active)
    .fetch_optional(pool)
    .await
}

/// Deletes the subscription and, through the foreign key, its events.
pub async fn delete_subscription(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
