use serde_json::json;
use serde_json::Value;
use uuid::Uuid;

use crate::helpers::spawn_app;

fn payment_body() -> Value {
    json!({
        "amount": 99.99,
        "currency": "USD",
        "customer_email": "a@b.c",
    })
}

#[tokio::test]
async fn create_payment_returns_201_and_a_pending_payment() {
    let app = spawn_app().await;

    let response = app.post_payment(&payment_body(), Some("K1")).await;
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], "99.99");
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["customer_email"], "a@b.c");
    assert!(Uuid::parse_str(body["id"].as_str().unwrap()).is_ok());

    // intake also enqueued exactly one processing job
    let jobs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = 'payments'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(jobs, 1);
}

#[tokio::test]
async fn replay_returns_the_identical_body_with_200() {
    let app = spawn_app().await;

    let first = app.post_payment(&payment_body(), Some("K1")).await;
    assert_eq!(first.status().as_u16(), 201);
    let first_body = first.text().await.unwrap();

    let second = app.post_payment(&payment_body(), Some("K1")).await;
    assert_eq!(second.status().as_u16(), 200);
    let second_body = second.text().await.unwrap();

    assert_eq!(first_body, second_body);

    let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn replay_survives_processing() {
    // the recorded response is frozen at creation time: replays keep saying
    // `pending` even after the worker settled the payment
    let app = spawn_app().await;

    let first = app.post_payment(&payment_body(), Some("K1")).await;
    let first_body = first.text().await.unwrap();

    app.drain_payment_queue().await;

    let replay = app.post_payment(&payment_body(), Some("K1")).await;
    assert_eq!(replay.status().as_u16(), 200);
    assert_eq!(replay.text().await.unwrap(), first_body);
}

#[tokio::test]
async fn concurrent_requests_with_one_key_create_one_payment() {
    let app = spawn_app().await;

    let body = payment_body();
    let (a, b) = tokio::join!(
        app.post_payment(&body, Some("K1")),
        app.post_payment(&body, Some("K1")),
    );
    assert!(a.status().is_success());
    assert!(b.status().is_success());

    let body_a: Value = a.json().await.unwrap();
    let body_b: Value = b.json().await.unwrap();
    assert_eq!(body_a["id"], body_b["id"]);

    let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn different_keys_create_different_payments() {
    let app = spawn_app().await;

    app.post_payment(&payment_body(), Some("K1")).await;
    app.post_payment(&payment_body(), Some("K2")).await;

    let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(payments, 2);
}

#[tokio::test]
async fn invalid_payments_are_rejected_with_400() {
    let app = spawn_app().await;

    for (body, msg) in [
        (
            json!({"amount": 0, "customer_email": "a@b.c"}),
            "zero amount",
        ),
        (
            json!({"amount": -5.00, "customer_email": "a@b.c"}),
            "negative amount",
        ),
        (
            json!({"amount": 10.999, "customer_email": "a@b.c"}),
            "sub-cent amount",
        ),
        (
            json!({"amount": 10, "customer_email": ""}),
            "empty email",
        ),
        (
            json!({"amount": 10, "customer_email": "not-an-email"}),
            "invalid email",
        ),
        (
            json!({"amount": 10, "customer_email": "a@b.c", "currency": "USDC"}),
            "four-letter currency",
        ),
    ] {
        let response = app.post_payment(&body, None).await;
        assert_eq!(response.status().as_u16(), 400, "{msg}");
        let error: Value = response.json().await.unwrap();
        assert!(error["error"].is_string(), "{msg}");
    }
}

#[tokio::test]
async fn a_rejected_request_does_not_burn_the_key() {
    let app = spawn_app().await;

    let bad = json!({"amount": 0, "customer_email": "a@b.c"});
    let response = app.post_payment(&bad, Some("K1")).await;
    assert_eq!(response.status().as_u16(), 400);

    // the claim was rolled back; the key is still usable
    let response = app.post_payment(&payment_body(), Some("K1")).await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn missing_payment_is_404() {
    let app = spawn_app().await;

    let response = app.get_payment(&Uuid::new_v4().to_string()).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn processed_payment_is_visible_via_get() {
    let app = spawn_app().await;

    let created: Value = app
        .post_payment(&payment_body(), Some("K1"))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    app.drain_payment_queue().await;

    let fetched: Value = app.get_payment(&id).await.json().await.unwrap();
    assert_eq!(fetched["status"], "completed");
    assert_eq!(fetched["refunds"], json!([]));
}

#[tokio::test]
async fn failed_processing_reaches_the_failed_state() {
    let app = spawn_app().await;

    let created: Value = app
        .post_payment(&payment_body(), Some("K1"))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let mut processing = app.cfg.processing.clone();
    processing.test_payment_success = false;
    app.drain_payment_queue_with(&processing).await;

    let fetched: Value = app.get_payment(&id).await.json().await.unwrap();
    assert_eq!(fetched["status"], "failed");
}

#[tokio::test]
async fn redelivered_processing_job_is_a_no_op() {
    let app = spawn_app().await;

    let created: Value = app
        .post_payment(&payment_body(), Some("K1"))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    app.create_subscription(&["payment.completed"]).await;

    app.drain_payment_queue().await;

    // simulate queue redelivery of the same job
    sqlx::query("INSERT INTO jobs (queue, job_id, kind) VALUES ('payments', $1, 'process_payment')")
        .bind(Uuid::parse_str(&id).unwrap())
        .execute(&app.pool)
        .await
        .unwrap();
    app.drain_payment_queue().await;

    // the CAS swallowed the duplicate: still exactly one outbox row
    let events = app.event_rows("payment.completed").await;
    assert_eq!(events.len(), 1);
}
