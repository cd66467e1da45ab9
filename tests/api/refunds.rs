use serde_json::json;
use serde_json::Value;
use uuid::Uuid;

use crate::helpers::spawn_app;
use crate::helpers::TestApp;

/// Create a payment and drive it to `completed`; returns its id.
async fn completed_payment(app: &TestApp, amount: f64) -> String {
    let created: Value = app
        .post_payment(
            &json!({"amount": amount, "customer_email": "a@b.c"}),
            Some(&Uuid::new_v4().to_string()),
        )
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    app.drain_payment_queue().await;
    id
}

#[tokio::test]
async fn refunding_a_pending_payment_is_rejected() {
    let app = spawn_app().await;

    let created: Value = app
        .post_payment(
            &json!({"amount": 100.00, "customer_email": "a@b.c"}),
            Some("K1"),
        )
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let response = app.post_refund(id, &json!({})).await;
    assert_eq!(response.status().as_u16(), 400);
    let error: Value = response.json().await.unwrap();
    assert!(error["error"]
        .as_str()
        .unwrap()
        .contains("cannot be refunded"));
}

#[tokio::test]
async fn refunding_a_failed_payment_is_rejected() {
    let app = spawn_app().await;

    let created: Value = app
        .post_payment(
            &json!({"amount": 100.00, "customer_email": "a@b.c"}),
            Some("K1"),
        )
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let mut processing = app.cfg.processing.clone();
    processing.test_payment_success = false;
    app.drain_payment_queue_with(&processing).await;

    let response = app.post_refund(&id, &json!({})).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn refunding_a_missing_payment_is_404() {
    let app = spawn_app().await;

    let response = app
        .post_refund(&Uuid::new_v4().to_string(), &json!({"amount": 10}))
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn a_full_refund_moves_the_payment_to_refunded() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    // empty body means "refund the rest"
    let response = app.post_refund(&id, &json!({})).await;
    assert_eq!(response.status().as_u16(), 201);
    let refund: Value = response.json().await.unwrap();
    assert_eq!(refund["amount"], "100.00");
    assert_eq!(refund["status"], "pending");

    let payment: Value = app.get_payment(&id).await.json().await.unwrap();
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["refunds"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn partial_refunds_accumulate_and_over_refunds_are_rejected() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    let response = app.post_refund(&id, &json!({"amount": 60})).await;
    assert_eq!(response.status().as_u16(), 201);

    let payment: Value = app.get_payment(&id).await.json().await.unwrap();
    assert_eq!(payment["status"], "partial_refunded");

    // only 40.00 left
    let response = app.post_refund(&id, &json!({"amount": 50})).await;
    assert_eq!(response.status().as_u16(), 400);
    let error: Value = response.json().await.unwrap();
    assert!(error["error"].as_str().unwrap().contains("exceeds"));

    let response = app.post_refund(&id, &json!({"amount": 40})).await;
    assert_eq!(response.status().as_u16(), 201);

    let payment: Value = app.get_payment(&id).await.json().await.unwrap();
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["refunds"].as_array().unwrap().len(), 2);

    // budget is exhausted for good
    let response = app.post_refund(&id, &json!({"amount": 1})).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn zero_and_negative_refunds_are_rejected() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    for amount in [json!(0), json!(-10)] {
        let response = app.post_refund(&id, &json!({"amount": amount})).await;
        assert_eq!(response.status().as_u16(), 400);
    }
}

#[tokio::test]
async fn refund_replay_returns_the_recorded_response() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    let first = app
        .api_client
        .post(format!("{}/payments/{id}/refund", app.addr))
        .header("Idempotency-Key", "R1")
        .json(&json!({"amount": 30}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);
    let first_body = first.text().await.unwrap();

    let second = app
        .api_client
        .post(format!("{}/payments/{id}/refund", app.addr))
        .header("Idempotency-Key", "R1")
        .json(&json!({"amount": 30}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 200);
    assert_eq!(second.text().await.unwrap(), first_body);

    // the replay did not create a second refund
    let refunds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refunds")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(refunds, 1);
}

#[tokio::test]
async fn the_settlement_worker_processes_the_refund() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    app.post_refund(&id, &json!({"amount": 25, "reason": "requested by customer"}))
        .await;

    // the refund job was enqueued by the refund transaction
    app.drain_payment_queue().await;

    let payment: Value = app.get_payment(&id).await.json().await.unwrap();
    let refund = &payment["refunds"][0];
    assert_eq!(refund["status"], "processed");
    assert_eq!(refund["reason"], "requested by customer");
    assert_eq!(payment["status"], "partial_refunded");
}

#[tokio::test]
async fn concurrent_refunds_cannot_overdraw_the_budget() {
    let app = spawn_app().await;
    let id = completed_payment(&app, 100.00).await;

    let refund_body = json!({"amount": 60});
    let (a, b) = tokio::join!(
        app.post_refund(&id, &refund_body),
        app.post_refund(&id, &refund_body),
    );
    let statuses = [a.status().as_u16(), b.status().as_u16()];
    assert!(statuses.contains(&201));
    assert!(statuses.contains(&400), "both refunds went through: {statuses:?}");

    let refunded: String =
        sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0)::text FROM refunds WHERE status <> 'failed'")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(refunded, "60.00");
}
