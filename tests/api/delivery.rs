use chrono::DateTime;
use chrono::Utc;
use paygate::signer;
use serde_json::json;
use serde_json::Value;
use uuid::Uuid;
use wiremock::matchers::any;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::TestApp;

async fn create_payment(app: &TestApp, amount: f64) -> String {
    let created: Value = app
        .post_payment(
            &json!({"amount": amount, "customer_email": "a@b.c"}),
            Some(&Uuid::new_v4().to_string()),
        )
        .await
        .json()
        .await
        .unwrap();
    created["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn payment_completion_fans_out_to_every_matching_subscription() {
    let app = spawn_app().await;
    app.create_subscription(&["payment.completed"]).await;
    app.create_subscription(&["payment.completed", "payment.failed"]).await;
    // listens to something else entirely; must not receive a row
    app.create_subscription(&["refund.created"]).await;

    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.receiver)
        .await;

    create_payment(&app, 42.00).await;
    app.drain_payment_queue().await;

    // exactly one outbox row per matching subscription, in the same
    // transaction that completed the payment
    let events = app.event_rows("payment.completed").await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(_, status, _)| status == "pending"));

    let enqueued = app.poll_outbox().await;
    assert_eq!(enqueued, 2);
    app.drain_webhook_queue().await;

    let events = app.event_rows("payment.completed").await;
    assert!(events.iter().all(|(_, status, _)| status == "completed"));
}

#[tokio::test]
async fn deliveries_carry_a_verifiable_signature() {
    let app = spawn_app().await;
    let (_id, secret) = app.create_subscription(&["payment.completed"]).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.receiver)
        .await;

    let payment_id = create_payment(&app, 99.99).await;
    app.drain_payment_queue().await;
    app.poll_outbox().await;
    app.drain_webhook_queue().await;

    let request = app.receiver.received_requests().await.unwrap().pop().unwrap();
    assert_eq!(request.headers["Content-Type"], "application/json");
    assert_eq!(request.headers["X-Webhook-Event"], "payment.completed");

    let signature = request.headers["X-Webhook-Signature"].to_str().unwrap();
    let timestamp: i64 = request.headers["X-Webhook-Timestamp"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = String::from_utf8(request.body.clone()).unwrap();

    // the signature verifies against the raw bytes on the wire
    assert!(signer::verify(
        &secret,
        timestamp,
        &body,
        signature,
        Utc::now().timestamp_millis(),
        signer::DEFAULT_TOLERANCE,
    ));
    // a mutated body does not
    assert!(!signer::verify(
        &secret,
        timestamp,
        &format!("{body} "),
        signature,
        Utc::now().timestamp_millis(),
        signer::DEFAULT_TOLERANCE,
    ));

    let payload: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["payment_id"], payment_id.as_str());
    assert_eq!(payload["amount"], "99.99");
    assert_eq!(payload["customer_email"], "a@b.c");
}

#[tokio::test]
async fn failed_payments_emit_payment_failed() {
    let app = spawn_app().await;
    app.create_subscription(&["payment.failed"]).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.receiver)
        .await;

    create_payment(&app, 10.00).await;
    let mut processing = app.cfg.processing.clone();
    processing.test_payment_success = false;
    app.drain_payment_queue_with(&processing).await;

    app.poll_outbox().await;
    app.drain_webhook_queue().await;

    let request = app.receiver.received_requests().await.unwrap().pop().unwrap();
    assert_eq!(request.headers["X-Webhook-Event"], "payment.failed");
    let payload: Value = serde_json::from_slice(&request.body).unwrap();
    assert!(payload["reason"].is_string());
}

#[tokio::test]
async fn retries_back_off_and_exhaust_into_failed() {
    let app = spawn_app().await;
    app.create_subscription(&["payment.completed"]).await;

    // the receiver never recovers
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.receiver)
        .await;

    create_payment(&app, 10.00).await;
    app.drain_payment_queue().await;
    app.poll_outbox().await;

    for attempt in 1..=5i32 {
        app.drain_webhook_queue().await;

        let row = sqlx::query_as::<_, (String, i32, Option<DateTime<Utc>>, Option<String>, DateTime<Utc>)>(
            "SELECT status, retry_count, next_retry, last_error, updated_at FROM webhook_events",
        )
        .fetch_one(&app.pool)
        .await
        .unwrap();
        let (status, retry_count, next_retry, last_error, updated_at) = row;

        assert_eq!(retry_count, attempt);
        assert!(last_error.unwrap().contains("500"));
        if attempt < 5 {
            assert_eq!(status, "pending");
            // test schedule: 2^n seconds, no jitter
            let delay = (next_retry.unwrap() - updated_at).num_seconds();
            let expected = 1i64 << attempt;
            assert!(
                (expected - 1..=expected + 1).contains(&delay),
                "attempt {attempt}: expected ~{expected}s, got {delay}s"
            );
            app.force_due().await;
        } else {
            assert_eq!(status, "failed");
            assert!(next_retry.is_none());
        }
    }

    // one POST per attempt, none after the terminal state
    assert_eq!(app.receiver.received_requests().await.unwrap().len(), 5);
    app.force_due().await;
    assert_eq!(app.poll_outbox().await, 0);
    app.drain_webhook_queue().await;
    assert_eq!(app.receiver.received_requests().await.unwrap().len(), 5);
}

#[tokio::test]
async fn deactivated_subscriptions_fail_their_pending_events() {
    let app = spawn_app().await;
    let (id, _secret) = app.create_subscription(&["payment.completed"]).await;

    create_payment(&app, 10.00).await;
    app.drain_payment_queue().await;

    app.api_client
        .patch(format!("{}/webhooks/{id}", app.addr))
        .json(&json!({"active": false}))
        .send()
        .await
        .unwrap();

    app.poll_outbox().await;
    app.drain_webhook_queue().await;

    let events = app.event_rows("payment.completed").await;
    assert_eq!(events[0].1, "failed");
    assert!(app.receiver.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivered_jobs_for_settled_events_do_not_repost() {
    let app = spawn_app().await;
    app.create_subscription(&["payment.completed"]).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.receiver)
        .await;

    create_payment(&app, 10.00).await;
    app.drain_payment_queue().await;
    app.poll_outbox().await;
    app.drain_webhook_queue().await;
    assert_eq!(app.receiver.received_requests().await.unwrap().len(), 1);

    // the queue redelivers (crash before ack, duplicate cue, ...)
    let (event_id, _, _) = app.event_rows("payment.completed").await[0].clone();
    sqlx::query("INSERT INTO jobs (queue, job_id, kind) VALUES ('webhooks', $1, 'deliver_webhook')")
        .bind(event_id)
        .execute(&app.pool)
        .await
        .unwrap();
    app.drain_webhook_queue().await;

    // terminal event, no second POST
    assert_eq!(app.receiver.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn the_poller_reenqueues_jobs_the_queue_lost() {
    let app = spawn_app().await;
    app.create_subscription(&["payment.completed"]).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.receiver)
        .await;

    create_payment(&app, 10.00).await;
    app.drain_payment_queue().await;

    // the wake-up cue vanishes; the outbox row is still authoritative
    sqlx::query("DELETE FROM jobs WHERE queue = 'webhooks'")
        .execute(&app.pool)
        .await
        .unwrap();

    assert_eq!(app.poll_outbox().await, 1);
    app.drain_webhook_queue().await;

    let events = app.event_rows("payment.completed").await;
    assert_eq!(events[0].1, "completed");
}

#[tokio::test]
async fn refund_lifecycle_emits_created_then_processed() {
    let app = spawn_app().await;
    app.create_subscription(&["refund.created", "refund.processed"]).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.receiver)
        .await;

    let payment_id = create_payment(&app, 100.00).await;
    app.drain_payment_queue().await;

    let refund: Value = app
        .post_refund(&payment_id, &json!({"amount": 30}))
        .await
        .json()
        .await
        .unwrap();

    // refund.created is written by the refund transaction itself
    app.poll_outbox().await;
    app.drain_webhook_queue().await;

    // settlement emits refund.processed
    app.drain_payment_queue().await;
    app.poll_outbox().await;
    app.drain_webhook_queue().await;

    let requests = app.receiver.received_requests().await.unwrap();
    let event_types: Vec<&str> = requests
        .iter()
        .map(|r| r.headers["X-Webhook-Event"].to_str().unwrap())
        .collect();
    assert_eq!(event_types, vec!["refund.created", "refund.processed"]);

    let created_payload: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(created_payload["refund_id"], refund["id"]);
    assert_eq!(created_payload["payment_id"], payment_id.as_str());
    assert_eq!(created_payload["amount"], "30.00");
    assert_eq!(created_payload["payment_status"], "partial_refunded");
}
