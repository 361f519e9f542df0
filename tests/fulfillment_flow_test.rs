mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn prepaid_order_travels_the_full_checkpoint_sequence() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9001", "PREPAID").await;

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["agent_status"], "UNASSIGNED");
    assert_eq!(body["data"]["is_paid"], true);

    let agent_id = app.drive_to_doorstep(order_id, "ORD-9001").await;

    // OTP was auto-issued at the buyer location for the prepaid path.
    let otp = app.current_otp(order_id).await;
    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/complete"),
            json!({ "agent_id": agent_id, "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "complete failed: {body}");
    assert_eq!(body["data"]["agent_status"], "DELIVERY_COMPLETED");
    assert_eq!(body["data"]["delivery"]["is_completed"], true);
}

#[tokio::test]
async fn projection_never_exposes_the_otp() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9002", "PREPAID").await;
    app.drive_to_doorstep(order_id, "ORD-9002").await;

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let delivery = &body["data"]["delivery"];
    assert_eq!(delivery["otp_pending"], true);
    assert!(delivery.get("otp").is_none(), "otp leaked: {delivery}");
}

#[tokio::test]
async fn checkpoints_cannot_be_skipped() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9003", "COD").await;
    let agent = json!({ "agent_id": Uuid::new_v4() });

    // Accept before assign.
    let (status, body) = app
        .post(&format!("/api/v1/orders/{order_id}/accept"), agent.clone())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");

    // Buyer location before pickup.
    let (status, _) = app
        .post(&format!("/api/v1/orders/{order_id}/assign"), agent.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .post(&format!("/api/v1/orders/{order_id}/accept"), agent.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .post(&format!("/api/v1/orders/{order_id}/reach-buyer"), agent)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn only_the_assigned_agent_may_act() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9004", "COD").await;
    let assigned = Uuid::new_v4();
    let (status, _) = app
        .post(
            &format!("/api/v1/orders/{order_id}/assign"),
            json!({ "agent_id": assigned }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/accept"),
            json!({ "agent_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn pickup_mismatch_reports_and_allows_retry() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9005", "COD").await;
    let agent_id = Uuid::new_v4();
    let agent = json!({ "agent_id": agent_id });
    for step in ["assign", "accept", "reach-seller"] {
        let (status, _) = app
            .post(&format!("/api/v1/orders/{order_id}/{step}"), agent.clone())
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/confirm-pickup"),
            json!({ "agent_id": agent_id, "verified_order_id": "ORD-WRONG" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "verification_failed");

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["agent_status"], "ACCEPTED");
    assert_eq!(body["data"]["pickup"]["is_completed"], false);

    // Identifier comparison is case-insensitive on retry.
    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/confirm-pickup"),
            json!({ "agent_id": agent_id, "verified_order_id": "ord-9005" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["agent_status"], "PICKUP_COMPLETED");
}

#[tokio::test]
async fn resend_otp_issues_a_working_code() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9006", "PREPAID").await;
    let agent_id = app.drive_to_doorstep(order_id, "ORD-9006").await;

    let (status, _) = app
        .post(
            &format!("/api/v1/orders/{order_id}/resend-otp"),
            json!({ "agent_id": agent_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let otp = app.current_otp(order_id).await;
    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/complete"),
            json!({ "agent_id": agent_id, "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn wrong_otp_is_rejected_without_completing() {
    let app = TestApp::new();
    let order_id = app.create_order("ORD-9007", "PREPAID").await;
    let agent_id = app.drive_to_doorstep(order_id, "ORD-9007").await;

    let real = app.current_otp(order_id).await;
    let wrong = if real == "000000" { "111111" } else { "000000" };
    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{order_id}/complete"),
            json!({ "agent_id": agent_id, "otp": wrong }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "otp_mismatch");

    let (_, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(body["data"]["agent_status"], "LOCATION_REACHED");
}

#[tokio::test]
async fn unknown_order_returns_not_found() {
    let app = TestApp::new();
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn create_order_validates_input() {
    let app = TestApp::new();
    let (status, body) = app
        .post(
            "/api/v1/orders",
            json!({
                "order_number": "",
                "total_amount": "10.00",
                "payment_method": "COD",
                "customer": { "name": "A", "phone": "123" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}
