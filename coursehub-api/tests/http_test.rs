use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use coursehub_api::middleware::{issue_token, Role};
use coursehub_api::{app, AppState, AuthConfig};
use coursehub_core::repository::{BillRepository, CourseRepository, EnrollmentRepository};
use coursehub_core::{Bill, Course, CourseStatus, Enrollment, LogNotifier, ReconciliationPolicy, RefundPolicy};
use coursehub_lifecycle::{InMemoryStore, Repositories};

fn auth() -> AuthConfig {
    AuthConfig {
        secret: "test-secret".to_string(),
        expiration: 3600,
    }
}

fn setup() -> (Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::new(
        Repositories::from_store(store.clone()),
        Arc::new(LogNotifier),
        RefundPolicy::default(),
        ReconciliationPolicy::default(),
        auth(),
    )
    .unwrap();
    (app(state), store)
}

fn token(sub: Uuid, role: Role) -> String {
    issue_token(&auth(), sub, role).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

struct Purchase {
    course: Course,
    enrollment: Enrollment,
}

/// Published course with ten students; the returned enrollment paid 500 000.
async fn seed_purchase(store: &InMemoryStore) -> Purchase {
    let mut course = Course::new(Uuid::new_v4(), "Web Backends in Rust".to_string(), 500_000);
    course.status = CourseStatus::Published;
    course.sync_legacy_flags();
    store.insert_course(&course).await.unwrap();

    for _ in 0..9 {
        store
            .insert_enrollment(&Enrollment::new(Uuid::new_v4(), course.id))
            .await
            .unwrap();
    }
    let enrollment = Enrollment::new(Uuid::new_v4(), course.id);
    store.insert_enrollment(&enrollment).await.unwrap();
    store.set_total_students(course.id, 10).await.unwrap();
    store
        .insert_bill(&Bill::completed(enrollment.student_id, course.id, 500_000, Some("card".to_string())))
        .await
        .unwrap();

    Purchase { course, enrollment }
}

#[tokio::test]
async fn test_health_is_public() {
    let (app, _) = setup();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let (app, _) = setup();
    let uri = format!("/v1/courses/{}/submit", Uuid::new_v4());

    let (status, body) = send(&app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "POST", &uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("invalid token"));
}

#[tokio::test]
async fn test_submit_course_once() {
    let (app, store) = setup();
    let instructor = Uuid::new_v4();
    let course = Course::new(instructor, "Intro to Tokio".to_string(), 250_000);
    store.insert_course(&course).await.unwrap();

    let uri = format!("/v1/courses/{}/submit", course.id);
    let tok = token(instructor, Role::Instructor);

    let (status, body) = send(&app, "POST", &uri, Some(&tok), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "submitted");
    assert_eq!(body["submitted_for_review"], true);

    let (status, body) = send(&app, "POST", &uri, Some(&tok), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_submit_requires_owner_and_instructor_role() {
    let (app, store) = setup();
    let course = Course::new(Uuid::new_v4(), "Intro to Tokio".to_string(), 250_000);
    store.insert_course(&course).await.unwrap();
    let uri = format!("/v1/courses/{}/submit", course.id);

    let (status, _) = send(&app, "POST", &uri, Some(&token(Uuid::new_v4(), Role::Instructor)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "POST", &uri, Some(&token(course.instructor_id, Role::Student)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_instructor_cannot_withdraw_or_publish() {
    let (app, store) = setup();
    let course = Course::new(Uuid::new_v4(), "Intro to Tokio".to_string(), 250_000);
    store.insert_course(&course).await.unwrap();
    let tok = token(course.instructor_id, Role::Instructor);

    for action in ["withdraw", "publish", "unpublish"] {
        let uri = format!("/v1/courses/{}/{}", course.id, action);
        let (status, _) = send(&app, "POST", &uri, Some(&tok), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", action);
    }
}

#[tokio::test]
async fn test_admin_review_then_edit_then_resubmit() {
    let (app, store) = setup();
    let instructor = Uuid::new_v4();
    let course = Course::new(instructor, "Intro to Tokio".to_string(), 250_000);
    store.insert_course(&course).await.unwrap();

    let teacher = token(instructor, Role::Instructor);
    let admin = token(Uuid::new_v4(), Role::Admin);
    let review_uri = format!("/v1/admin/courses/{}/review", course.id);

    send(&app, "POST", &format!("/v1/courses/{}/submit", course.id), Some(&teacher), None).await;
    let (status, _) = send(&app, "POST", &review_uri, Some(&admin), Some(json!({"decision": "approve"}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, "POST", &review_uri, Some(&admin), Some(json!({"decision": "publish"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_published"], true);

    let (status, _) = send(&app, "POST", &review_uri, Some(&teacher), Some(json!({"decision": "publish"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&app, "POST", &format!("/v1/courses/{}/edits", course.id), Some(&teacher), None).await;
    assert_eq!(body["has_unsaved_changes"], true);

    let (status, body) = send(&app, "POST", &format!("/v1/courses/{}/submit", course.id), Some(&teacher), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "submitted");
    assert_eq!(body["is_published"], false);
}

#[tokio::test]
async fn test_refund_request_and_approval_over_http() {
    let (app, store) = setup();
    let purchase = seed_purchase(&store).await;
    let student = token(purchase.enrollment.student_id, Role::Student);
    let teacher = token(purchase.course.instructor_id, Role::Instructor);

    let request = json!({
        "enrollment_id": purchase.enrollment.id,
        "reason": "not helpful",
        "description": "too basic",
        "contact_method": {"channel": "email", "value": "learner@example.com"}
    });
    let (status, refund) = send(&app, "POST", "/v1/refunds", Some(&student), Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(refund["status"], "pending");
    assert_eq!(refund["amount"], 500_000);

    let (status, _) = send(&app, "POST", "/v1/refunds", Some(&student), Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let approve_uri = format!("/v1/refunds/{}/approve", refund["id"].as_str().unwrap());
    let (status, approved) = send(
        &app,
        "POST",
        &approve_uri,
        Some(&teacher),
        Some(json!({"refund_method": "bank_transfer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["refund"]["status"], "approved");
    assert_eq!(approved["cascade"]["bill"]["outcome"], "applied");
    assert_eq!(approved["cascade"]["enrollment"]["outcome"], "applied");
    assert_eq!(approved["cascade"]["course"]["outcome"], "applied");

    let (status, _) = send(&app, "POST", &approve_uri, Some(&teacher), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let course = store.get_course(purchase.course.id).await.unwrap().unwrap();
    assert_eq!(course.total_students, 9);
}

#[tokio::test]
async fn test_refund_visibility_is_scoped() {
    let (app, store) = setup();
    let purchase = seed_purchase(&store).await;
    let student = token(purchase.enrollment.student_id, Role::Student);

    let (_, refund) = send(
        &app,
        "POST",
        "/v1/refunds",
        Some(&student),
        Some(json!({
            "enrollment_id": purchase.enrollment.id,
            "reason": "schedule conflict",
            "contact_method": {"channel": "phone", "value": "+15550100"}
        })),
    )
    .await;
    let refund_uri = format!("/v1/refunds/{}", refund["id"].as_str().unwrap());

    let (status, list) = send(&app, "GET", "/v1/refunds", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let stranger = token(Uuid::new_v4(), Role::Student);
    let (_, list) = send(&app, "GET", "/v1/refunds", Some(&stranger), None).await;
    assert!(list.as_array().unwrap().is_empty());
    let (status, _) = send(&app, "GET", &refund_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let teacher = token(purchase.course.instructor_id, Role::Instructor);
    let (status, _) = send(&app, "GET", &refund_uri, Some(&teacher), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/v1/refunds?limit=5000", Some(&student), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reject_and_cancel_over_http() {
    let (app, store) = setup();
    let purchase = seed_purchase(&store).await;
    let student = token(purchase.enrollment.student_id, Role::Student);
    let teacher = token(purchase.course.instructor_id, Role::Instructor);
    let body = json!({
        "enrollment_id": purchase.enrollment.id,
        "reason": "duplicate purchase",
        "contact_method": {"channel": "email", "value": "learner@example.com"}
    });

    let (_, first) = send(&app, "POST", "/v1/refunds", Some(&student), Some(body.clone())).await;
    let (status, rejected) = send(
        &app,
        "POST",
        &format!("/v1/refunds/{}/reject", first["id"].as_str().unwrap()),
        Some(&teacher),
        Some(json!({"reason": "outside policy"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");

    let (_, second) = send(&app, "POST", "/v1/refunds", Some(&student), Some(body)).await;
    let (status, cancelled) = send(
        &app,
        "POST",
        &format!("/v1/refunds/{}/cancel", second["id"].as_str().unwrap()),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let course = store.get_course(purchase.course.id).await.unwrap().unwrap();
    assert_eq!(course.total_students, 10);
}

#[tokio::test]
async fn test_admin_reconciliation_repairs_drift() {
    let (app, store) = setup();
    let purchase = seed_purchase(&store).await;
    store.set_total_students(purchase.course.id, 42).await.unwrap();

    let (status, _) = send(&app, "POST", "/v1/admin/reconciliation", Some(&token(Uuid::new_v4(), Role::Instructor)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = token(Uuid::new_v4(), Role::Admin);
    let (status, report) = send(&app, "POST", "/v1/admin/reconciliation", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["courses_checked"], 1);
    assert_eq!(report["drift"][0]["recorded"], 42);
    assert_eq!(report["drift"][0]["actual"], 10);

    let course = store.get_course(purchase.course.id).await.unwrap().unwrap();
    assert_eq!(course.total_students, 10);
}

#[tokio::test]
async fn test_metrics_exposes_counters() {
    let (app, _) = setup();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("coursehub_course_submissions_total"));
}
