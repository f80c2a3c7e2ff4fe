//! Router tests against an in-memory SQLite backend.

use std::{sync::Arc, time::Duration};

use axum::{
  body::Body,
  http::{Method, Request, StatusCode, header},
  response::Response,
};
use kindred_core::{
  identity::IdentityProvider as _,
  profile::{AccountStatus, SubjectId},
  session::SessionSnapshot,
};
use kindred_session::{SessionConfig, SessionManager};
use kindred_store_sqlite::{IdentityConfig, SqliteIdentity, SqliteStore};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::{AppState, router};

struct TestApp {
  store:    SqliteStore,
  identity: Arc<SqliteIdentity>,
  state:    AppState<SqliteIdentity, SqliteStore>,
}

async fn app() -> TestApp {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let identity = Arc::new(store.identity(IdentityConfig::default()));
  let session = SessionManager::start(
    identity.clone(),
    Arc::new(store.clone()),
    SessionConfig::default(),
  );
  TestApp {
    store,
    identity,
    state: AppState { session: Arc::new(session) },
  }
}

impl TestApp {
  async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    router(self.state.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap()
  }

  async fn wait_for(&self, predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), self.state.session.wait_for(predicate))
      .await
      .expect("timed out waiting for session")
      .unwrap()
  }

  /// Register `name` and wait until its profile is live.
  async fn registered(&self, name: &str) -> SubjectId {
    let resp = self
      .call(
        Method::POST,
        "/session/register",
        Some(json!({
          "email": format!("{name}@example.com"),
          "password": "secret",
          "display_name": name,
        })),
      )
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let snapshot = self.wait_for(|s| s.state.is_authenticated()).await;
    snapshot.subject_id.unwrap()
  }
}

async fn json_body(resp: Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_starts_unauthenticated() {
  let app = app().await;
  let resp = app.call(Method::GET, "/session", None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["state"]["state"], "unauthenticated");
  assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn register_ignores_requested_role() {
  let app = app().await;
  let resp = app
    .call(
      Method::POST,
      "/session/register",
      Some(json!({
        "email": "mallory@example.com",
        "password": "secret",
        "display_name": "Mallory",
        "bio": "hello",
        "role": "SUPER_ADMIN",
        "tenant_id": "elsewhere",
      })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = json_body(resp).await;
  assert_eq!(body["role"], "USER");
  assert_eq!(body["tenant_id"], "default");
  assert_eq!(body["bio"], "hello");

  app.wait_for(|s| s.state.is_authenticated()).await;
  let body = json_body(app.call(Method::GET, "/session", None).await).await;
  assert_eq!(body["state"]["state"], "authenticated");
  assert_eq!(body["state"]["data"]["display_name"], "Mallory");
}

#[tokio::test]
async fn register_weak_password_is_unprocessable() {
  let app = app().await;
  let resp = app
    .call(
      Method::POST,
      "/session/register",
      Some(json!({ "email": "a@example.com", "password": "123", "display_name": "A" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  let body = json_body(resp).await;
  assert_eq!(body["kind"]["kind"], "weak_password");
}

#[tokio::test]
async fn wrong_password_is_unauthorized_and_published() {
  let app = app().await;
  app.registered("ada").await;
  app.call(Method::POST, "/session/sign-out", None).await;
  app.wait_for(|s| s.state.is_unauthenticated()).await;

  let resp = app
    .call(
      Method::POST,
      "/session/sign-in",
      Some(json!({ "email": "ada@example.com", "password": "nope!!" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let body = json_body(resp).await;
  assert_eq!(body["error"], "incorrect email or password");
  assert_eq!(body["kind"]["kind"], "wrong_credentials");

  let s = app.wait_for(|s| s.error.is_some()).await;
  assert!(s.state.is_unauthenticated());

  let resp = app.call(Method::DELETE, "/session/error", None).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  app.wait_for(|s| s.error.is_none()).await;
}

#[tokio::test]
async fn missing_password_is_bad_request() {
  let app = app().await;
  let resp = app
    .call(
      Method::POST,
      "/session/sign-in",
      Some(json!({ "email": "ada@example.com", "password": "" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sign_in_starts_the_session() {
  let app = app().await;
  let subject = app.registered("bob").await;
  app.call(Method::POST, "/session/sign-out", None).await;
  app.wait_for(|s| s.state.is_unauthenticated()).await;

  let resp = app
    .call(
      Method::POST,
      "/session/sign-in",
      Some(json!({ "email": "bob@example.com", "password": "secret" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  let s = app.wait_for(|s| s.state.is_authenticated()).await;
  assert_eq!(s.subject_id, Some(subject));
}

// ─── Profile ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn profile_routes_require_a_session() {
  let app = app().await;
  let resp = app
    .call(Method::PATCH, "/profile", Some(json!({ "display_name": "X" })))
    .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let body = json_body(resp).await;
  assert_eq!(body["kind"]["kind"], "not_authenticated");
}

#[tokio::test]
async fn patch_profile_returns_merged_profile() {
  let app = app().await;
  let subject = app.registered("carol").await;

  let resp = app
    .call(Method::PATCH, "/profile", Some(json!({ "display_name": "Caroline" })))
    .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["display_name"], "Caroline");

  let stored = app.store.get_profile(subject).await.unwrap().unwrap();
  assert_eq!(stored.display_name, "Caroline");
}

#[tokio::test]
async fn empty_patch_is_bad_request() {
  let app = app().await;
  app.registered("dan").await;
  // `status` is never read from a request body, so this patch is empty.
  let resp = app
    .call(Method::PATCH, "/profile", Some(json!({ "status": "ACTIVE" })))
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn block_is_idempotent() {
  let app = app().await;
  let subject = app.registered("erin").await;

  for _ in 0..2 {
    let resp = app
      .call(Method::POST, "/profile/blocks", Some(json!({ "target_id": "u2" })))
      .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  }
  let stored = app.store.get_profile(subject).await.unwrap().unwrap();
  assert_eq!(stored.blocked_ids, vec![SubjectId::from("u2")]);
}

#[tokio::test]
async fn like_toggles() {
  let app = app().await;
  app.registered("fay").await;

  let body = json_body(app.call(Method::POST, "/profile/likes/u3", None).await).await;
  assert_eq!(body["liked"], true);
  let body = json_body(app.call(Method::POST, "/profile/likes/u3", None).await).await;
  assert_eq!(body["liked"], false);
}

#[tokio::test]
async fn delete_profile_signs_out() {
  let app = app().await;
  let subject = app.registered("gus").await;

  let resp = app.call(Method::DELETE, "/profile", None).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  app.wait_for(|s| s.state.is_unauthenticated()).await;
  assert!(app.identity.current().is_none());

  let stored = app.store.get_profile(subject).await.unwrap().unwrap();
  assert_eq!(stored.status, AccountStatus::Deleted);
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn report_files_and_blocks() {
  let app = app().await;
  let subject = app.registered("hal").await;

  let resp = app
    .call(
      Method::POST,
      "/reports",
      Some(json!({ "target_id": "u2", "target_display_name": "Troll", "reason": "spam" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = json_body(resp).await;
  assert_eq!(body["status"], "PENDING");
  assert_eq!(body["tenant_id"], "default");

  let reports = app.store.reports_by(subject.clone()).await.unwrap();
  assert_eq!(reports.len(), 1);
  let stored = app.store.get_profile(subject).await.unwrap().unwrap();
  assert_eq!(stored.blocked_ids, vec![SubjectId::from("u2")]);
}

#[tokio::test]
async fn report_without_reason_is_bad_request() {
  let app = app().await;
  app.registered("ivy").await;
  let resp = app
    .call(Method::POST, "/reports", Some(json!({ "target_id": "u2", "reason": " " })))
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ─── Moderation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn ban_ends_the_session() {
  let app = app().await;
  let subject = app.registered("joe").await;

  app.store.set_status(subject, AccountStatus::Banned).await.unwrap();
  app.wait_for(|s| s.state.is_unauthenticated()).await;

  let body = json_body(app.call(Method::GET, "/session", None).await).await;
  assert_eq!(body["state"]["state"], "suspended_or_deleted");
  assert_eq!(body["state"]["data"], "BANNED");
  assert_eq!(body["error"]["kind"], "policy_violation");

  let resp = app
    .call(Method::PATCH, "/profile", Some(json!({ "display_name": "X" })))
    .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
