#![allow(dead_code)]

//! In-process stub of the hosted identity & data service.
//!
//! Implements just enough of the auth API (signup, password/OTP/PKCE
//! token grants, user, logout, recover) and the table API (filtered
//! reads, inserts, patches, the `create_family_for_user` procedure) for
//! the bootstrap suites, plus failure/delay injection and per-endpoint
//! request counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use hearth_session::{AuthState, BootstrapConfig, SessionManager, SettledState};
use hearth_shared::clients::{AuthClient, RestClient};
use hearth_shared::{RemoteConfig, Session};

#[derive(Default)]
pub struct StubState {
    /// Identity-provider accounts: `{id, email, password, app_metadata,
    /// user_metadata}`.
    pub identities: Vec<Value>,
    pub users: Vec<Value>,
    pub families: Vec<Value>,
    pub family_members: Vec<Value>,
    pub family_invitations: Vec<Value>,

    /// access token -> identity id
    pub sessions: HashMap<String, Uuid>,
    /// refresh token -> identity id
    pub refreshes: HashMap<String, Uuid>,
    pub otp_codes: HashMap<String, String>,
    /// Identity minted by the next PKCE code exchange.
    pub oauth_next: Option<Value>,

    /// Respond 500 to the next N reads of the given table.
    pub read_failures: HashMap<String, u32>,
    /// Respond 500 to the next N inserts into the given table.
    pub insert_failures: HashMap<String, u32>,
    /// Sleep this long before answering reads of the given table.
    pub read_delays: HashMap<String, Duration>,

    /// `{table}:{method}` -> request count.
    pub counters: HashMap<String, u32>,
}

pub type SharedStub = Arc<Mutex<StubState>>;

fn lock(state: &SharedStub) -> std::sync::MutexGuard<'_, StubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Stub {
    pub url: String,
    pub state: SharedStub,
}

impl Stub {
    pub fn count(&self, key: &str) -> u32 {
        lock(&self.state).counters.get(key).copied().unwrap_or(0)
    }

    pub fn fail_reads(&self, table: &str, times: u32) {
        lock(&self.state)
            .read_failures
            .insert(table.to_string(), times);
    }

    pub fn fail_inserts(&self, table: &str, times: u32) {
        lock(&self.state)
            .insert_failures
            .insert(table.to_string(), times);
    }

    pub fn delay_reads(&self, table: &str, delay: Duration) {
        lock(&self.state)
            .read_delays
            .insert(table.to_string(), delay);
    }

    /// Register an identity-provider account; returns its id.
    pub fn seed_identity(&self, email: &str, password: &str, provider: &str, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).identities.push(json!({
            "id": id,
            "email": email,
            "password": password,
            "app_metadata": { "provider": provider },
            "user_metadata": { "full_name": full_name },
        }));
        id
    }

    /// Register an application profile row; returns its id.
    pub fn seed_profile(&self, auth_user_id: Uuid, email: &str, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).users.push(json!({
            "id": id,
            "auth_user_id": auth_user_id,
            "email": email,
            "full_name": full_name,
            "mobile": null,
        }));
        id
    }

    pub fn seed_family(&self, name: &str, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).families.push(json!({
            "id": id,
            "name": name,
            "owner_id": owner_id,
            "created_by": owner_id,
        }));
        id
    }

    pub fn seed_membership(&self, family_id: Uuid, user_id: Uuid, role: &str, relationship: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).family_members.push(json!({
            "id": id,
            "family_id": family_id,
            "user_id": user_id,
            "role": role,
            "relationship": relationship,
            "permissions": {},
        }));
        id
    }

    pub fn seed_invitation(&self, family_id: Uuid, email: &str, role: &str, relationship: &str, invited_by: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).family_invitations.push(json!({
            "id": id,
            "family_id": family_id,
            "email": email,
            "role": role,
            "relationship": relationship,
            "status": "pending",
            "invited_by": invited_by,
        }));
        id
    }

    /// Mint a live session for a seeded identity, as a [`Session`] the
    /// client can restore.
    pub fn mint_session(&self, email: &str) -> Session {
        let mut state = lock(&self.state);
        let identity = state
            .identities
            .iter()
            .find(|i| i["email"] == email)
            .cloned()
            .expect("identity seeded");
        let session = mint_session_value(&mut state, &identity);
        serde_json::from_value(session).expect("session decodes")
    }

    pub fn set_oauth_identity(&self, email: &str, full_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).oauth_next = Some(json!({
            "id": id,
            "email": email,
            "password": null,
            "app_metadata": { "provider": "google" },
            "user_metadata": { "full_name": full_name },
        }));
        id
    }

    pub fn otp_code(&self, email: &str) -> Option<String> {
        lock(&self.state).otp_codes.get(email).cloned()
    }

    pub fn table_len(&self, table: &str) -> usize {
        let state = lock(&self.state);
        match table {
            "identities" => state.identities.len(),
            "users" => state.users.len(),
            "families" => state.families.len(),
            "family_members" => state.family_members.len(),
            "family_invitations" => state.family_invitations.len(),
            other => panic!("unknown table {other}"),
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        let state = lock(&self.state);
        match table {
            "users" => state.users.clone(),
            "families" => state.families.clone(),
            "family_members" => state.family_members.clone(),
            "family_invitations" => state.family_invitations.clone(),
            other => panic!("unknown table {other}"),
        }
    }
}

pub async fn spawn_stub() -> Stub {
    let state: SharedStub = Arc::new(Mutex::new(StubState::default()));

    let app = Router::new()
        .route("/auth/v1/signup", post(auth_signup))
        .route("/auth/v1/token", post(auth_token))
        .route("/auth/v1/otp", post(auth_otp))
        .route("/auth/v1/verify", post(auth_verify))
        .route("/auth/v1/user", get(auth_get_user).put(auth_update_user))
        .route("/auth/v1/logout", post(auth_logout))
        .route("/auth/v1/recover", post(auth_recover))
        .route("/rest/v1/rpc/:function", post(rest_rpc))
        .route(
            "/rest/v1/:table",
            get(rest_get).post(rest_insert).patch(rest_patch).delete(rest_delete),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Stub { url, state }
}

/// Bootstrap config compressed for tests: short attempts, tiny backoff.
pub fn fast_config() -> BootstrapConfig {
    BootstrapConfig {
        attempt_timeout_ms: 500,
        ready_ceiling_ms: 5_000,
        retry_limit: 3,
        backoff_step_ms: 10,
    }
}

pub fn clients(stub: &Stub) -> (AuthClient, RestClient) {
    let config = RemoteConfig::for_url(&stub.url, "test-key");
    let auth = AuthClient::new(&config).expect("auth client");
    let rest = RestClient::new(&config).expect("rest client");
    (auth, rest)
}

pub fn start_manager(stub: &Stub) -> SessionManager {
    let (auth, rest) = clients(stub);
    SessionManager::start(auth, rest, fast_config())
}

/// Wait until the snapshot satisfies `pred`, or panic after 5 seconds.
pub async fn wait_until(
    rx: &mut tokio::sync::watch::Receiver<AuthState>,
    pred: impl Fn(&AuthState) -> bool,
) -> AuthState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snapshot = rx.borrow().clone();
                if pred(&snapshot) {
                    return snapshot;
                }
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("state predicate not reached in time")
}

pub async fn wait_for_settled(
    rx: &mut tokio::sync::watch::Receiver<AuthState>,
    expected: SettledState,
) -> AuthState {
    wait_until(rx, |s| s.settled() == Some(expected)).await
}

// --- Auth endpoints ---

fn identity_public(identity: &Value) -> Value {
    let mut public = identity.clone();
    if let Some(obj) = public.as_object_mut() {
        obj.remove("password");
    }
    public
}

fn mint_session_value(state: &mut StubState, identity: &Value) -> Value {
    let id: Uuid = serde_json::from_value(identity["id"].clone()).expect("identity id");
    let access = format!("at-{}", Uuid::new_v4());
    let refresh = format!("rt-{}", Uuid::new_v4());
    state.sessions.insert(access.clone(), id);
    state.refreshes.insert(refresh.clone(), id);
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "expires_at": chrono::Utc::now().timestamp() + 3600,
        "user": identity_public(identity),
    })
}

fn auth_failure(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error_description": message })),
    )
}

async fn auth_signup(
    State(state): State<SharedStub>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = lock(&state);
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if state.identities.iter().any(|i| i["email"] == email.as_str()) {
        return auth_failure("User already registered");
    }

    let identity = json!({
        "id": Uuid::new_v4(),
        "email": email,
        "password": body["password"].clone(),
        "app_metadata": { "provider": "email" },
        "user_metadata": body.get("data").cloned().unwrap_or(json!({})),
    });
    state.identities.push(identity.clone());
    let session = mint_session_value(&mut state, &identity);
    (StatusCode::OK, Json(session))
}

async fn auth_token(
    State(state): State<SharedStub>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = lock(&state);
    let grant = params.get("grant_type").map(String::as_str).unwrap_or("");
    let identity = match grant {
        "password" => state
            .identities
            .iter()
            .find(|i| i["email"] == body["email"] && i["password"] == body["password"])
            .cloned(),
        "refresh_token" => {
            let refresh = body["refresh_token"].as_str().unwrap_or_default().to_string();
            let id = state.refreshes.remove(&refresh);
            id.and_then(|id| {
                state
                    .identities
                    .iter()
                    .find(|i| i["id"] == json!(id))
                    .cloned()
            })
        }
        "pkce" => {
            if body["code_verifier"].as_str().unwrap_or_default().is_empty() {
                None
            } else {
                let next = state.oauth_next.take();
                if let Some(identity) = &next {
                    let exists = state.identities.iter().any(|i| i["id"] == identity["id"]);
                    if !exists {
                        state.identities.push(identity.clone());
                    }
                }
                next
            }
        }
        _ => None,
    };

    match identity {
        Some(identity) => {
            let session = mint_session_value(&mut state, &identity);
            (StatusCode::OK, Json(session))
        }
        None => auth_failure("Invalid login credentials"),
    }
}

async fn auth_otp(State(state): State<SharedStub>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut state = lock(&state);
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if !state.identities.iter().any(|i| i["email"] == email.as_str()) {
        return auth_failure("Signups not allowed for otp");
    }
    state.otp_codes.insert(email, "482916".to_string());
    (StatusCode::OK, Json(json!({})))
}

async fn auth_verify(State(state): State<SharedStub>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut state = lock(&state);
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let token = body["token"].as_str().unwrap_or_default().to_string();
    match state.otp_codes.get(&email) {
        Some(expected) if *expected == token => {
            state.otp_codes.remove(&email);
            let identity = state
                .identities
                .iter()
                .find(|i| i["email"] == email.as_str())
                .cloned();
            match identity {
                Some(identity) => {
                    let session = mint_session_value(&mut state, &identity);
                    (StatusCode::OK, Json(session))
                }
                None => auth_failure("User not found"),
            }
        }
        Some(_) => auth_failure("Token has expired or is invalid"),
        None => auth_failure("Token has expired or is invalid"),
    }
}

fn bearer_identity(state: &StubState, headers: &HeaderMap) -> Option<Value> {
    let token = headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .to_string();
    let id = state.sessions.get(&token)?;
    state
        .identities
        .iter()
        .find(|i| i["id"] == json!(id))
        .cloned()
}

async fn auth_get_user(State(state): State<SharedStub>, headers: HeaderMap) -> impl IntoResponse {
    let state = lock(&state);
    match bearer_identity(&state, &headers) {
        Some(identity) => (StatusCode::OK, Json(identity_public(&identity))),
        None => (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid token" }))),
    }
}

async fn auth_update_user(
    State(state): State<SharedStub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = lock(&state);
    let Some(identity) = bearer_identity(&state, &headers) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid token" })));
    };
    if let Some(password) = body.get("password") {
        for candidate in state.identities.iter_mut() {
            if candidate["id"] == identity["id"] {
                candidate["password"] = password.clone();
            }
        }
    }
    (StatusCode::OK, Json(identity_public(&identity)))
}

async fn auth_logout(State(state): State<SharedStub>, headers: HeaderMap) -> StatusCode {
    let mut state = lock(&state);
    if let Some(token) = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        state.sessions.remove(token);
    }
    StatusCode::NO_CONTENT
}

async fn auth_recover(Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({})))
}

// --- Table endpoints ---

fn table_rows<'a>(state: &'a mut StubState, table: &str) -> Option<&'a mut Vec<Value>> {
    match table {
        "users" => Some(&mut state.users),
        "families" => Some(&mut state.families),
        "family_members" => Some(&mut state.family_members),
        "family_invitations" => Some(&mut state.family_invitations),
        _ => None,
    }
}

fn matches_filters(row: &Value, params: &HashMap<String, String>) -> bool {
    params.iter().all(|(column, condition)| {
        if matches!(column.as_str(), "select" | "order" | "limit") {
            return true;
        }
        let Some(expected) = condition.strip_prefix("eq.") else {
            return true;
        };
        match row.get(column) {
            Some(Value::String(actual)) => actual == expected,
            Some(other) => other.to_string() == expected,
            None => false,
        }
    })
}

async fn rest_get(
    State(state): State<SharedStub>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let (delay, failed) = {
        let mut state = lock(&state);
        *state.counters.entry(format!("{table}:GET")).or_insert(0) += 1;
        let delay = state.read_delays.get(&table).copied();
        let failed = match state.read_failures.get_mut(&table) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        (delay, failed)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if failed {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "injected failure" })),
        );
    }

    let mut state = lock(&state);
    let embed_families = params
        .get("select")
        .map(|s| s.contains("families("))
        .unwrap_or(false);
    let families = state.families.clone();
    let Some(rows) = table_rows(&mut state, &table) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "unknown table" })));
    };

    let mut matched: Vec<Value> = rows
        .iter()
        .filter(|row| matches_filters(row, &params))
        .cloned()
        .collect();

    if embed_families {
        for row in matched.iter_mut() {
            let family = families
                .iter()
                .find(|f| f["id"] == row["family_id"])
                .cloned()
                .unwrap_or(Value::Null);
            row["families"] = family;
        }
    }

    if let Some(limit) = params.get("limit").and_then(|l| l.parse::<usize>().ok()) {
        matched.truncate(limit);
    }

    (StatusCode::OK, Json(Value::Array(matched)))
}

async fn rest_insert(
    State(state): State<SharedStub>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = lock(&state);
    *state.counters.entry(format!("{table}:POST")).or_insert(0) += 1;
    if let Some(remaining) = state.insert_failures.get_mut(&table) {
        if *remaining > 0 {
            *remaining -= 1;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "injected failure" })),
            );
        }
    }

    let mut row = body;
    row["id"] = json!(Uuid::new_v4());
    row["created_at"] = json!(chrono::Utc::now());
    let Some(rows) = table_rows(&mut state, &table) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "unknown table" })));
    };
    rows.push(row.clone());
    (StatusCode::CREATED, Json(Value::Array(vec![row])))
}

async fn rest_patch(
    State(state): State<SharedStub>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut state = lock(&state);
    *state.counters.entry(format!("{table}:PATCH")).or_insert(0) += 1;
    let Some(rows) = table_rows(&mut state, &table) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "unknown table" })));
    };

    let mut updated = Vec::new();
    for row in rows.iter_mut() {
        if matches_filters(row, &params) {
            if let (Some(target), Some(patch)) = (row.as_object_mut(), body.as_object()) {
                for (key, value) in patch {
                    target.insert(key.clone(), value.clone());
                }
            }
            updated.push(row.clone());
        }
    }
    (StatusCode::OK, Json(Value::Array(updated)))
}

async fn rest_delete(
    State(state): State<SharedStub>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let mut state = lock(&state);
    *state.counters.entry(format!("{table}:DELETE")).or_insert(0) += 1;
    let Some(rows) = table_rows(&mut state, &table) else {
        return StatusCode::NOT_FOUND;
    };
    rows.retain(|row| !matches_filters(row, &params));
    StatusCode::NO_CONTENT
}

async fn rest_rpc(
    State(state): State<SharedStub>,
    Path(function): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if function != "create_family_for_user" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "unknown function" })));
    }

    let mut state = lock(&state);
    *state
        .counters
        .entry("rpc:create_family_for_user".to_string())
        .or_insert(0) += 1;

    let user_id = body["user_id"].clone();
    let family_name = body["family_name"].clone();
    let family_id = Uuid::new_v4();
    let member_id = Uuid::new_v4();

    state.families.push(json!({
        "id": family_id,
        "name": family_name,
        "owner_id": user_id,
        "created_by": user_id,
    }));
    state.family_members.push(json!({
        "id": member_id,
        "family_id": family_id,
        "user_id": user_id,
        "role": "admin",
        "relationship": "Self",
        "permissions": {},
    }));

    (
        StatusCode::OK,
        Json(json!({
            "family_id": family_id,
            "family_name": family_name,
            "member_id": member_id,
        })),
    )
}
