#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use crm_auth::{
    build_router,
    config::AuthConfig,
    services::{InMemoryAttemptStore, InMemoryUserStore, MemoryAuditSink},
    AppState,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use service_core::config::Config;
use std::{collections::HashMap, sync::Arc};
use tower::ServiceExt;

pub const PASSWORD: &str = "Sup3rSecret";
pub const CLIENT_IP: &str = "203.0.113.7";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<InMemoryUserStore>,
    pub audit: Arc<MemoryAuditSink>,
}

pub fn test_config(overrides: &[(&str, &str)]) -> AuthConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("PASSWORD_HASH_MEMORY_KIB".to_string(), "1024".to_string()),
        ("PASSWORD_HASH_ITERATIONS".to_string(), "1".to_string()),
        ("ALLOWED_ORIGINS".to_string(), "http://localhost:3000".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    AuthConfig::from_lookup(Config::default(), |key| vars.get(key).cloned())
        .expect("test config should be valid")
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(&[])
}

pub fn spawn_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let users = Arc::new(InMemoryUserStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let state = AppState::new(
        test_config(overrides),
        users.clone(),
        Arc::new(InMemoryAttemptStore::new()),
        audit.clone(),
    )
    .expect("state should build");
    let router = build_router(state.clone()).expect("router should build");

    TestApp {
        router,
        state,
        users,
        audit,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).expect("response body should be JSON")
    }

    /// Value of `name` from the Set-Cookie headers, if one was set.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.set_cookie(name).and_then(|raw| {
            raw.split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map(|(_, value)| value.to_string())
        })
    }

    /// The full Set-Cookie header for `name`.
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&prefix))
            .map(str::to_string)
    }
}

pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            headers: vec![("x-forwarded-for".to_string(), CLIENT_IP.to_string())],
            body: None,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .push(("authorization".to_string(), format!("Bearer {}", token)));
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push(("cookie".to_string(), format!("{}={}", name, value)));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub async fn send(self, app: &TestApp) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = match self.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();

        TestResponse {
            status,
            headers,
            bytes,
        }
    }
}

pub fn get(uri: &str) -> RequestBuilder {
    RequestBuilder::new(Method::GET, uri)
}

pub fn post(uri: &str) -> RequestBuilder {
    RequestBuilder::new(Method::POST, uri)
}

pub fn delete(uri: &str) -> RequestBuilder {
    RequestBuilder::new(Method::DELETE, uri)
}

pub async fn register(app: &TestApp, email: &str) -> TestResponse {
    post("/auth/register")
        .json(json!({ "email": email, "password": PASSWORD, "name": "Ada Lovelace" }))
        .send(app)
        .await
}

pub async fn login(app: &TestApp, email: &str, password: &str) -> TestResponse {
    post("/auth/login")
        .json(json!({ "email": email, "password": password }))
        .send(app)
        .await
}

/// Registers `email` and logs in, returning the login response.
pub async fn registered_login(app: &TestApp, email: &str) -> TestResponse {
    let res = register(app, email).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&res.bytes));
    let res = login(app, email, PASSWORD).await;
    assert_eq!(res.status, StatusCode::OK, "{}", String::from_utf8_lossy(&res.bytes));
    res
}
