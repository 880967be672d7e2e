#![allow(dead_code)]

use std::num::NonZeroU32;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use cadastro::db::{ADMIN_ROLE, Database, USER_ROLE};
use cadastro::jwt::JwtSettings;
use cadastro::rate_limit::RateLimitConfig;
use cadastro::{ServerConfig, create_app};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test-jwt-secret-with-at-least-32-chars";
pub const PASSWORD: &str = "Secret1!";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtSettings,
}

/// Builder for an in-memory app. Rate limits are high by default so tests
/// that log in repeatedly are not throttled.
pub struct TestAppBuilder {
    jwt: JwtSettings,
    no_signup: bool,
    rate_limit: Option<RateLimitConfig>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            jwt: JwtSettings::new(TEST_SECRET),
            no_signup: false,
            rate_limit: None,
        }
    }

    pub fn jwt(mut self, jwt: JwtSettings) -> Self {
        self.jwt = jwt;
        self
    }

    pub fn no_signup(mut self) -> Self {
        self.no_signup = true;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub async fn build(self) -> TestApp {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");

        let rate_limit = self.rate_limit.unwrap_or_else(|| {
            let high = NonZeroU32::new(10_000).unwrap();
            RateLimitConfig::with_limits(high, high)
        });

        let config = ServerConfig {
            db: db.clone(),
            jwt: self.jwt.clone(),
            no_signup: self.no_signup,
            rate_limit,
        };

        TestApp {
            app: create_app(&config),
            db,
            jwt: self.jwt,
        }
    }
}

pub async fn create_test_app() -> TestApp {
    TestAppBuilder::new().build().await
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn register(&self, username: &str, email: &str) -> Response {
        self.send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "username": username, "email": email, "password": PASSWORD })),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    /// Add an existing user to a role directly in the database.
    pub async fn grant(&self, username: &str, role_name: &str) {
        let user = self
            .db
            .users()
            .get_by_username(username)
            .await
            .unwrap()
            .expect("user exists");
        let role = self
            .db
            .roles()
            .get_by_name(role_name)
            .await
            .unwrap()
            .expect("role exists");
        self.db.roles().add_user_to_role(user.id, role.id).await.unwrap();
    }

    /// Register, optionally grant a role, and log in. Returns the login body.
    pub async fn user_with_role(&self, username: &str, role: Option<&str>) -> Value {
        let response = self
            .register(username, &format!("{}@example.com", username))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        if let Some(role) = role {
            self.grant(username, role).await;
        }

        let response = self.login(username, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    /// Access token for a new user in the given role.
    pub async fn token_for(&self, username: &str, role: Option<&str>) -> String {
        let login = self.user_with_role(username, role).await;
        login["token"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.token_for("admin", Some(ADMIN_ROLE)).await
    }

    pub async fn user_token(&self) -> String {
        self.token_for("operator", Some(USER_ROLE)).await
    }
}

pub async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

/// A complete, valid record body.
pub fn cadastro_body(cpf: &str) -> Value {
    json!({
        "cpf": cpf,
        "nome": "Maria Silva",
        "email": "maria@example.com",
        "telefone": "(11) 98765-4321",
        "nascimento": "1990-05-17",
        "estado": "São Paulo",
        "cidade": "Campinas",
        "cargo": "Analista"
    })
}
