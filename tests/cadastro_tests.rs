mod common;

use axum::http::{StatusCode, header};
use cadastro::db::NewCadastro;
use chrono::NaiveDate;
use common::{TestApp, body_json, cadastro_body, create_test_app};
use serde_json::json;

const CPF: &str = "529.982.247-25";
const CPF_DIGITS: &str = "52998224725";
const OTHER_CPF: &str = "11144477735";

async fn seed(app: &TestApp, cpf: &str, nome: &str) -> i64 {
    app.db
        .cadastros()
        .add(NewCadastro {
            cpf: cpf.into(),
            nome: nome.into(),
            email: "seed@example.com".into(),
            telefone: "11 3333-4444".into(),
            nascimento: NaiveDate::from_ymd_opt(1985, 1, 2).unwrap(),
            estado: "Paraná".into(),
            cidade: "Curitiba".into(),
            cargo: "Gerente".into(),
        })
        .await
        .unwrap()
        .id
}

// --- Authorization ---

#[tokio::test]
async fn test_requires_authentication() {
    let app = create_test_app().await;

    let response = app.send("GET", "/api/cadastro", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send("POST", "/api/cadastro", None, Some(cadastro_body(CPF)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejects_garbage_token() {
    let app = create_test_app().await;

    let response = app
        .send("GET", "/api/cadastro", Some("not.a.token"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_without_role_can_read_but_not_write() {
    let app = create_test_app().await;
    let token = app.token_for("visitor", None).await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    let response = app.send("GET", "/api/cadastro", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(cadastro_body(OTHER_CPF)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send("DELETE", &format!("/api/cadastro/{}", id), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_can_write() {
    let app = create_test_app().await;
    let token = app.admin_token().await;

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(cadastro_body(CPF)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

// --- Create ---

#[tokio::test]
async fn test_create_success() {
    let app = create_test_app().await;
    let token = app.user_token().await;

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(cadastro_body(CPF)))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let location = response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string();
    let json = body_json(response).await;
    let id = json["id"].as_i64().unwrap();

    assert_eq!(location, format!("/api/cadastro/{}", id));
    assert_eq!(json["cpf"], CPF_DIGITS);
    assert_eq!(json["nome"], "Maria Silva");
    assert_eq!(json["nascimento"], "1990-05-17");

    let fetched = app.send("GET", &location, Some(&token), None).await;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_json(fetched).await["email"], "maria@example.com");
}

#[tokio::test]
async fn test_create_ignores_client_id() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    seed(&app, OTHER_CPF, "Ana").await;

    let mut body = cadastro_body(CPF);
    body["id"] = json!(999);

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_ne!(body_json(response).await["id"], 999);
}

#[tokio::test]
async fn test_create_duplicate_cpf() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    seed(&app, CPF_DIGITS, "Ana").await;

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(cadastro_body(CPF)))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let app = create_test_app().await;
    let token = app.user_token().await;

    let mut body = cadastro_body("123.456.789-00");
    body["nome"] = json!("maria");
    body["telefone"] = json!("abc");
    body["email"] = json!("maria");

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Validation failed");
    for field in ["cpf", "nome", "telefone", "email"] {
        assert!(!json["fields"][field].is_null(), "missing error for {}", field);
    }
    assert!(json["fields"]["cidade"].is_null());
}

#[tokio::test]
async fn test_create_missing_fields() {
    let app = create_test_app().await;
    let token = app.user_token().await;

    let response = app
        .send("POST", "/api/cadastro", Some(&token), Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(!json["fields"]["nascimento"].is_null());
    assert!(!json["fields"]["cargo"].is_null());
}

// --- Reads ---

#[tokio::test]
async fn test_get_missing() {
    let app = create_test_app().await;
    let token = app.user_token().await;

    let response = app.send("GET", "/api/cadastro/42", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_all() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    seed(&app, CPF_DIGITS, "Ana").await;
    seed(&app, OTHER_CPF, "Bruno").await;

    let response = app.send("GET", "/api/cadastro", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_by_cpf_any_format() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    for cpf in [CPF_DIGITS, "529.982.247-25"] {
        let response = app
            .send("GET", &format!("/api/cadastro/cpf/{}", cpf), Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], id);
    }

    let response = app
        .send("GET", "/api/cadastro/cpf/12345678900", Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send("GET", &format!("/api/cadastro/cpf/{}", OTHER_CPF), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_paged() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    seed(&app, CPF_DIGITS, "Ana").await;
    seed(&app, OTHER_CPF, "Bruno").await;
    seed(&app, "12345678909", "Carla").await;

    let response = app
        .send(
            "GET",
            "/api/cadastro/paged?page_number=2&page_size=2",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["total_items"], 3);
    assert_eq!(json["total_pages"], 2);
    assert_eq!(json["page_number"], 2);
    assert_eq!(json["page_size"], 2);
    assert_eq!(json["items"].as_array().unwrap().len(), 1);

    let response = app
        .send("GET", "/api/cadastro/paged", Some(&token), None)
        .await;
    let json = body_json(response).await;
    assert_eq!(json["page_number"], 1);
    assert_eq!(json["items"].as_array().unwrap().len(), 3);
}

// --- Update ---

#[tokio::test]
async fn test_put_replaces_record() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    let mut body = cadastro_body(CPF);
    body["id"] = json!(id);
    body["cargo"] = json!("Diretora");

    let response = app
        .send("PUT", &format!("/api/cadastro/{}", id), Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let stored = app.db.cadastros().get(id).await.unwrap().unwrap();
    assert_eq!(stored.cargo, "Diretora");
    assert_eq!(stored.nome, "Maria Silva");
}

#[tokio::test]
async fn test_put_id_mismatch() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    let mut body = cadastro_body(CPF);
    body["id"] = json!(id + 1);

    let response = app
        .send("PUT", &format!("/api/cadastro/{}", id), Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_put_missing_record() {
    let app = create_test_app().await;
    let token = app.user_token().await;

    let mut body = cadastro_body(CPF);
    body["id"] = json!(7);

    let response = app
        .send("PUT", "/api/cadastro/7", Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_cpf_owned_by_other_record() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    seed(&app, CPF_DIGITS, "Ana").await;
    let id = seed(&app, OTHER_CPF, "Bruno").await;

    let mut body = cadastro_body(CPF);
    body["id"] = json!(id);

    let response = app
        .send("PUT", &format!("/api/cadastro/{}", id), Some(&token), Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_patch_keeps_absent_fields() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    let response = app
        .send(
            "PATCH",
            &format!("/api/cadastro/{}", id),
            Some(&token),
            Some(json!({ "cidade": "Londrina" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["cidade"], "Londrina");
    assert_eq!(json["nome"], "Ana");
    assert_eq!(json["cpf"], CPF_DIGITS);
}

#[tokio::test]
async fn test_patch_validates_result() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;

    let response = app
        .send(
            "PATCH",
            &format!("/api/cadastro/{}", id),
            Some(&token),
            Some(json!({ "estado": "paraná" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored = app.db.cadastros().get(id).await.unwrap().unwrap();
    assert_eq!(stored.estado, "Paraná");
}

// --- Delete ---

#[tokio::test]
async fn test_delete() {
    let app = create_test_app().await;
    let token = app.user_token().await;
    let id = seed(&app, CPF_DIGITS, "Ana").await;
    let uri = format!("/api/cadastro/{}", id);

    let response = app.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.send("GET", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
