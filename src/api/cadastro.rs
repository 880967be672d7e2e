//! Registration record endpoints.
//!
//! Every route needs a valid access token; creating, changing and deleting
//! records additionally needs the `User` or `Admin` role.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, FieldErrors, ResultExt};
use crate::auth::{AnyRole, Auth, UserOrAdmin};
use crate::db::{Cadastro, Database, NewCadastro};
use crate::impl_has_auth_backend;
use crate::jwt::JwtSettings;
use crate::pagination::{PageRequest, PagedResult};
use crate::validation;

#[derive(Clone)]
pub struct CadastroState {
    pub db: Database,
    pub jwt: Arc<JwtSettings>,
}

impl_has_auth_backend!(CadastroState);

pub fn router(state: CadastroState) -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/paged", get(list_paged))
        .route("/cpf/{cpf}", get(get_by_cpf))
        .route(
            "/{id}",
            get(get_by_id)
                .put(update)
                .patch(patch)
                .delete(remove),
        )
        .with_state(state)
}

// =============================================================================
// DTOs
// =============================================================================

/// A record as returned to clients.
#[derive(Debug, Serialize)]
pub struct CadastroReadDto {
    pub id: i64,
    pub cpf: String,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub nascimento: NaiveDate,
    pub estado: String,
    pub cidade: String,
    pub cargo: String,
}

impl From<Cadastro> for CadastroReadDto {
    fn from(c: Cadastro) -> Self {
        Self {
            id: c.id,
            cpf: c.cpf,
            nome: c.nome,
            email: c.email,
            telefone: c.telefone,
            nascimento: c.nascimento,
            estado: c.estado,
            cidade: c.cidade,
            cargo: c.cargo,
        }
    }
}

/// Fields accepted on create. Missing fields are reported as validation
/// errors rather than rejected by the JSON extractor.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CadastroCreateDto {
    pub cpf: Option<String>,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub nascimento: Option<NaiveDate>,
    pub estado: Option<String>,
    pub cidade: Option<String>,
    pub cargo: Option<String>,
}

/// Full replacement body for PUT. `id` must match the path.
#[derive(Debug, Deserialize)]
pub struct CadastroUpdateDto {
    pub id: i64,
    #[serde(flatten)]
    pub fields: CadastroCreateDto,
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CadastroPatchDto {
    pub cpf: Option<String>,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub nascimento: Option<NaiveDate>,
    pub estado: Option<String>,
    pub cidade: Option<String>,
    pub cargo: Option<String>,
}

impl CadastroPatchDto {
    /// Overlay the patch on a stored record.
    fn apply_to(self, existing: Cadastro) -> CadastroCreateDto {
        CadastroCreateDto {
            cpf: Some(self.cpf.unwrap_or(existing.cpf)),
            nome: Some(self.nome.unwrap_or(existing.nome)),
            email: Some(self.email.unwrap_or(existing.email)),
            telefone: Some(self.telefone.unwrap_or(existing.telefone)),
            nascimento: Some(self.nascimento.unwrap_or(existing.nascimento)),
            estado: Some(self.estado.unwrap_or(existing.estado)),
            cidade: Some(self.cidade.unwrap_or(existing.cidade)),
            cargo: Some(self.cargo.unwrap_or(existing.cargo)),
        }
    }
}

fn trimmed(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or_default()
}

/// Required text that must start with an uppercase letter.
fn proper_name(value: &str) -> Result<(), validator::ValidationError> {
    validation::validate_required(value)?;
    validation::validate_first_letter_uppercase(value)
}

impl TryFrom<CadastroCreateDto> for NewCadastro {
    type Error = ApiError;

    fn try_from(dto: CadastroCreateDto) -> Result<Self, Self::Error> {
        let cpf = trimmed(&dto.cpf);
        let nome = trimmed(&dto.nome);
        let email = trimmed(&dto.email);
        let telefone = trimmed(&dto.telefone);
        let estado = trimmed(&dto.estado);
        let cidade = trimmed(&dto.cidade);
        let cargo = trimmed(&dto.cargo);

        let mut errors = FieldErrors::new();
        errors.check(
            "cpf",
            validation::validate_required(cpf).and_then(|_| validation::validate_cpf(cpf)),
        );
        errors.check("nome", proper_name(nome));
        errors.check(
            "email",
            validation::validate_required(email).and_then(|_| validation::validate_email(email)),
        );
        errors.check(
            "telefone",
            validation::validate_required(telefone)
                .and_then(|_| validation::validate_phone(telefone)),
        );
        errors.check(
            "nascimento",
            match dto.nascimento {
                Some(_) => Ok(()),
                None => validation::validate_required(""),
            },
        );
        errors.check("estado", proper_name(estado));
        errors.check("cidade", proper_name(cidade));
        errors.check("cargo", proper_name(cargo));
        errors.into_result()?;

        let cpf = validation::normalize_cpf(cpf)
            .ok_or_else(|| ApiError::internal("CPF normalization failed"))?;
        let nascimento = dto
            .nascimento
            .ok_or_else(|| ApiError::internal("Missing birth date"))?;

        Ok(NewCadastro {
            cpf,
            nome: nome.to_string(),
            email: email.to_string(),
            telefone: telefone.to_string(),
            nascimento,
            estado: estado.to_string(),
            cidade: cidade.to_string(),
            cargo: cargo.to_string(),
        })
    }
}

// =============================================================================
// Reads
// =============================================================================

async fn list(
    State(state): State<CadastroState>,
    _auth: Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .db
        .cadastros()
        .list()
        .await
        .db_err("Failed to list records")?;

    Ok(Json(
        records
            .into_iter()
            .map(CadastroReadDto::from)
            .collect::<Vec<_>>(),
    ))
}

async fn list_paged(
    State(state): State<CadastroState>,
    _auth: Auth<AnyRole>,
    Query(request): Query<PageRequest>,
) -> Result<Json<PagedResult<CadastroReadDto>>, ApiError> {
    let page = state
        .db
        .cadastros()
        .page(request)
        .await
        .db_err("Failed to list records")?;

    Ok(Json(page.map(CadastroReadDto::from)))
}

async fn find(state: &CadastroState, id: i64) -> Result<Cadastro, ApiError> {
    state
        .db
        .cadastros()
        .get(id)
        .await
        .db_err("Failed to get record")?
        .ok_or_else(|| {
            warn!(id, "Record not found");
            ApiError::not_found(format!("Record {} not found", id))
        })
}

async fn get_by_id(
    State(state): State<CadastroState>,
    _auth: Auth<AnyRole>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(CadastroReadDto::from(find(&state, id).await?)))
}

async fn get_by_cpf(
    State(state): State<CadastroState>,
    _auth: Auth<AnyRole>,
    Path(cpf): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::not_found(format!("Record with CPF {} not found", cpf));

    let normalized = validation::normalize_cpf(&cpf).ok_or_else(not_found)?;
    let record = state
        .db
        .cadastros()
        .get_by_cpf(&normalized)
        .await
        .db_err("Failed to get record")?
        .ok_or_else(not_found)?;

    Ok(Json(CadastroReadDto::from(record)))
}

// =============================================================================
// Writes
// =============================================================================

async fn ensure_cpf_available(
    state: &CadastroState,
    cpf: &str,
    excluding_id: Option<i64>,
) -> Result<(), ApiError> {
    let taken = state
        .db
        .cadastros()
        .exists_by_cpf(cpf, excluding_id)
        .await
        .db_err("Failed to check CPF")?;
    if taken {
        return Err(ApiError::conflict("CPF is already registered"));
    }
    Ok(())
}

async fn create(
    State(state): State<CadastroState>,
    Auth(user, _): Auth<UserOrAdmin>,
    Json(payload): Json<CadastroCreateDto>,
) -> Result<impl IntoResponse, ApiError> {
    let record = NewCadastro::try_from(payload)?;
    ensure_cpf_available(&state, &record.cpf, None).await?;

    let stored = state
        .db
        .cadastros()
        .add(record)
        .await
        .db_err("Failed to create record")?;

    info!(id = stored.id, user = user.username(), "Record created");

    let location = HeaderValue::from_str(&format!("/api/cadastro/{}", stored.id))
        .internal_err("Failed to build location header")?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(CadastroReadDto::from(stored)),
    ))
}

async fn update(
    State(state): State<CadastroState>,
    Auth(user, _): Auth<UserOrAdmin>,
    Path(id): Path<i64>,
    Json(payload): Json<CadastroUpdateDto>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.id != id {
        return Err(ApiError::bad_request(
            "Record ID in the body does not match the URL",
        ));
    }

    let record = NewCadastro::try_from(payload.fields)?.with_id(id);
    find(&state, id).await?;
    ensure_cpf_available(&state, &record.cpf, Some(id)).await?;

    let updated = state
        .db
        .cadastros()
        .update(&record)
        .await
        .db_err("Failed to update record")?;
    if !updated {
        return Err(ApiError::not_found(format!("Record {} not found", id)));
    }

    info!(id, user = user.username(), "Record updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn patch(
    State(state): State<CadastroState>,
    Auth(user, _): Auth<UserOrAdmin>,
    Path(id): Path<i64>,
    Json(payload): Json<CadastroPatchDto>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = find(&state, id).await?;
    let record = NewCadastro::try_from(payload.apply_to(existing))?.with_id(id);
    ensure_cpf_available(&state, &record.cpf, Some(id)).await?;

    let updated = state
        .db
        .cadastros()
        .update(&record)
        .await
        .db_err("Failed to update record")?;
    if !updated {
        return Err(ApiError::not_found(format!("Record {} not found", id)));
    }

    info!(id, user = user.username(), "Record patched");
    Ok(Json(CadastroReadDto::from(record)))
}

async fn remove(
    State(state): State<CadastroState>,
    Auth(user, _): Auth<UserOrAdmin>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .db
        .cadastros()
        .remove(id)
        .await
        .db_err("Failed to delete record")?;
    if !removed {
        return Err(ApiError::not_found(format!("Record {} not found", id)));
    }

    info!(id, user = user.username(), "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_dto() -> CadastroCreateDto {
        CadastroCreateDto {
            cpf: Some("123.456.789-09".into()),
            nome: Some("Maria Silva".into()),
            email: Some("maria@example.com".into()),
            telefone: Some("(11) 98765-4321".into()),
            nascimento: NaiveDate::from_ymd_opt(1990, 5, 17),
            estado: Some("São Paulo".into()),
            cidade: Some("Campinas".into()),
            cargo: Some("Analista".into()),
        }
    }

    #[test]
    fn test_valid_dto_normalizes_cpf() {
        let record = NewCadastro::try_from(valid_dto()).unwrap();
        assert_eq!(record.cpf, "12345678909");
        assert_eq!(record.nome, "Maria Silva");
    }

    #[test]
    fn test_invalid_fields_are_collected() {
        let dto = CadastroCreateDto {
            cpf: Some("12345678900".into()),
            nome: Some("maria".into()),
            nascimento: None,
            ..valid_dto()
        };

        match NewCadastro::try_from(dto) {
            Err(ApiError::Validation(errors)) => {
                let fields = errors.field_errors();
                assert!(fields.contains_key("cpf"));
                assert!(fields.contains_key("nome"));
                assert!(fields.contains_key("nascimento"));
                assert!(!fields.contains_key("email"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_patch_overlays_existing() {
        let existing = NewCadastro::try_from(valid_dto()).unwrap().with_id(7);
        let patch = CadastroPatchDto {
            cargo: Some("Gerente".into()),
            ..Default::default()
        };

        let merged = NewCadastro::try_from(patch.apply_to(existing.clone())).unwrap();
        assert_eq!(merged.cargo, "Gerente");
        assert_eq!(merged.cpf, existing.cpf);
        assert_eq!(merged.nascimento, existing.nascimento);
    }

    #[test]
    fn test_update_dto_flattens_fields() {
        let dto: CadastroUpdateDto = serde_json::from_value(serde_json::json!({
            "id": 3,
            "cpf": "12345678909",
            "nome": "Maria",
            "nascimento": "1990-05-17"
        }))
        .unwrap();

        assert_eq!(dto.id, 3);
        assert_eq!(dto.fields.nome.as_deref(), Some("Maria"));
        assert_eq!(dto.fields.nascimento, NaiveDate::from_ymd_opt(1990, 5, 17));
    }
}
