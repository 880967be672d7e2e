use chrono::NaiveDate;
use sqlx::sqlite::SqlitePool;

use crate::pagination::{PageRequest, PagedResult};

#[derive(Clone)]
pub struct CadastroStore {
    pool: SqlitePool,
}

/// A stored registration record. `cpf` holds the bare 11 digits.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Cadastro {
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

/// A registration record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCadastro {
    pub cpf: String,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub nascimento: NaiveDate,
    pub estado: String,
    pub cidade: String,
    pub cargo: String,
}

impl NewCadastro {
    pub fn with_id(self, id: i64) -> Cadastro {
        Cadastro {
            id,
            cpf: self.cpf,
            nome: self.nome,
            email: self.email,
            telefone: self.telefone,
            nascimento: self.nascimento,
            estado: self.estado,
            cidade: self.cidade,
            cargo: self.cargo,
        }
    }
}

const CADASTRO_COLUMNS: &str =
    "SELECT id, cpf, nome, email, telefone, nascimento, estado, cidade, cargo FROM cadastros";

impl CadastroStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Cadastro>, sqlx::Error> {
        sqlx::query_as(&format!("{} WHERE id = ?", CADASTRO_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_cpf(&self, cpf: &str) -> Result<Option<Cadastro>, sqlx::Error> {
        sqlx::query_as(&format!("{} WHERE cpf = ?", CADASTRO_COLUMNS))
            .bind(cpf)
            .fetch_optional(&self.pool)
            .await
    }

    /// All records ordered by ID.
    pub async fn list(&self) -> Result<Vec<Cadastro>, sqlx::Error> {
        sqlx::query_as(&format!("{} ORDER BY id", CADASTRO_COLUMNS))
            .fetch_all(&self.pool)
            .await
    }

    /// One page of records ordered by ID.
    pub async fn page(&self, request: PageRequest) -> Result<PagedResult<Cadastro>, sqlx::Error> {
        let request = request.clamped();

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cadastros")
            .fetch_one(&self.pool)
            .await?;

        let items: Vec<Cadastro> =
            sqlx::query_as(&format!("{} ORDER BY id LIMIT ? OFFSET ?", CADASTRO_COLUMNS))
                .bind(request.limit())
                .bind(request.offset())
                .fetch_all(&self.pool)
                .await?;

        Ok(PagedResult::new(items, total.max(0) as u64, request))
    }

    /// Insert a record. Returns the stored record with its new ID.
    pub async fn add(&self, record: NewCadastro) -> Result<Cadastro, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO cadastros (cpf, nome, email, telefone, nascimento, estado, cidade, cargo)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.cpf)
        .bind(&record.nome)
        .bind(&record.email)
        .bind(&record.telefone)
        .bind(record.nascimento)
        .bind(&record.estado)
        .bind(&record.cidade)
        .bind(&record.cargo)
        .execute(&self.pool)
        .await?;
        Ok(record.with_id(result.last_insert_rowid()))
    }

    /// Overwrite every field of an existing record. Returns false if it does not exist.
    pub async fn update(&self, record: &Cadastro) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE cadastros SET cpf = ?, nome = ?, email = ?, telefone = ?, nascimento = ?,
             estado = ?, cidade = ?, cargo = ? WHERE id = ?",
        )
        .bind(&record.cpf)
        .bind(&record.nome)
        .bind(&record.email)
        .bind(&record.telefone)
        .bind(record.nascimento)
        .bind(&record.estado)
        .bind(&record.cidade)
        .bind(&record.cargo)
        .bind(record.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cadastros WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check whether a CPF is taken, optionally ignoring one record (the one being updated).
    pub async fn exists_by_cpf(
        &self,
        cpf: &str,
        excluding_id: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = match excluding_id {
            Some(id) => {
                sqlx::query_as("SELECT id FROM cadastros WHERE cpf = ? AND id != ?")
                    .bind(cpf)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT id FROM cadastros WHERE cpf = ?")
                    .bind(cpf)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.is_some())
    }
}
