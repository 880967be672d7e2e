use sqlx::sqlite::SqlitePool;

pub const ADMIN_ROLE: &str = "Admin";
pub const USER_ROLE: &str = "User";

#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check whether a role exists (case-insensitive).
    pub async fn exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        Ok(self.get_by_name(name).await?.is_some())
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>, sqlx::Error> {
        sqlx::query_as("SELECT id, name FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    /// Create a role. Returns the role ID.
    pub async fn create(&self, name: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO roles (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Add a user to a role. Returns false if the user already had it.
    pub async fn add_user_to_role(&self, user_id: i64, role_id: i64) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_user_in_role(&self, user_id: i64, role_name: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = ? AND r.name = ?",
        )
        .bind(user_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Role names held by a user, in alphabetical order.
    pub async fn roles_for_user(&self, user_id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = ? ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
