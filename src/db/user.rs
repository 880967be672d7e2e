use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub refresh_token: Option<String>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,
}

impl User {
    /// True when `presented` is the stored refresh token and it has not expired.
    /// A missing expiry counts as expired.
    pub fn refresh_token_is_valid(&self, presented: &str, now: DateTime<Utc>) -> bool {
        let matches = self.refresh_token.as_deref() == Some(presented);
        let unexpired = self.refresh_token_expiry.is_some_and(|expiry| expiry > now);
        matches && unexpired
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    refresh_token: Option<String>,
    refresh_token_expiry: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            refresh_token: row.refresh_token,
            refresh_token_expiry: row.refresh_token_expiry,
        }
    }
}

const USER_COLUMNS: &str =
    "SELECT id, username, email, password_hash, refresh_token, refresh_token_expiry FROM users";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Returns the user ID.
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<i64, sqlx::Error> {
        let result =
            sqlx::query("INSERT INTO users (username, email, password_hash) VALUES (?, ?, ?)")
                .bind(username)
                .bind(email)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE username = ?", USER_COLUMNS))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by e-mail (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Store a freshly issued refresh token, replacing any previous one.
    pub async fn set_refresh_token(
        &self,
        id: i64,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, refresh_token_expiry = ? WHERE id = ?",
        )
        .bind(token)
        .bind(expiry)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the refresh token only if `presented` is still the stored one.
    /// Returns false when another renewal or a revocation got there first.
    pub async fn rotate_refresh_token(
        &self,
        id: i64,
        presented: &str,
        new_token: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, refresh_token_expiry = ?
             WHERE id = ? AND refresh_token = ?",
        )
        .bind(new_token)
        .bind(new_expiry)
        .bind(id)
        .bind(presented)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the stored refresh token.
    pub async fn revoke_refresh_token(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
