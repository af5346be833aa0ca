use async_trait::async_trait;
use chrono::NaiveDateTime;
use common_auth::{DirectoryError, InMemoryUserDirectory, Role, UserDirectory, UserIdentity};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One page of users plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub items: Vec<UserIdentity>,
    pub total: i64,
}

/// Storage behind the user routes. Auth lookups come from [`UserDirectory`].
#[async_trait]
pub trait UserStore: UserDirectory {
    /// Users ordered by creation time, oldest first.
    async fn list_users(&self, offset: i64, limit: i64) -> Result<UserPage, DirectoryError>;
}

const USER_COLUMNS: &str =
    "id, cognito_user_id, full_name, email, role, responsible_province, is_active, created_at";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    cognito_user_id: String,
    full_name: String,
    email: Option<String>,
    role: String,
    responsible_province: Option<String>,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl TryFrom<UserRow> for UserIdentity {
    type Error = DirectoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|err| DirectoryError(format!("user {}: {err}", row.id)))?;
        Ok(UserIdentity {
            id: row.id,
            external_subject: row.cognito_user_id,
            full_name: row.full_name,
            email: row.email,
            role,
            responsible_province: row.responsible_province,
            is_active: row.is_active,
            created_at: row.created_at.and_utc(),
        })
    }
}

fn storage_err(err: sqlx::Error) -> DirectoryError {
    DirectoryError(err.to_string())
}

/// Postgres-backed store over the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        subject: Option<&str>,
    ) -> Result<Option<UserIdentity>, DirectoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        if let Some(subject) = subject {
            query = query.bind(subject);
        }
        query
            .fetch_optional(&self.db)
            .await
            .map_err(storage_err)?
            .map(UserIdentity::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserDirectory for PgUserStore {
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<UserIdentity>, DirectoryError> {
        self.fetch_one_where("cognito_user_id = $1", Some(subject))
            .await
    }

    async fn find_any_active_admin(&self) -> Result<Option<UserIdentity>, DirectoryError> {
        self.fetch_one_where(
            "role = 'ADMIN' AND is_active ORDER BY created_at DESC LIMIT 1",
            None,
        )
        .await
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list_users(&self, offset: i64, limit: i64) -> Result<UserPage, DirectoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .map_err(storage_err)?;

        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id OFFSET $1 LIMIT $2");
        let items = sqlx::query_as::<_, UserRow>(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.db)
            .await
            .map_err(storage_err)?
            .into_iter()
            .map(UserIdentity::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UserPage { items, total })
    }
}

#[async_trait]
impl UserStore for InMemoryUserDirectory {
    async fn list_users(&self, offset: i64, limit: i64) -> Result<UserPage, DirectoryError> {
        let mut users = self.snapshot()?;
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let total = users.len() as i64;
        let items = users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(UserPage { items, total })
    }
}
