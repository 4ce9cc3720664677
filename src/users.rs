/// User Directory
///
/// The subsystem only reads principals and rewrites their password hash;
/// everything else about a user is owned elsewhere.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Agent,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Agent => "AGENT",
            Role::Customer => "CUSTOMER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "AGENT" => Ok(Role::Agent),
            "CUSTOMER" => Ok(Role::Customer),
            other => Err(AppError::Internal(format!("Unknown role '{}'", other))),
        }
    }
}

/// Authenticated principal as stored in the user directory
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Exact, case-sensitive match on username or email
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, AppError>;

    async fn save(&self, principal: &Principal) -> Result<(), AppError>;
}

/// Map-backed directory for tests and embedded use
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, Principal>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>, AppError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.username == identifier || u.email == identifier)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AppError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, AppError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn save(&self, principal: &Principal) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let clash = users.values().any(|u| {
            u.id != principal.id && (u.username == principal.username || u.email == principal.email)
        });
        if clash {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "username or email already taken".to_string(),
            )));
        }
        users.insert(principal.id, principal.clone());
        Ok(())
    }
}

/// Postgres-backed directory over the `users` table
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

type UserRow = (Uuid, String, String, String, String, bool);

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn into_principal(row: UserRow) -> Result<Principal, AppError> {
        let (id, username, email, password_hash, role, active) = row;
        Ok(Principal {
            id,
            username,
            email,
            password_hash,
            role: role.parse()?,
            active,
        })
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, is_active
            FROM users
            WHERE username = $1 OR email = $1
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::into_principal)
        .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, role, is_active FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::into_principal)
        .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::into_principal)
        .transpose()
    }

    async fn save(&self, principal: &Principal) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, is_active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                role = EXCLUDED.role,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(principal.id)
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.role.as_str())
        .bind(principal.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
