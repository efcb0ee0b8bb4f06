use async_trait::async_trait;
use once_cell::sync::OnceCell;
use sql_query_builder as sql;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

use crate::model::{Coordinates, LanguageTag, Role, UnitSystem, User, UserId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UserStoreError {
    #[error("persistence failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row failed to decode: {0}")]
    Decode(String),
}

/// User directory consulted by the scheduler's sweep and digest tick. Only the read paths
/// the scheduler needs are exposed here; profile management is an external collaborator's
/// concern.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, id: UserId) -> Result<Option<User>, UserStoreError>;

    /// Active users with a non-empty location label -- the sweep's candidate set.
    async fn list_schedulable(&self) -> Result<Vec<User>, UserStoreError>;

    async fn upsert(&self, user: User) -> Result<(), UserStoreError>;
}

#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    language: String,
    latitude: f64,
    longitude: f64,
    location_label: String,
    timezone: String,
    units: String,
    active: bool,
    role: String,
}

impl UserRow {
    fn try_into_model(self) -> Result<User, UserStoreError> {
        let id = uuid::Uuid::parse_str(&self.id)
            .map(UserId::new)
            .map_err(|err| UserStoreError::Decode(format!("users.id: {err}")))?;
        let language = LanguageTag::parse(self.language)
            .map_err(|err| UserStoreError::Decode(format!("users.language: {err}")))?;
        let coordinates = Coordinates::new(self.latitude, self.longitude)
            .map_err(|err| UserStoreError::Decode(format!("users.coordinates: {err}")))?;
        let units = UnitSystem::from_str(&self.units)
            .map_err(|err| UserStoreError::Decode(format!("users.units: {err}")))?;
        let role = Role::from_str(&self.role)
            .map_err(|err| UserStoreError::Decode(format!("users.role: {err}")))?;

        Ok(User {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            language,
            coordinates,
            location_label: self.location_label,
            timezone: self.timezone,
            units,
            active: self.active,
            role,
        })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find(&self, id: UserId) -> Result<Option<User>, UserStoreError> {
        static FIND_SQL: OnceCell<String> = OnceCell::new();
        let query = FIND_SQL.get_or_init(|| {
            sql::Select::new()
                .select("id, first_name, last_name, language, latitude, longitude, location_label, timezone, units, active, role")
                .from("users")
                .where_clause("id = $1")
                .to_string()
        });

        let row: Option<UserRow> =
            sqlx::query_as(query).bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.map(UserRow::try_into_model).transpose()
    }

    async fn list_schedulable(&self) -> Result<Vec<User>, UserStoreError> {
        static LIST_SQL: OnceCell<String> = OnceCell::new();
        let query = LIST_SQL.get_or_init(|| {
            sql::Select::new()
                .select("id, first_name, last_name, language, latitude, longitude, location_label, timezone, units, active, role")
                .from("users")
                .where_clause("active = true AND location_label <> ''")
                .to_string()
        });

        let rows: Vec<UserRow> = sqlx::query_as(query).fetch_all(&self.pool).await?;
        rows.into_iter().map(UserRow::try_into_model).collect()
    }

    async fn upsert(&self, user: User) -> Result<(), UserStoreError> {
        static UPSERT_SQL: OnceCell<String> = OnceCell::new();
        let query = UPSERT_SQL.get_or_init(|| {
            sql::Insert::new()
                .insert_into(
                    "users (id, first_name, last_name, language, latitude, longitude, location_label, timezone, units, active, role)",
                )
                .values("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
                .on_conflict("(id) DO UPDATE SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name, language = EXCLUDED.language, latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude, location_label = EXCLUDED.location_label, timezone = EXCLUDED.timezone, units = EXCLUDED.units, active = EXCLUDED.active, role = EXCLUDED.role")
                .to_string()
        });

        sqlx::query(query)
            .bind(user.id.to_string())
            .bind(user.first_name)
            .bind(user.last_name)
            .bind(user.language.as_str())
            .bind(user.coordinates.latitude())
            .bind(user.coordinates.longitude())
            .bind(user.location_label)
            .bind(user.timezone)
            .bind(user.units.to_string())
            .bind(user.active)
            .bind(user.role.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find(&self, id: UserId) -> Result<Option<User>, UserStoreError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn list_schedulable(&self) -> Result<Vec<User>, UserStoreError> {
        Ok(self.users.lock().unwrap().values().filter(|u| u.is_schedulable()).cloned().collect())
    }

    async fn upsert(&self, user: User) -> Result<(), UserStoreError> {
        self.users.lock().unwrap().insert(user.id, user);
        Ok(())
    }
}
