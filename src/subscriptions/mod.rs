use async_trait::async_trait;
use once_cell::sync::OnceCell;
use sql_query_builder as sql;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

use crate::model::{DigestKind, Frequency, Subscription, SubscriptionId, User, UserId};
use crate::users::{UserStore, UserStoreError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubscriptionError {
    #[error("persistence failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row failed to decode: {0}")]
    Decode(String),

    #[error("no subscription matches the given id for this user")]
    NotFound,

    #[error(transparent)]
    UserLookup(#[from] UserStoreError),
}

/// CRUD over [`Subscription`] plus the two read projections the scheduler's digest tick
/// needs. Update and delete are soft: they flip `active` rather than removing the row.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn create(&self, subscription: Subscription) -> Result<(), SubscriptionError>;

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Subscription>, SubscriptionError>;

    /// The scheduler's hot path: every active subscription joined eagerly with its owning
    /// user, to avoid an N+1 user lookup per tick.
    async fn list_active_with_users(&self) -> Result<Vec<(Subscription, User)>, SubscriptionError>;

    async fn list_by_kind(&self, kind: DigestKind) -> Result<Vec<(Subscription, User)>, SubscriptionError>;

    async fn set_active(
        &self, id: SubscriptionId, user: UserId, active: bool,
    ) -> Result<(), SubscriptionError>;
}

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    user_id: String,
    kind: String,
    frequency: String,
    time_of_day: String,
    active: bool,
}

impl SubscriptionRow {
    fn try_into_model(self) -> Result<Subscription, SubscriptionError> {
        let id = uuid::Uuid::parse_str(&self.id)
            .map(SubscriptionId::new)
            .map_err(|err| SubscriptionError::Decode(format!("subscriptions.id: {err}")))?;
        let user_id = uuid::Uuid::parse_str(&self.user_id)
            .map(UserId::new)
            .map_err(|err| SubscriptionError::Decode(format!("subscriptions.user_id: {err}")))?;
        let kind = DigestKind::from_str(&self.kind)
            .map_err(|err| SubscriptionError::Decode(format!("subscriptions.kind: {err}")))?;
        let frequency = Frequency::from_str(&self.frequency)
            .map_err(|err| SubscriptionError::Decode(format!("subscriptions.frequency: {err}")))?;

        Ok(Subscription {
            id,
            user_id,
            kind,
            frequency,
            time_of_day: self.time_of_day,
            active: self.active,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn create(&self, subscription: Subscription) -> Result<(), SubscriptionError> {
        static INSERT_SQL: OnceCell<String> = OnceCell::new();
        let query = INSERT_SQL.get_or_init(|| {
            sql::Insert::new()
                .insert_into("subscriptions (id, user_id, kind, frequency, time_of_day, active)")
                .values("($1, $2, $3, $4, $5, $6)")
                .to_string()
        });

        sqlx::query(query)
            .bind(subscription.id.to_string())
            .bind(subscription.user_id.to_string())
            .bind(subscription.kind.to_string())
            .bind(subscription.frequency.to_string())
            .bind(subscription.time_of_day)
            .bind(subscription.active)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Subscription>, SubscriptionError> {
        static LIST_SQL: OnceCell<String> = OnceCell::new();
        let query = LIST_SQL.get_or_init(|| {
            sql::Select::new()
                .select("id, user_id, kind, frequency, time_of_day, active")
                .from("subscriptions")
                .where_clause("user_id = $1 AND active = true")
                .to_string()
        });

        let rows: Vec<SubscriptionRow> =
            sqlx::query_as(query).bind(user.to_string()).fetch_all(&self.pool).await?;
        rows.into_iter().map(SubscriptionRow::try_into_model).collect()
    }

    async fn list_active_with_users(&self) -> Result<Vec<(Subscription, User)>, SubscriptionError> {
        static JOIN_SQL: OnceCell<String> = OnceCell::new();
        let query = JOIN_SQL.get_or_init(|| {
            sql::Select::new()
                .select(
                    "s.id, s.user_id, s.kind, s.frequency, s.time_of_day, s.active, \
                     u.first_name, u.last_name, u.language, u.latitude, u.longitude, \
                     u.location_label, u.timezone, u.units, u.role",
                )
                .from("subscriptions s")
                .inner_join("users u ON u.id = s.user_id")
                .where_clause("s.active = true AND u.active = true AND u.location_label <> ''")
                .to_string()
        });

        let rows: Vec<SubscriptionWithUserRow> = sqlx::query_as(query).fetch_all(&self.pool).await?;
        rows.into_iter().map(SubscriptionWithUserRow::try_into_model).collect()
    }

    async fn list_by_kind(&self, kind: DigestKind) -> Result<Vec<(Subscription, User)>, SubscriptionError> {
        Ok(self
            .list_active_with_users()
            .await?
            .into_iter()
            .filter(|(subscription, _)| subscription.kind == kind)
            .collect())
    }

    async fn set_active(
        &self, id: SubscriptionId, user: UserId, active: bool,
    ) -> Result<(), SubscriptionError> {
        static UPDATE_SQL: OnceCell<String> = OnceCell::new();
        let query = UPDATE_SQL.get_or_init(|| {
            sql::Update::new()
                .update("subscriptions")
                .set("active = $3")
                .where_clause("id = $1 AND user_id = $2")
                .to_string()
        });

        let result = sqlx::query(query)
            .bind(id.to_string())
            .bind(user.to_string())
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SubscriptionError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionWithUserRow {
    id: String,
    user_id: String,
    kind: String,
    frequency: String,
    time_of_day: String,
    active: bool,
    first_name: String,
    last_name: String,
    language: String,
    latitude: f64,
    longitude: f64,
    location_label: String,
    timezone: String,
    units: String,
    role: String,
}

impl SubscriptionWithUserRow {
    fn try_into_model(self) -> Result<(Subscription, User), SubscriptionError> {
        use crate::model::{Coordinates, LanguageTag, Role, UnitSystem};

        let subscription = SubscriptionRow {
            id: self.id,
            user_id: self.user_id.clone(),
            kind: self.kind,
            frequency: self.frequency,
            time_of_day: self.time_of_day,
            active: self.active,
        }
        .try_into_model()?;

        let user_id = uuid::Uuid::parse_str(&self.user_id)
            .map(UserId::new)
            .map_err(|err| SubscriptionError::Decode(format!("users.id: {err}")))?;
        let language = LanguageTag::parse(self.language)
            .map_err(|err| SubscriptionError::Decode(format!("users.language: {err}")))?;
        let coordinates = Coordinates::new(self.latitude, self.longitude)
            .map_err(|err| SubscriptionError::Decode(format!("users.coordinates: {err}")))?;
        let units = UnitSystem::from_str(&self.units)
            .map_err(|err| SubscriptionError::Decode(format!("users.units: {err}")))?;
        let role = Role::from_str(&self.role)
            .map_err(|err| SubscriptionError::Decode(format!("users.role: {err}")))?;

        let user = User {
            id: user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            language,
            coordinates,
            location_label: self.location_label,
            timezone: self.timezone,
            units,
            active: true,
            role,
        };

        Ok((subscription, user))
    }
}

/// Test-double / demo-binary implementation, backed by an in-memory [`UserStore`] for the
/// join `list_active_with_users` performs.
pub struct InMemorySubscriptionStore {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    users: std::sync::Arc<dyn UserStore>,
}

impl InMemorySubscriptionStore {
    pub fn new(users: std::sync::Arc<dyn UserStore>) -> Self {
        Self { subscriptions: Mutex::new(HashMap::new()), users }
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn create(&self, subscription: Subscription) -> Result<(), SubscriptionError> {
        self.subscriptions.lock().unwrap().insert(subscription.id, subscription);
        Ok(())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Subscription>, SubscriptionError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user && s.active)
            .cloned()
            .collect())
    }

    async fn list_active_with_users(&self) -> Result<Vec<(Subscription, User)>, SubscriptionError> {
        let subscriptions: Vec<Subscription> =
            self.subscriptions.lock().unwrap().values().filter(|s| s.active).cloned().collect();

        let mut joined = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            if let Some(user) = self.users.find(subscription.user_id).await? {
                if user.is_schedulable() {
                    joined.push((subscription, user));
                }
            }
        }
        Ok(joined)
    }

    async fn list_by_kind(&self, kind: DigestKind) -> Result<Vec<(Subscription, User)>, SubscriptionError> {
        Ok(self
            .list_active_with_users()
            .await?
            .into_iter()
            .filter(|(subscription, _)| subscription.kind == kind)
            .collect())
    }

    async fn set_active(
        &self, id: SubscriptionId, user: UserId, active: bool,
    ) -> Result<(), SubscriptionError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.get_mut(&id).filter(|s| s.user_id == user) {
            Some(subscription) => {
                subscription.active = active;
                Ok(())
            },
            None => Err(SubscriptionError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, LanguageTag, Role, UnitSystem};
    use crate::users::InMemoryUserStore;
    use std::sync::Arc;

    fn sample_user() -> User {
        User {
            id: UserId::generate(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            language: LanguageTag::parse("en-US").unwrap(),
            coordinates: Coordinates::new(50.4501, 30.5234).unwrap(),
            location_label: "Kyiv".to_string(),
            timezone: "Europe/Kyiv".to_string(),
            units: UnitSystem::Metric,
            active: true,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn list_active_with_users_joins_eagerly() {
        let users = Arc::new(InMemoryUserStore::new());
        let user = sample_user();
        users.upsert(user.clone()).await.unwrap();

        let store = InMemorySubscriptionStore::new(users);
        store
            .create(Subscription {
                id: SubscriptionId::generate(),
                user_id: user.id,
                kind: DigestKind::Daily,
                frequency: Frequency::Daily,
                time_of_day: "08:00".to_string(),
                active: true,
            })
            .await
            .unwrap();

        let joined = store.list_active_with_users().await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].1.id, user.id);
    }

    #[tokio::test]
    async fn set_active_against_unknown_id_is_not_found() {
        let users = Arc::new(InMemoryUserStore::new());
        let store = InMemorySubscriptionStore::new(users);
        let result = store.set_active(SubscriptionId::generate(), UserId::generate(), false).await;
        assert!(matches!(result, Err(SubscriptionError::NotFound)));
    }
}
