use async_trait::async_trait;
use once_cell::sync::OnceCell;
use sql_query_builder as sql;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::model::{AlertCondition, AlertRule, AlertRuleId, TriggeredAlert, UserId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row failed to decode: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert(&self, rule: AlertRule) -> Result<(), StoreError>;

    async fn list_for_user(&self, user: UserId, active_only: bool) -> Result<Vec<AlertRule>, StoreError>;

    async fn find(&self, rule_id: AlertRuleId, user: UserId) -> Result<Option<AlertRule>, StoreError>;

    /// Applies `condition`/`active` edits and returns the post-update row, or `None` when no
    /// row matches `(rule_id, user)`.
    async fn apply_patch(
        &self, rule_id: AlertRuleId, user: UserId, condition: Option<AlertCondition>,
        active: Option<bool>,
    ) -> Result<Option<AlertRule>, StoreError>;

    async fn soft_delete(&self, rule_id: AlertRuleId, user: UserId) -> Result<bool, StoreError>;

    /// Bumps `last_triggered_at` to `now`; only called after a successful TriggeredAlert
    /// insert so the two never drift apart.
    async fn mark_triggered(
        &self, rule_id: AlertRuleId, now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TriggeredAlertStore: Send + Sync {
    async fn insert(&self, alert: TriggeredAlert) -> Result<(), StoreError>;
}

/// `sqlx`-backed production implementation. SQL is assembled once per statement shape with
/// `sql_query_builder` and cached in a `OnceCell`, then executed with `sqlx::query_as`/
/// `sqlx::query` at runtime rather than `sqlx::query!`, which would require a live database
/// or an offline query cache at build time.
#[derive(Debug, Clone)]
pub struct PostgresRuleStore {
    pool: PgPool,
}

impl PostgresRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    async fn insert(&self, rule: AlertRule) -> Result<(), StoreError> {
        static INSERT_SQL: OnceCell<String> = OnceCell::new();
        let query = INSERT_SQL.get_or_init(|| {
            sql::Insert::new()
                .insert_into("alert_rules (id, user_id, kind, operator, threshold, active, last_triggered_at)")
                .values("($1, $2, $3, $4, $5, $6, $7)")
                .to_string()
        });

        sqlx::query(query)
            .bind(rule.id.to_string())
            .bind(rule.user_id.to_string())
            .bind(rule.kind.to_string())
            .bind(rule.condition.operator.to_string())
            .bind(rule.condition.threshold)
            .bind(rule.active)
            .bind(rule.last_triggered_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_for_user(
        &self, user: UserId, active_only: bool,
    ) -> Result<Vec<AlertRule>, StoreError> {
        static LIST_ALL_SQL: OnceCell<String> = OnceCell::new();
        static LIST_ACTIVE_SQL: OnceCell<String> = OnceCell::new();

        let base = || {
            sql::Select::new()
                .select("id, user_id, kind, operator, threshold, active, last_triggered_at")
                .from("alert_rules")
        };
        let query = if active_only {
            LIST_ACTIVE_SQL.get_or_init(|| base().where_clause("user_id = $1 AND active = true").to_string())
        } else {
            LIST_ALL_SQL.get_or_init(|| base().where_clause("user_id = $1").to_string())
        };

        let rows: Vec<AlertRuleRow> =
            sqlx::query_as(query).bind(user.to_string()).fetch_all(&self.pool).await?;

        rows.into_iter().map(AlertRuleRow::try_into_model).collect()
    }

    async fn find(
        &self, rule_id: AlertRuleId, user: UserId,
    ) -> Result<Option<AlertRule>, StoreError> {
        static FIND_SQL: OnceCell<String> = OnceCell::new();
        let query = FIND_SQL.get_or_init(|| {
            sql::Select::new()
                .select("id, user_id, kind, operator, threshold, active, last_triggered_at")
                .from("alert_rules")
                .where_clause("id = $1 AND user_id = $2")
                .to_string()
        });

        let row: Option<AlertRuleRow> = sqlx::query_as(query)
            .bind(rule_id.to_string())
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AlertRuleRow::try_into_model).transpose()
    }

    async fn apply_patch(
        &self, rule_id: AlertRuleId, user: UserId, condition: Option<AlertCondition>,
        active: Option<bool>,
    ) -> Result<Option<AlertRule>, StoreError> {
        static UPDATE_SQL: OnceCell<String> = OnceCell::new();
        let query = UPDATE_SQL.get_or_init(|| {
            sql::Update::new()
                .update("alert_rules")
                .set("operator = COALESCE($3, operator), threshold = COALESCE($4, threshold), active = COALESCE($5, active)")
                .where_clause("id = $1 AND user_id = $2")
                .to_string()
        });

        sqlx::query(query)
            .bind(rule_id.to_string())
            .bind(user.to_string())
            .bind(condition.map(|c| c.operator.to_string()))
            .bind(condition.map(|c| c.threshold))
            .bind(active)
            .execute(&self.pool)
            .await?;

        self.find(rule_id, user).await
    }

    async fn soft_delete(&self, rule_id: AlertRuleId, user: UserId) -> Result<bool, StoreError> {
        static DELETE_SQL: OnceCell<String> = OnceCell::new();
        let query = DELETE_SQL.get_or_init(|| {
            sql::Update::new()
                .update("alert_rules")
                .set("active = false")
                .where_clause("id = $1 AND user_id = $2")
                .to_string()
        });

        let result =
            sqlx::query(query).bind(rule_id.to_string()).bind(user.to_string()).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_triggered(
        &self, rule_id: AlertRuleId, now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        static MARK_TRIGGERED_SQL: OnceCell<String> = OnceCell::new();
        let query = MARK_TRIGGERED_SQL.get_or_init(|| {
            sql::Update::new()
                .update("alert_rules")
                .set("last_triggered_at = $2")
                .where_clause("id = $1")
                .to_string()
        });

        sqlx::query(query).bind(rule_id.to_string()).bind(now).execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRuleRow {
    id: String,
    user_id: String,
    kind: String,
    operator: String,
    threshold: f64,
    active: bool,
    last_triggered_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AlertRuleRow {
    fn try_into_model(self) -> Result<AlertRule, StoreError> {
        use crate::model::{AlertKind, AlertOperator};
        use std::str::FromStr;

        let id = uuid::Uuid::parse_str(&self.id)
            .map(AlertRuleId::new)
            .map_err(|err| StoreError::Decode(format!("alert_rules.id: {err}")))?;
        let user_id = uuid::Uuid::parse_str(&self.user_id)
            .map(UserId::new)
            .map_err(|err| StoreError::Decode(format!("alert_rules.user_id: {err}")))?;
        let kind = AlertKind::from_str(&self.kind)
            .map_err(|err| StoreError::Decode(format!("alert_rules.kind: {err}")))?;
        let operator = AlertOperator::from_str(&self.operator)
            .map_err(|err| StoreError::Decode(format!("alert_rules.operator: {err}")))?;

        Ok(AlertRule {
            id,
            user_id,
            kind,
            condition: AlertCondition { operator, threshold: self.threshold },
            active: self.active,
            last_triggered_at: self.last_triggered_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PostgresTriggeredAlertStore {
    pool: PgPool,
}

impl PostgresTriggeredAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggeredAlertStore for PostgresTriggeredAlertStore {
    async fn insert(&self, alert: TriggeredAlert) -> Result<(), StoreError> {
        static INSERT_SQL: OnceCell<String> = OnceCell::new();
        let query = INSERT_SQL.get_or_init(|| {
            sql::Insert::new()
                .insert_into(
                    "triggered_alerts (id, user_id, rule_id, kind, severity, title, description, observed_value, threshold, resolved, created_at)",
                )
                .values("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)")
                .to_string()
        });

        sqlx::query(query)
            .bind(alert.id.to_string())
            .bind(alert.user_id.to_string())
            .bind(alert.rule_id.to_string())
            .bind(alert.kind.to_string())
            .bind(alert.severity.to_string())
            .bind(alert.title)
            .bind(alert.description)
            .bind(alert.observed_value)
            .bind(alert.threshold)
            .bind(alert.resolved)
            .bind(alert.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Test-double / demo-binary implementation. No persistence beyond process memory.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: Mutex<HashMap<AlertRuleId, AlertRule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn insert(&self, rule: AlertRule) -> Result<(), StoreError> {
        self.rules.lock().unwrap().insert(rule.id, rule);
        Ok(())
    }

    async fn list_for_user(
        &self, user: UserId, active_only: bool,
    ) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|rule| rule.user_id == user && (!active_only || rule.active))
            .cloned()
            .collect())
    }

    async fn find(
        &self, rule_id: AlertRuleId, user: UserId,
    ) -> Result<Option<AlertRule>, StoreError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(&rule_id)
            .filter(|rule| rule.user_id == user)
            .cloned())
    }

    async fn apply_patch(
        &self, rule_id: AlertRuleId, user: UserId, condition: Option<AlertCondition>,
        active: Option<bool>,
    ) -> Result<Option<AlertRule>, StoreError> {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.get_mut(&rule_id).filter(|rule| rule.user_id == user) else {
            return Ok(None);
        };

        if let Some(condition) = condition {
            rule.condition = condition;
        }
        if let Some(active) = active {
            rule.active = active;
        }
        Ok(Some(rule.clone()))
    }

    async fn soft_delete(&self, rule_id: AlertRuleId, user: UserId) -> Result<bool, StoreError> {
        let mut rules = self.rules.lock().unwrap();
        match rules.get_mut(&rule_id).filter(|rule| rule.user_id == user) {
            Some(rule) => {
                rule.active = false;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn mark_triggered(
        &self, rule_id: AlertRuleId, now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        if let Some(rule) = self.rules.lock().unwrap().get_mut(&rule_id) {
            rule.last_triggered_at = Some(now);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTriggeredAlertStore {
    alerts: Mutex<Vec<TriggeredAlert>>,
}

impl InMemoryTriggeredAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggeredAlertStore for InMemoryTriggeredAlertStore {
    async fn insert(&self, alert: TriggeredAlert) -> Result<(), StoreError> {
        self.alerts.lock().unwrap().push(alert);
        Ok(())
    }
}
