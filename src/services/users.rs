use crate::{
    auth::{hash_password, verify_password},
    db::DbPool,
    entities::user::{self, UserRole},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[serde(default)]
    pub role: UserRole,
}

/// Service for operator accounts
#[derive(Clone)]
pub struct UserService {
    db_pool: Arc<DbPool>,
}

impl UserService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(username = %request.username, role = %request.role))]
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<user::Model, ServiceError> {
        request.validate()?;
        let username = request.username.trim().to_string();
        let password_hash = hash_password(&request.password)?;

        let created = user::ActiveModel {
            username: Set(username.clone()),
            email: Set(request.email),
            password_hash: Set(password_hash),
            role: Set(request.role),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            ServiceError::on_unique_violation(e, || {
                ServiceError::Conflict(format!("username '{}' is taken", username))
            })
        })?;

        info!(user_id = created.id, "operator created");
        Ok(created)
    }

    /// Checks credentials. Unknown users, inactive users and wrong passwords
    /// all produce the same error.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<user::Model, ServiceError> {
        let rejected = || ServiceError::Unauthorized("invalid username or password".to_string());

        let found = user::Entity::find()
            .filter(user::Column::Username.eq(username.trim()))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(rejected)?;

        if !found.is_active || !verify_password(password, &found.password_hash) {
            warn!(user_id = found.id, "rejected login");
            return Err(rejected());
        }
        Ok(found)
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<user::Model>, ServiceError> {
        Ok(user::Entity::find()
            .order_by_asc(user::Column::Username)
            .all(&*self.db_pool)
            .await?)
    }
}
