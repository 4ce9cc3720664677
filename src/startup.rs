use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::configuration::Settings;
use crate::email_client::EmailClient;
use crate::error::AppError;
use crate::scheduler::{CleanupSchedule, SchedulerHandle, TokenCleanupScheduler};
use crate::service::AuthService;
use crate::tokens::{PgPasswordResetTokenStore, PgRefreshTokenStore};
use crate::users::PgUserDirectory;

/// The running subsystem: connection pool, orchestrator and cleanup timers
pub struct Application {
    pool: PgPool,
    auth: AuthService,
    scheduler: SchedulerHandle,
}

impl Application {
    /// Connect to Postgres, apply migrations and wire every component
    pub async fn build(configuration: &Settings) -> Result<Self, AppError> {
        tracing::info!("Attempting to connect to database");
        let pool = PgPoolOptions::new()
            .max_connections(configuration.database.max_connections)
            .connect(&configuration.database.connection_string())
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, "Failed to create connection pool");
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
        tracing::info!("Database ready");

        Self::with_pool(pool, configuration)
    }

    /// Wire the Postgres-backed stores over an existing pool and start the
    /// cleanup timers. Must be called inside a Tokio runtime.
    pub fn with_pool(pool: PgPool, configuration: &Settings) -> Result<Self, AppError> {
        let users = Arc::new(PgUserDirectory::new(pool.clone()));
        let refresh_tokens = Arc::new(PgRefreshTokenStore::new(
            pool.clone(),
            configuration.jwt.refresh_token_ttl(),
        ));
        let reset_tokens = Arc::new(PgPasswordResetTokenStore::new(
            pool.clone(),
            configuration.password_reset.token_ttl(),
        ));
        let email = Arc::new(EmailClient::from_settings(&configuration.email_client)?);

        let auth = AuthService::new(
            users,
            refresh_tokens.clone(),
            reset_tokens.clone(),
            email,
            configuration,
        );

        let schedule =
            CleanupSchedule::from_settings(&configuration.cleanup, &configuration.password_reset)?;
        let scheduler = TokenCleanupScheduler::new(refresh_tokens, reset_tokens, schedule).start();

        Ok(Self {
            pool,
            auth,
            scheduler,
        })
    }

    /// Handle callers clone into their request handlers
    pub fn auth_service(&self) -> &AuthService {
        &self.auth
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Serve until Ctrl-C, then shut down
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }

        tracing::info!("Shutting down");
        self.shutdown().await;
        Ok(())
    }

    /// Stop the cleanup timers and close the pool
    pub async fn shutdown(self) {
        self.scheduler.stop().await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::get_configuration;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_application_holds_a_working_auth_service() {
        let configuration = get_configuration().expect("Failed to read configuration.");
        // No connection is opened until a query runs
        let pool = PgPoolOptions::new()
            .connect_lazy(&configuration.database.connection_string())
            .expect("Failed to build lazy pool");

        let app = Application::with_pool(pool, &configuration).unwrap();

        let handler_copy = app.auth_service().clone();
        let user_id = Uuid::new_v4();
        let token = handler_copy
            .codec()
            .mint("alice", Some(user_id), Duration::minutes(5))
            .unwrap();

        let claims = app.auth_service().authenticate(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);

        app.shutdown().await;
    }
}
