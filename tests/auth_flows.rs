use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use policy_auth::auth::PasswordPolicy;
use policy_auth::configuration::{
    CleanupSettings, DatabaseSettings, EmailClientSettings, JwtSettings, PasswordResetSettings,
    PasswordSettings, Settings,
};
use policy_auth::email_client::EmailDispatcher;
use policy_auth::error::{AppError, AuthError, EmailError};
use policy_auth::service::AuthService;
use policy_auth::tokens::{
    InMemoryPasswordResetTokenStore, InMemoryRefreshTokenStore, PasswordResetTokenStore,
    RefreshTokenStore, ResetTokenStatus,
};
use policy_auth::users::{InMemoryUserDirectory, Principal, Role, UserDirectory};

const ACCESS_TTL_MS: i64 = 900_000;

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

#[async_trait]
impl EmailDispatcher for RecordingEmail {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        if self.fail {
            return Err(EmailError::ServiceUnavailable("smtp down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

impl RecordingEmail {
    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

struct TestApp {
    service: AuthService,
    users: Arc<InMemoryUserDirectory>,
    refresh_tokens: Arc<InMemoryRefreshTokenStore>,
    reset_tokens: Arc<InMemoryPasswordResetTokenStore>,
    email: Arc<RecordingEmail>,
    alice: Principal,
}

fn test_settings() -> Settings {
    Settings {
        database: DatabaseSettings {
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "localhost".to_string(),
            database_name: "policy_auth".to_string(),
            max_connections: 1,
        },
        jwt: JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: "policy-auth-test".to_string(),
            access_token_ttl_ms: ACCESS_TTL_MS,
            refresh_token_ttl_ms: 604_800_000,
        },
        password: PasswordSettings {
            min_length: 8,
            max_length: 128,
            bcrypt_cost: 4,
        },
        password_reset: PasswordResetSettings {
            token_ttl_ms: 300_000,
            retention_days: 30,
            reset_url: "https://portal.example.com/reset-password".to_string(),
        },
        cleanup: CleanupSettings::default(),
        email_client: EmailClientSettings {
            base_url: "http://localhost:8025".to_string(),
            sender_email: "noreply@example.com".to_string(),
            timeout_ms: 1000,
        },
    }
}

async fn spawn_app_with_email(email: RecordingEmail) -> TestApp {
    let settings = test_settings();
    let users = Arc::new(InMemoryUserDirectory::new());
    let refresh_tokens = Arc::new(InMemoryRefreshTokenStore::new(settings.jwt.refresh_token_ttl()));
    let reset_tokens = Arc::new(InMemoryPasswordResetTokenStore::new(
        settings.password_reset.token_ttl(),
    ));
    let email = Arc::new(email);

    let alice = Principal {
        id: Uuid::new_v4(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: PasswordPolicy::from_settings(&settings.password)
            .hash("secret123")
            .expect("Failed to hash password"),
        role: Role::Customer,
        active: true,
    };
    users.save(&alice).await.expect("Failed to save user");

    let service = AuthService::new(
        users.clone(),
        refresh_tokens.clone(),
        reset_tokens.clone(),
        email.clone(),
        &settings,
    );

    TestApp {
        service,
        users,
        refresh_tokens,
        reset_tokens,
        email,
        alice,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_email(RecordingEmail::default()).await
}

fn auth_error<T: std::fmt::Debug>(result: Result<T, AppError>) -> AuthError {
    match result {
        Err(AppError::Auth(e)) => e,
        other => panic!("Expected auth error, got {:?}", other),
    }
}

fn token_from_email(body: &str) -> String {
    let start = body.find("token=").expect("No token in email") + "token=".len();
    body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

// --- Login ---

#[tokio::test]
async fn login_returns_tokens_for_valid_credentials() {
    let app = spawn_app().await;

    let response = app.service.login("alice", "secret123").await.unwrap();

    assert!(!response.access_token.is_empty());
    assert!(!response.refresh_token.is_empty());
    assert_eq!(response.expires_in_seconds, ACCESS_TTL_MS / 1000);
    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.username, "alice");
    assert_eq!(response.email, "alice@example.com");

    let claims = app.service.authenticate(&response.access_token).unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.user_id().unwrap(), app.alice.id);
}

#[tokio::test]
async fn login_by_email_works() {
    let app = spawn_app().await;

    assert!(app.service.login("alice@example.com", "secret123").await.is_ok());
}

#[tokio::test]
async fn second_login_rotates_refresh_token() {
    let app = spawn_app().await;

    let first = app.service.login("alice", "secret123").await.unwrap();
    let second = app.service.login("alice", "secret123").await.unwrap();

    assert_ne!(first.refresh_token, second.refresh_token);
    assert!(!app.refresh_tokens.validate(&first.refresh_token).await.unwrap());
    assert!(app.refresh_tokens.validate(&second.refresh_token).await.unwrap());
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let app = spawn_app().await;

    assert_eq!(
        auth_error(app.service.login("alice", "wrong-password").await),
        AuthError::InvalidCredentials
    );
    assert_eq!(
        auth_error(app.service.login("nobody", "secret123").await),
        AuthError::InvalidCredentials
    );
    assert_eq!(
        auth_error(app.service.login("ALICE", "secret123").await),
        AuthError::InvalidCredentials
    );
    assert!(app.refresh_tokens.is_empty().await);
}

#[tokio::test]
async fn login_rejects_disabled_account() {
    let app = spawn_app().await;
    let mut alice = app.alice.clone();
    alice.active = false;
    app.users.save(&alice).await.unwrap();

    assert_eq!(
        auth_error(app.service.login("alice", "secret123").await),
        AuthError::AccountDisabled
    );
}

// --- Refresh & logout ---

#[tokio::test]
async fn refresh_returns_new_pair_and_rejects_replay() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();

    let refreshed = app.service.refresh(&login.refresh_token).await.unwrap();

    assert_ne!(refreshed.refresh_token, login.refresh_token);
    assert_eq!(refreshed.expires_in_seconds, ACCESS_TTL_MS / 1000);
    let claims = app.service.authenticate(&refreshed.access_token).unwrap();
    assert_eq!(claims.user_id().unwrap(), app.alice.id);

    assert_eq!(
        auth_error(app.service.refresh(&login.refresh_token).await),
        AuthError::InvalidRefreshToken
    );
    assert!(app.service.refresh(&refreshed.refresh_token).await.is_ok());
}

#[tokio::test]
async fn concurrent_refresh_with_same_token_succeeds_once() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();

    let (a, b) = tokio::join!(
        app.service.refresh(&login.refresh_token),
        app.service.refresh(&login.refresh_token)
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
}

#[tokio::test]
async fn refresh_rejects_unknown_token() {
    let app = spawn_app().await;

    assert_eq!(
        auth_error(app.service.refresh("not-a-real-token").await),
        AuthError::InvalidRefreshToken
    );
}

#[tokio::test]
async fn refresh_rejects_disabled_account_and_revokes() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();
    let mut alice = app.alice.clone();
    alice.active = false;
    app.users.save(&alice).await.unwrap();

    assert_eq!(
        auth_error(app.service.refresh(&login.refresh_token).await),
        AuthError::AccountDisabled
    );
    assert!(!app.refresh_tokens.validate(&login.refresh_token).await.unwrap());
}

#[tokio::test]
async fn logout_revokes_refresh_token_and_is_idempotent() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();

    app.service.logout(&login.refresh_token).await.unwrap();
    app.service.logout(&login.refresh_token).await.unwrap();
    app.service.logout("never-issued").await.unwrap();

    assert_eq!(
        auth_error(app.service.refresh(&login.refresh_token).await),
        AuthError::InvalidRefreshToken
    );
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();
    let claims = app.service.authenticate(&login.access_token).unwrap();

    assert_eq!(app.service.logout_all(&claims).await.unwrap(), 1);
    assert!(!app.refresh_tokens.validate(&login.refresh_token).await.unwrap());
}

#[tokio::test]
async fn tampered_access_token_is_rejected() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();

    assert_eq!(
        auth_error(app.service.authenticate(&format!("{}x", login.access_token))),
        AuthError::TokenInvalid
    );
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let app = spawn_app().await;
    let token = app
        .service
        .codec()
        .mint("alice", Some(app.alice.id), Duration::milliseconds(-1))
        .unwrap();

    assert_eq!(auth_error(app.service.authenticate(&token)), AuthError::TokenInvalid);
}

// --- Change password ---

#[tokio::test]
async fn change_password_invalidates_existing_refresh_tokens() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();
    let claims = app.service.authenticate(&login.access_token).unwrap();

    let response = app
        .service
        .change_password(&claims, "secret123", "newpass8")
        .await
        .unwrap();

    assert!(response.success);
    assert!(!app.refresh_tokens.validate(&login.refresh_token).await.unwrap());
    assert_eq!(
        auth_error(app.service.refresh(&login.refresh_token).await),
        AuthError::InvalidRefreshToken
    );
    assert!(app.service.login("alice", "newpass8").await.is_ok());
    assert_eq!(
        auth_error(app.service.login("alice", "secret123").await),
        AuthError::InvalidCredentials
    );
}

#[tokio::test]
async fn change_password_rejects_wrong_current_password() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();
    let claims = app.service.authenticate(&login.access_token).unwrap();

    assert_eq!(
        auth_error(app.service.change_password(&claims, "not-my-password", "newpass8").await),
        AuthError::InvalidCredentials
    );
    assert!(app.refresh_tokens.validate(&login.refresh_token).await.unwrap());
}

#[tokio::test]
async fn change_password_rejects_weak_password() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();
    let claims = app.service.authenticate(&login.access_token).unwrap();

    assert_eq!(
        auth_error(app.service.change_password(&claims, "secret123", "short").await),
        AuthError::WeakPassword { min_length: 8 }
    );
    assert!(app.service.login("alice", "secret123").await.is_ok());
}

#[tokio::test]
async fn change_password_for_vanished_user() {
    let app = spawn_app().await;
    let claims = app
        .service
        .authenticate(
            &app.service
                .codec()
                .mint("ghost", Some(Uuid::new_v4()), Duration::minutes(5))
                .unwrap(),
        )
        .unwrap();

    assert_eq!(
        auth_error(app.service.change_password(&claims, "secret123", "newpass8").await),
        AuthError::UserNotFound
    );
}

// --- Forgot / reset password ---

#[tokio::test]
async fn forgot_password_for_unknown_email_issues_no_token() {
    let app = spawn_app().await;

    let response = app
        .service
        .forgot_password("nobody@example.com")
        .await
        .unwrap();

    assert!(response.success);
    assert!(app.reset_tokens.is_empty().await);
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn forgot_password_response_does_not_leak_existence() {
    let app = spawn_app().await;

    let unknown = app.service.forgot_password("nobody@example.com").await.unwrap();
    let known = app.service.forgot_password("alice@example.com").await.unwrap();

    assert_eq!(unknown, known);
}

#[tokio::test]
async fn forgot_password_rejects_malformed_email() {
    let app = spawn_app().await;

    let result = app.service.forgot_password("not-an-email").await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn reset_password_flow_is_single_use() {
    let app = spawn_app().await;
    let login = app.service.login("alice", "secret123").await.unwrap();

    app.service.forgot_password("alice@example.com").await.unwrap();

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "alice@example.com");
    assert!(sent[0].2.contains("https://portal.example.com/reset-password?token="));
    assert!(sent[0].2.contains("5 minutes"));
    let token = token_from_email(&sent[0].2);
    assert!(app.reset_tokens.validate(&token).await.unwrap());

    let response = app.service.reset_password(&token, "brandnew1").await.unwrap();
    assert!(response.success);

    assert_eq!(
        auth_error(app.service.reset_password(&token, "brandnew2").await),
        AuthError::InvalidOrExpiredResetToken
    );
    assert!(app.service.login("alice", "brandnew1").await.is_ok());
    assert!(!app.refresh_tokens.validate(&login.refresh_token).await.unwrap());
}

#[tokio::test]
async fn second_forgot_password_expires_first_token() {
    let app = spawn_app().await;

    app.service.forgot_password("alice@example.com").await.unwrap();
    app.service.forgot_password("alice@example.com").await.unwrap();

    let sent = app.email.sent();
    let first = token_from_email(&sent[0].2);
    let second = token_from_email(&sent[1].2);

    let records = app.reset_tokens.tokens_for(app.alice.id).await;
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == ResetTokenStatus::Active)
            .count(),
        1
    );
    assert_eq!(
        auth_error(app.service.reset_password(&first, "brandnew1").await),
        AuthError::InvalidOrExpiredResetToken
    );
    assert!(app.service.reset_password(&second, "brandnew1").await.is_ok());
}

#[tokio::test]
async fn weak_password_does_not_burn_reset_token() {
    let app = spawn_app().await;
    app.service.forgot_password("alice@example.com").await.unwrap();
    let token = token_from_email(&app.email.sent()[0].2);

    assert_eq!(
        auth_error(app.service.reset_password(&token, "short").await),
        AuthError::WeakPassword { min_length: 8 }
    );
    assert!(app.reset_tokens.validate(&token).await.unwrap());
}

#[tokio::test]
async fn reset_password_rejects_unknown_token() {
    let app = spawn_app().await;

    assert_eq!(
        auth_error(app.service.reset_password("bogus", "brandnew1").await),
        AuthError::InvalidOrExpiredResetToken
    );
}

#[tokio::test]
async fn email_failure_is_not_surfaced() {
    let app = spawn_app_with_email(RecordingEmail {
        fail: true,
        ..Default::default()
    })
    .await;

    let response = app.service.forgot_password("alice@example.com").await.unwrap();

    assert!(response.success);
    assert_eq!(app.reset_tokens.len().await, 1);
}
