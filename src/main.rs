use policy_auth::configuration::get_configuration;
use policy_auth::error::AppError;
use policy_auth::startup::Application;
use policy_auth::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_telemetry("info");

    tracing::info!("Starting policy-auth");

    let configuration = get_configuration().inspect_err(|e| {
        tracing::error!(error = %e, "Failed to read configuration");
    })?;
    tracing::info!("Configuration loaded successfully");

    let application = Application::build(&configuration).await?;
    application.run_until_stopped().await
}
