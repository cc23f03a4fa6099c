use std::sync::Arc;

use storage::repository::Storage;
use tracing::info;

use crate::Clock;
use crate::config::ClientConfig;
use crate::error::AppServicesError;
use crate::gateway::{
    DEMO_PASSWORD, DEMO_USERNAME, HttpGateway, InMemoryGateway, LabGateway, StudentAccount,
};
use crate::labs::LabLoopService;

/// Assembles app-facing services from a `ClientConfig`.
#[derive(Clone)]
pub struct AppServices {
    config: ClientConfig,
    account: Option<StudentAccount>,
    lab_loop: Arc<LabLoopService>,
}

impl AppServices {
    /// Build services talking to the configured backend, with drafts kept in
    /// `SQLite`. Signs in when credentials are configured.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the gateway or storage cannot be set up,
    /// or the configured credentials are refused.
    pub async fn new_http(config: ClientConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let http = HttpGateway::from_config(&config)?;
        let base_url = http.base_url().clone();
        let gateway: Arc<dyn LabGateway> = Arc::new(http);
        let storage = Storage::sqlite(&config.drafts_db_url).await?;

        let account = match config.credentials() {
            Some((username, password)) => Some(gateway.login(username, password).await?),
            None => None,
        };
        info!(%base_url, signed_in = account.is_some(), "services ready");
        Ok(Self::assemble(config, clock, gateway, storage, account))
    }

    /// Build services against the built-in offline course, signed in as the
    /// configured user or the demo student.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Gateway` if the credentials are refused.
    pub async fn new_offline(config: ClientConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let gateway: Arc<dyn LabGateway> = Arc::new(InMemoryGateway::seeded(clock));
        let (username, password) = config
            .credentials()
            .unwrap_or((DEMO_USERNAME, DEMO_PASSWORD));
        let account = gateway.login(username, password).await?;
        info!(username = %account.username, "offline services ready");
        Ok(Self::assemble(
            config,
            clock,
            gateway,
            Storage::in_memory(),
            Some(account),
        ))
    }

    fn assemble(
        config: ClientConfig,
        clock: Clock,
        gateway: Arc<dyn LabGateway>,
        storage: Storage,
        account: Option<StudentAccount>,
    ) -> Self {
        let lab_loop = Arc::new(
            LabLoopService::new(clock, gateway, Arc::clone(&storage.drafts))
                .with_time_sync_interval(config.time_sync_interval()),
        );
        Self {
            config,
            account,
            lab_loop,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The account signed in during setup, if any.
    #[must_use]
    pub fn account(&self) -> Option<&StudentAccount> {
        self.account.as_ref()
    }

    #[must_use]
    pub fn lab_loop(&self) -> Arc<LabLoopService> {
        Arc::clone(&self.lab_loop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::time::fixed_clock;

    #[tokio::test]
    async fn offline_services_sign_in_as_demo_student() {
        let services = AppServices::new_offline(ClientConfig::default(), fixed_clock())
            .await
            .unwrap();
        assert_eq!(services.account().map(|a| a.username.as_str()), Some("student"));
        assert_eq!(services.lab_loop().list_labs().await.unwrap().len(), 3);
        assert_eq!(
            services.lab_loop().time_sync_interval(),
            services.config().time_sync_interval()
        );
    }

    #[tokio::test]
    async fn offline_services_reject_unknown_credentials() {
        let config = ClientConfig {
            username: Some("nobody".into()),
            password: Some("secret".into()),
            ..ClientConfig::default()
        };
        let result = AppServices::new_offline(config, fixed_clock()).await;
        assert!(matches!(result, Err(AppServicesError::Gateway(_))));
    }
}
