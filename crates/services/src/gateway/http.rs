use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use lab_core::model::{
    CompletionReport, LabId, LabSummary, ProgressSnapshot, StudentDashboard, TaskNumber, Verdict,
};

use super::wire::{
    self, CheckAnswerRequest, CheckAnswerResponse, CompleteRequest, CompleteResponse,
    DashboardResponse, LabListResponse, LabResponse, LoginRequest, LoginResponse,
    ProgressResponse, UpdateTimeRequest,
};
use super::{GatewayCall, LabContent, LabGateway, StudentAccount};
use crate::config::ClientConfig;
use crate::error::GatewayError;

/// `LabGateway` backed by the backend's REST API.
///
/// Keeps the backend session cookie between calls, so `login` must succeed
/// before any student endpoint is used.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base: Url,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Returns `GatewayError::Url` for an unparsable base URL, or `Http` if the
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base })
    }

    /// # Errors
    ///
    /// See [`HttpGateway::new`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, GatewayError> {
        Self::new(&config.base_url, config.request_timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.base.join(path)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        call: GatewayCall,
        path: &str,
    ) -> Result<T, GatewayError> {
        let url = self.endpoint(path)?;
        debug!(call = call.as_str(), %url, "GET");
        let response = self.client.get(url).send().await?;
        read(response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        call: GatewayCall,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = self.endpoint(path)?;
        debug!(call = call.as_str(), %url, "POST");
        let response = self.client.post(url).json(body).send().await?;
        read(response).await
    }
}

async fn read<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<Value>().await {
            Ok(body) => wire::error_message(&body),
            Err(_) => String::new(),
        };
        return Err(GatewayError::HttpStatus { status, message });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|err| GatewayError::Malformed(err.to_string()))?;
    wire::decode(body)
}

fn lab_path(lab: LabId, action: &str) -> String {
    format!("api/student/lab/{}/{action}", lab.value())
}

fn empty_body() -> serde_json::Map<String, Value> {
    serde_json::Map::new()
}

#[async_trait]
impl LabGateway for HttpGateway {
    async fn login(&self, username: &str, password: &str) -> Result<StudentAccount, GatewayError> {
        let response: LoginResponse = self
            .post(
                GatewayCall::Login,
                "api/login",
                &LoginRequest { username, password },
            )
            .await?;
        Ok(response.into())
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let _: Value = self
            .post(GatewayCall::Logout, "api/logout", &empty_body())
            .await?;
        Ok(())
    }

    async fn list_labs(&self) -> Result<Vec<LabSummary>, GatewayError> {
        let response: LabListResponse = self.get(GatewayCall::ListLabs, "api/labs").await?;
        response.into_summaries()
    }

    async fn fetch_lab(&self, lab: LabId) -> Result<LabContent, GatewayError> {
        let path = format!("api/labs/{}", lab.value());
        let response: LabResponse = self.get(GatewayCall::FetchLab, &path).await?;
        LabContent::try_from(response)
    }

    async fn fetch_progress(&self, lab: LabId) -> Result<Option<ProgressSnapshot>, GatewayError> {
        let result: Result<ProgressResponse, GatewayError> = self
            .get(GatewayCall::FetchProgress, &lab_path(lab, "progress"))
            .await;
        match result {
            Ok(response) => ProgressSnapshot::try_from(response).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn start_lab(&self, lab: LabId) -> Result<(), GatewayError> {
        let _: Value = self
            .post(GatewayCall::StartLab, &lab_path(lab, "start"), &empty_body())
            .await?;
        Ok(())
    }

    async fn check_answer(
        &self,
        lab: LabId,
        task: TaskNumber,
        answer: &str,
    ) -> Result<Verdict, GatewayError> {
        let response: CheckAnswerResponse = self
            .post(
                GatewayCall::CheckAnswer,
                &lab_path(lab, "check-answer"),
                &CheckAnswerRequest {
                    task_number: task.value(),
                    answer,
                },
            )
            .await?;
        Ok(response.into())
    }

    async fn update_time(&self, lab: LabId, elapsed_seconds: u64) -> Result<(), GatewayError> {
        let _: Value = self
            .post(
                GatewayCall::UpdateTime,
                &lab_path(lab, "update-time"),
                &UpdateTimeRequest {
                    elapsed_time: elapsed_seconds,
                },
            )
            .await?;
        Ok(())
    }

    async fn complete_lab(
        &self,
        lab: LabId,
        total_time_seconds: u64,
    ) -> Result<CompletionReport, GatewayError> {
        let response: CompleteResponse = self
            .post(
                GatewayCall::CompleteLab,
                &lab_path(lab, "complete"),
                &CompleteRequest {
                    total_time: total_time_seconds,
                },
            )
            .await?;
        response.into_report(total_time_seconds)
    }

    async fn dashboard(&self) -> Result<StudentDashboard, GatewayError> {
        let response: DashboardResponse = self
            .get(GatewayCall::Dashboard, "api/student/dashboard")
            .await?;
        StudentDashboard::try_from(response)
    }
}
