//! HTTP/JSON implementation of the controller API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

use rig_core::{CommError, Communicator};
use rig_model::{
    DistroView, EndTaskResponse, ExpansionVars, HeartbeatResponse, LogMessage, NextTaskResponse,
    Patch, Project, ProjectRef, Task, TaskData, TaskEndDetail,
};

const HOST_ID: &str = "Host-Id";
const HOST_SECRET: &str = "Host-Secret";
const TASK_ID: &str = "Task-Id";
const TASK_SECRET: &str = "Task-Secret";

pub struct HttpCommunicator {
    client: Client,
    base: String,
    host_id: String,
    host_secret: String,
}

impl HttpCommunicator {
    pub fn new(
        base: impl Into<String>,
        host_id: impl Into<String>,
        host_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CommError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            host_id: host_id.into(),
            host_secret: host_secret.into(),
        })
    }

    fn task_url(&self, td: &TaskData, path: &str) -> String {
        if path.is_empty() {
            format!("{}/api/v1/task/{}", self.base, td.id)
        } else {
            format!("{}/api/v1/task/{}/{}", self.base, td.id, path)
        }
    }

    fn host(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(HOST_ID, &self.host_id)
            .header(HOST_SECRET, &self.host_secret)
    }

    fn task(&self, req: RequestBuilder, td: &TaskData) -> RequestBuilder {
        self.host(req)
            .header(TASK_ID, &td.id)
            .header(TASK_SECRET, &td.secret)
    }

    async fn fetch(&self, req: RequestBuilder) -> Result<String, CommError> {
        let response = req.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        trace!(target: "rig.agentd.http", %status, bytes = body.len(), "response");
        check_status(status, body)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, CommError> {
        let body = self.fetch(req).await?;
        decode(&body)
    }
}

fn transport(e: reqwest::Error) -> CommError {
    CommError::Transport(e.to_string())
}

fn check_status(status: StatusCode, body: String) -> Result<String, CommError> {
    if status.is_success() {
        return Ok(body);
    }
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };
    if status == StatusCode::NOT_FOUND {
        return Err(CommError::NotFound(message));
    }
    Err(CommError::Status {
        code: status.as_u16(),
        message,
    })
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, CommError> {
    serde_json::from_str(body)
        .map_err(|e| CommError::Decode(format!("failed to parse response: {e}, body: {body}")))
}

/// An empty or `null` body means the controller has no project ref.
fn decode_project_ref(body: &str) -> Result<Option<ProjectRef>, CommError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    decode(body)
}

#[async_trait]
impl Communicator for HttpCommunicator {
    async fn start_task(&self, td: &TaskData) -> Result<(), CommError> {
        let req = self.client.post(self.task_url(td, "start"));
        self.fetch(self.task(req, td)).await.map(|_| ())
    }

    async fn end_task(
        &self,
        td: &TaskData,
        detail: &TaskEndDetail,
    ) -> Result<EndTaskResponse, CommError> {
        let req = self.client.post(self.task_url(td, "end")).json(detail);
        self.call(self.task(req, td)).await
    }

    async fn get_task(&self, td: &TaskData) -> Result<Task, CommError> {
        let req = self.client.get(self.task_url(td, ""));
        self.call(self.task(req, td)).await
    }

    async fn get_project(&self, td: &TaskData) -> Result<Project, CommError> {
        let req = self.client.get(self.task_url(td, "parser_project"));
        self.call(self.task(req, td)).await
    }

    async fn get_expansion_vars(&self, td: &TaskData) -> Result<ExpansionVars, CommError> {
        let req = self.client.get(self.task_url(td, "expansions_and_vars"));
        self.call(self.task(req, td)).await
    }

    async fn get_project_ref(&self, td: &TaskData) -> Result<Option<ProjectRef>, CommError> {
        let req = self.client.get(self.task_url(td, "project_ref"));
        match self.fetch(self.task(req, td)).await {
            Ok(body) => decode_project_ref(&body),
            Err(CommError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_distro_view(&self, td: &TaskData) -> Result<DistroView, CommError> {
        let req = self.client.get(self.task_url(td, "distro_view"));
        self.call(self.task(req, td)).await
    }

    async fn get_task_patch(&self, td: &TaskData, patch_id: &str) -> Result<Patch, CommError> {
        let mut url = self.task_url(td, "patch");
        if !patch_id.is_empty() {
            url.push_str("?patch=");
            url.push_str(patch_id);
        }
        self.call(self.task(self.client.get(url), td)).await
    }

    async fn heartbeat(&self, td: &TaskData) -> Result<HeartbeatResponse, CommError> {
        let req = self.client.post(self.task_url(td, "heartbeat"));
        self.call(self.task(req, td)).await
    }

    async fn get_next_task(&self) -> Result<NextTaskResponse, CommError> {
        let req = self
            .client
            .get(format!("{}/api/v1/agent/next_task", self.base));
        self.call(self.host(req)).await
    }

    async fn send_log_messages(
        &self,
        td: &TaskData,
        msgs: &[LogMessage],
    ) -> Result<(), CommError> {
        if msgs.is_empty() {
            return Ok(());
        }
        let req = self.client.post(self.task_url(td, "log")).json(msgs);
        self.fetch(self.task(req, td)).await.map(|_| ())
    }
}
