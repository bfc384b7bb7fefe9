//! HTTP task-queue client.
//!
//! Protocol:
//! - `GET  {server}/api/v1/task-queues/{queue}/tasks/next?identity=..` → 200 task, 204 none
//! - `POST {server}/api/v1/task-queues/{queue}/tasks/{id}/response` with a `TaskResponse`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use super::queue::TaskQueue;
use super::task::{Task, TaskResponse};
use crate::admission::WorkerIdentity;
use crate::error::EngineError;

/// Poll requests may be held open by the server; allow for that.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(70);

/// Task-queue client speaking the engine's JSON API.
pub struct HttpTaskQueue {
    client: reqwest::Client,
    server: Url,
    queue: String,
    identity: String,
}

impl HttpTaskQueue {
    pub fn new(server: Url, identity: &WorkerIdentity) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            server,
            queue: identity.task_queue.clone(),
            identity: format!("{identity} instance={}", identity.instance_id),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.server.clone();
        url.set_query(None);
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| EngineError::Transport(format!("{} cannot be a base URL", self.server)))?;
            path.pop_if_empty()
                .extend(["api", "v1", "task-queues", self.queue.as_str(), "tasks"])
                .extend(segments);
        }
        Ok(url)
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    fn name(&self) -> &str {
        &self.queue
    }

    async fn poll(&self) -> Result<Option<Task>, EngineError> {
        let url = self.endpoint(&["next"])?;
        let response = self
            .client
            .get(url)
            .query(&[("identity", self.identity.as_str())])
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => Ok(Some(response.json::<Task>().await?)),
            status => Err(EngineError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn respond(&self, task_id: &str, response: TaskResponse) -> Result<(), EngineError> {
        let url = self.endpoint(&[task_id, "response"])?;
        let reply = self.client.post(url).json(&response).send().await?;

        let status = reply.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EngineError::Status {
                status: status.as_u16(),
                body: reply.text().await.unwrap_or_default(),
            })
        }
    }
}
