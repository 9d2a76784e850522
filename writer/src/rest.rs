use crate::attachment::Attachment;
use crate::config::RestApiConfig;
use crate::storage::{StorageBackend, StorageError, StorageResult, WithContext};
use crate::types::{ResultAttachment, TestResult};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, info};

const RESULT_CREATE: &str = "/api/results/create";
const RESULT_DELETE: &str = "/api/results/delete";
const RESULT_ATTACHMENT_CREATE: &str = "/api/results/attachment/create";
const RESULT_DETAIL_VIEW: &str = "/result/detail";

/// Sends results to a reesmo server over its REST API.
///
/// Every request is authenticated with HTTP basic auth and any status other
/// than `200 OK` is an error. Nothing is retried.
#[derive(Debug)]
pub struct RestApiStorage {
    client: Client,
    base_url: String,
    config: RestApiConfig,
}

impl RestApiStorage {
    pub fn new(config: RestApiConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::configuration)?;

        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| {
                StorageError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            config,
        })
    }

    pub fn config(&self) -> &RestApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn create_url(&self, project_key: Option<&str>) -> String {
        match project_key {
            Some(key) => self.url(&format!("{}/{}", RESULT_CREATE, key)),
            None => self.url(RESULT_CREATE),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(ACCEPT, "application/json")
    }

    fn send(&self, request: RequestBuilder, url: &str) -> StorageResult<Response> {
        let response = request
            .send()
            .context(format!("Unable to execute request on url {}", url))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            debug!("Rejected request to {}: {}", url, body);
            return Err(StorageError::backend(format!(
                "Wrong status code {} when requesting url {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }

    fn upload_attachments(
        &self,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        for attachment in attachments {
            let files = attachment
                .expand()
                .context(format!("Unable to store result attachment {}", attachment))?;
            for file in files {
                let stored = self
                    .upload_attachment(result, &file)
                    .context(format!("Unable to store result attachment {}", file))?;
                result.push_attachment(stored);
            }
        }
        Ok(())
    }

    fn upload_attachment(
        &self,
        result: &TestResult,
        attachment: &Attachment,
    ) -> StorageResult<ResultAttachment> {
        let id = result
            .id()
            .ok_or_else(|| StorageError::backend("Result has no id to attach files to"))?;
        let url = self.url(&format!("{}/{}", RESULT_ATTACHMENT_CREATE, id));

        let mut part = multipart::Part::file(attachment.file())?;
        if let Some(content_type) = attachment.content_type() {
            part = part.mime_str(content_type)?;
        }
        let mut form = multipart::Form::new().part("file", part);
        if let Some(path) = attachment.trimmed_path() {
            form = form.text("path", path.to_string());
        }

        let response = self.send(self.authorized(self.client.post(&url)).multipart(form), &url)?;
        let stored: ResultAttachment = response
            .json()
            .context("Unable to parse result attachment from response")?;

        info!(
            "Result attachment stored {}",
            stored.id().unwrap_or_default()
        );
        Ok(stored)
    }
}

impl StorageBackend for RestApiStorage {
    fn create_result(
        &self,
        project_key: Option<&str>,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        let url = self.create_url(project_key);
        debug!("Creating result at {}", url);

        let response = self.send(self.authorized(self.client.post(&url)).json(&*result), &url)?;
        let created: TestResult = response.json().context(format!(
            "Unable to parse result from response while requesting url {}",
            url
        ))?;

        let id = created.id().map(str::to_string).ok_or_else(|| {
            StorageError::backend(format!("Response from {} carries no result id", url))
        })?;
        *result = created;
        info!(
            "Result created {} {}",
            id,
            self.url(&format!("{}/{}", RESULT_DETAIL_VIEW, id))
        );

        self.upload_attachments(result, attachments)
    }

    fn delete_result(&self, result: &TestResult) -> StorageResult<()> {
        let id = result.id().ok_or_else(|| {
            StorageError::backend("Result not found, it must be added before deleting")
        })?;
        let url = self.url(&format!("{}/{}", RESULT_DELETE, id));
        self.send(self.authorized(self.client.get(&url)), &url)?;
        info!("Result deleted on server {}", id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "restapi"
    }
}
