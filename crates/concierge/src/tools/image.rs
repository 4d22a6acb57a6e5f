use std::time::Duration;

use async_trait::async_trait;
use conciergeconf::ImageConfig;
use relay::{params_for, ToolDescriptor, ToolError};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::LocalTool;

const SUBMIT_PATH: &str = "/services/aigc/text2image/image-synthesis";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageArgs {
    /// What to draw, e.g. "a kitten playing in a garden"
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    results: Vec<TaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    url: Option<String>,
}

/// Text-to-image through an asynchronous task API: submit, poll until the
/// task settles, then download the first image into `save_dir`.
pub struct ImageGenerator {
    config: ImageConfig,
    http: reqwest::Client,
}

impl ImageGenerator {
    pub fn new(config: ImageConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn api_key(&self) -> Result<&str, ToolError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::internal("image generation is not configured"))
    }

    async fn fetch_json(&self, request: reqwest::RequestBuilder, what: &str) -> Result<TaskOutput, ToolError> {
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::upstream(format!("{} failed: {}", what, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::upstream(format!("{} returned {}: {}", what, status, body)));
        }
        let envelope: TaskEnvelope = response
            .json()
            .await
            .map_err(|e| ToolError::upstream(format!("{} returned a malformed body: {}", what, e)))?;
        Ok(envelope.output)
    }

    async fn submit(&self, prompt: &str) -> Result<String, ToolError> {
        let body = json!({
            "model": self.config.model,
            "input": { "prompt": prompt },
            "parameters": {
                "size": self.config.size(),
                "n": self.config.num_images,
            }
        });
        let request = self
            .http
            .post(format!("{}{}", self.base_url(), SUBMIT_PATH))
            .bearer_auth(self.api_key()?)
            .header("X-DashScope-Async", "enable")
            .json(&body);

        self.fetch_json(request, "image task submission")
            .await?
            .task_id
            .ok_or_else(|| ToolError::upstream("image task submission returned no task_id"))
    }

    /// Poll until the task succeeds; returns the first result URL.
    async fn wait_for(&self, task_id: &str) -> Result<String, ToolError> {
        let url = format!("{}/tasks/{}", self.base_url(), task_id);
        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval()).await;

            let request = self.http.get(&url).bearer_auth(self.api_key()?);
            let output = self.fetch_json(request, "image task status").await?;
            match output.task_status.as_deref() {
                Some("SUCCEEDED") => {
                    return output
                        .results
                        .into_iter()
                        .find_map(|r| r.url)
                        .ok_or_else(|| ToolError::upstream("image task succeeded without a result URL"));
                }
                Some("FAILED") => {
                    let reason = output.message.unwrap_or_else(|| "no reason given".to_string());
                    return Err(ToolError::upstream(format!("image task failed: {}", reason)));
                }
                status => {
                    tracing::debug!(task_id, attempt, status = ?status, "image task not finished");
                }
            }
        }
        Err(ToolError::upstream(format!(
            "image task {} did not finish after {} polls",
            task_id, self.config.max_polls
        )))
    }

    async fn save(&self, image_url: &str) -> Result<(String, String), ToolError> {
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| ToolError::upstream(format!("image download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ToolError::upstream(format!(
                "image download returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolError::upstream(format!("image download failed: {}", e)))?;

        let image_id = uuid::Uuid::new_v4().to_string();
        let filename = format!("{}.{}", image_id, self.config.save_format);
        tokio::fs::create_dir_all(&self.config.save_dir)
            .await
            .map_err(|e| ToolError::internal(format!("cannot create image directory: {}", e)))?;
        tokio::fs::write(self.config.save_dir.join(&filename), &bytes)
            .await
            .map_err(|e| ToolError::internal(format!("cannot save image: {}", e)))?;

        Ok((image_id, filename))
    }
}

#[async_trait]
impl LocalTool for ImageGenerator {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("generate_image", "Generate an image from a text description")
            .with_title("image generator")
            .with_params(params_for::<ImageArgs>())
    }

    /// The whole poll budget, plus the submit and download requests.
    fn timeout(&self) -> Option<Duration> {
        Some(self.config.poll_budget() + HTTP_TIMEOUT * 2)
    }

    #[tracing::instrument(name = "tool.generate_image", skip(self, arguments))]
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ImageArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::schema_mismatch(format!("invalid arguments: {}", e)))?;

        let task_id = self.submit(&args.prompt).await?;
        tracing::info!(task_id = %task_id, "image task submitted");
        let image_url = self.wait_for(&task_id).await?;
        let (image_id, filename) = self.save(&image_url).await?;
        tracing::info!(image_id = %image_id, "image saved");

        Ok(json!({
            "success": true,
            "image_id": image_id,
            "filename": filename,
            "url": format!("/api/images/{}", filename),
            "prompt": args.prompt,
        }))
    }
}
