// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::Context;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{GenerationParameters, ImageServiceConfig};

const PUBLIC_IMAGE_PREFIX: &str = "/generated-images";
const FILE_NAME_PROMPT_CHARS: usize = 20;

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Renders `prompt` and returns the stored artifact's path, e.g. `/generated-images/x.png`.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Client for a Stable Diffusion WebUI style `txt2img` endpoint.
pub struct StableDiffusionGenerator {
    client: reqwest::Client,
    config: ImageServiceConfig,
}

#[derive(Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    batch_size: u32,
    #[serde(flatten)]
    parameters: &'a GenerationParameters,
}

#[derive(Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

impl StableDiffusionGenerator {
    pub fn new(config: ImageServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build image generator http client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ImageGenerator for StableDiffusionGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.config.images_dir)
            .await
            .context("failed to create images directory")?;

        let request = Txt2ImgRequest {
            prompt,
            batch_size: 1,
            parameters: &self.config.parameters,
        };
        let response = self
            .client
            .post(&self.config.api_url)
            .json(&request)
            .send()
            .await
            .context("failed to call image generator")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("image generator returned {status}: {body}");
        }

        let body: Txt2ImgResponse = response
            .json()
            .await
            .context("invalid image generator payload")?;
        let encoded = body
            .images
            .first()
            .context("image generator returned no images")?;
        let bytes = decode_image(encoded)?;

        let file_name = image_file_name(prompt, Utc::now().timestamp_millis());
        let path = self.config.images_dir.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write image {}", path.display()))?;

        let public_path = format!("{PUBLIC_IMAGE_PREFIX}/{file_name}");
        info!(image_path = %public_path, "image generated");
        Ok(public_path)
    }
}

/// `<millis>-<first 20 prompt chars, non-alphanumerics as _>.png`
pub fn image_file_name(prompt: &str, millis: i64) -> String {
    let stem: String = prompt
        .chars()
        .take(FILE_NAME_PROMPT_CHARS)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{millis}-{stem}.png")
}

pub fn public_url(base_url: &str, image_path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), image_path)
}

fn decode_image(encoded: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:image/") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, data)| data)
            .unwrap_or(rest),
        None => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .context("image payload is not valid base64")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use std::time::Duration;

    #[test]
    fn file_name_keeps_twenty_sanitized_chars() {
        assert_eq!(
            image_file_name("red dragon over the castle walls", 1700000000000),
            "1700000000000-red_dragon_over_the_.png"
        );
        assert_eq!(image_file_name("déjà", 1), "1-d_j_.png");
    }

    #[test]
    fn decode_accepts_data_uri_and_bare_base64() {
        let encoded = STANDARD.encode(b"png-bytes");
        assert_eq!(decode_image(&encoded).unwrap(), b"png-bytes");
        assert_eq!(
            decode_image(&format!("data:image/png;base64,{encoded}")).unwrap(),
            b"png-bytes"
        );
        assert!(decode_image("%%%").is_err());
    }

    #[test]
    fn public_url_joins_without_double_slash() {
        assert_eq!(
            public_url("http://localhost:5000/", "/generated-images/a.png"),
            "http://localhost:5000/generated-images/a.png"
        );
    }

    async fn serve(response: serde_json::Value) -> String {
        let app = Router::new().route(
            "/sdapi/v1/txt2img",
            post(move |Json(request): Json<serde_json::Value>| {
                let response = response.clone();
                async move {
                    assert_eq!(request["batch_size"], 1);
                    assert_eq!(request["sampler_name"], "Euler a");
                    Json(response)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/sdapi/v1/txt2img")
    }

    fn config(api_url: String) -> ImageServiceConfig {
        ImageServiceConfig {
            api_url,
            timeout: Duration::from_secs(5),
            images_dir: std::env::temp_dir().join(format!("promptparty-{}", uuid::Uuid::new_v4())),
            public_base_url: "http://localhost:5000".to_string(),
            parameters: GenerationParameters::default(),
        }
    }

    #[tokio::test]
    async fn generate_writes_first_image_to_disk() {
        let url = serve(serde_json::json!({"images": [STANDARD.encode(b"fake-png")]})).await;
        let config = config(url);
        let images_dir = config.images_dir.clone();
        let generator = StableDiffusionGenerator::new(config).unwrap();

        let image_path = generator.generate("red dragon").await.unwrap();
        let file_name = image_path.strip_prefix("/generated-images/").unwrap();
        assert!(file_name.ends_with("-red_dragon.png"));
        assert_eq!(
            std::fs::read(images_dir.join(file_name)).unwrap(),
            b"fake-png"
        );
        std::fs::remove_dir_all(images_dir).unwrap();
    }

    #[tokio::test]
    async fn generate_fails_without_images() {
        let url = serve(serde_json::json!({"images": []})).await;
        let generator = StableDiffusionGenerator::new(config(url)).unwrap();
        let error = generator.generate("red dragon").await.unwrap_err();
        assert!(error.to_string().contains("no images"));
    }
}
