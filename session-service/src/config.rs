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

use std::{path::PathBuf, time::Duration};

use promptparty_common::{
    DEFAULT_IMAGE_TIMEOUT_SECONDS, DEFAULT_LEADERBOARD_LIMIT, DEFAULT_TURN_ACK_TIMEOUT_SECONDS,
    DEFAULT_WORD_COLLECTION_SECONDS, WordBank, expand_env_vars,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of countdown ticks in the word collection window.
    pub word_collection_ticks: u64,
    pub tick: Duration,
    pub turn_ack_timeout: Duration,
    pub leaderboard_default_limit: usize,
    pub image: ImageServiceConfig,
}

#[derive(Debug, Clone)]
pub struct ImageServiceConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub images_dir: PathBuf,
    pub public_base_url: String,
    pub parameters: GenerationParameters,
}

/// Tunables forwarded verbatim to the txt2img endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationParameters {
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub sampler_name: String,
    pub seed: i64,
    pub restore_faces: bool,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            negative_prompt: String::new(),
            width: 512,
            height: 512,
            steps: 41,
            cfg_scale: 13.0,
            sampler_name: "Euler a".to_string(),
            seed: -1,
            restore_faces: false,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            word_collection_ticks: DEFAULT_WORD_COLLECTION_SECONDS,
            tick: Duration::from_millis(1000),
            turn_ack_timeout: Duration::from_secs(DEFAULT_TURN_ACK_TIMEOUT_SECONDS),
            leaderboard_default_limit: DEFAULT_LEADERBOARD_LIMIT,
            image: ImageServiceConfig {
                api_url: "http://127.0.0.1:7860/sdapi/v1/txt2img".to_string(),
                timeout: Duration::from_secs(DEFAULT_IMAGE_TIMEOUT_SECONDS),
                images_dir: PathBuf::from("public/generated-images"),
                public_base_url: "http://localhost:5000".to_string(),
                parameters: GenerationParameters::default(),
            },
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            word_collection_ticks: env_positive("WORD_COLLECTION_SECONDS")
                .unwrap_or(defaults.word_collection_ticks),
            tick: env_positive("TIMER_TICK_MILLIS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick),
            turn_ack_timeout: env_positive("TURN_ACK_TIMEOUT_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.turn_ack_timeout),
            leaderboard_default_limit: env_positive("LEADERBOARD_DEFAULT_LIMIT")
                .map(|value| value as usize)
                .unwrap_or(defaults.leaderboard_default_limit),
            image: ImageServiceConfig {
                api_url: env_string("IMAGE_API_URL", &defaults.image.api_url),
                timeout: env_positive("IMAGE_TIMEOUT_SECONDS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.image.timeout),
                images_dir: PathBuf::from(env_string(
                    "IMAGES_DIR",
                    &defaults.image.images_dir.to_string_lossy(),
                )),
                public_base_url: env_string(
                    "PUBLIC_IMAGE_BASE_URL",
                    &defaults.image.public_base_url,
                ),
                parameters: load_generation_parameters().unwrap_or_default(),
            },
        }
    }
}

fn env_string(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_positive(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn config_path(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &str, what: &str) -> Option<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read {what} config file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "{what} config file is empty");
        return None;
    }

    parse_yaml(&raw)
        .inspect_err(|error| {
            warn!(path = %path, error = %error, "failed to parse {what} config yaml");
        })
        .ok()
}

fn parse_yaml<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, serde_yaml::Error> {
    serde_yaml::from_str(&expand_env_vars(raw))
}

/// Word bank from `WORD_BANK_CONFIG_PATH`, or the built-in one.
pub fn load_word_bank() -> WordBank {
    let Some(path) = config_path("WORD_BANK_CONFIG_PATH") else {
        return WordBank::default();
    };
    match read_yaml::<WordBank>(&path, "word bank") {
        Some(bank) => {
            info!(
                path = %path,
                baseline = bank.baseline.len(),
                themes = bank.themes.len(),
                "loaded word bank from YAML config"
            );
            bank
        }
        None => WordBank::default(),
    }
}

fn load_generation_parameters() -> Option<GenerationParameters> {
    let path = config_path("IMAGE_GENERATION_CONFIG_PATH")?;
    let parameters = read_yaml::<GenerationParameters>(&path, "image generation")?;
    info!(path = %path, steps = parameters.steps, "loaded image generation parameters");
    Some(parameters)
}
