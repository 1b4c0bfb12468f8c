use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;

/// The themes and prompts derived from one transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub themes: Vec<String>,
    pub prompts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IBM_API_KEY is not set")]
    MissingApiKey,
    #[error("IBM_PROJECT_ID is not set")]
    MissingProjectId,
    #[error("Failed to authenticate with IBM Cloud: {0}")]
    Authentication(String),
    #[error("Analysis request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Analysis response had an unexpected shape")]
    MalformedResponse,
}

/// The external text-analysis collaborator, invoked once per idea submission.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, transcription: &str) -> Result<Analysis, AnalysisError>;
}

impl Analysis {
    /// Used when the model responded but the expected tags were missing.
    pub fn fallback() -> Self {
        Self {
            themes: vec![
                "Idea".to_string(),
                "Concept".to_string(),
                "Innovation".to_string(),
            ],
            prompts: vec![
                "**Exploration**: Could not generate specific prompts. Please try again."
                    .to_string(),
            ],
        }
    }
}

const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";
const GRANITE_CHAT_URL: &str =
    "https://us-south.ml.cloud.ibm.com/ml/v1/text/chat?version=2023-05-29";
const GRANITE_MODEL: &str = "ibm/granite-3-3-8b-instruct";

/// Tokens are valid for 60 minutes. Refresh a little early.
const TOKEN_VALIDITY: Duration = Duration::from_secs(55 * 60);

/// Calls that take longer than this count as failed. Without a bound, a
/// hung endpoint would leave the submit pending forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are an AI assistant designed to enhance brainstorming sessions. \
Given a transcribed spoken idea, perform two tasks in sequence:\n\n\
1. **Analyze**: Extract 3-5 key themes or domains from the idea as single-word or very short \
(1-2 words maximum) labels. Place each theme on a new line starting with \"\u{2022}\". \
Output this analysis within <think> tags.\n\n\
2. **Generate**: Based on the identified themes and the original idea, create 3 creative prompts \
that would help expand this brainstorming idea further. Format each as a numbered item with a \
bold header followed by a question. Output these prompts within <response> tags.\n\n\
Be extremely concise with theme labels - each MUST be only 1-2 words maximum.";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// [Analyzer] backed by the IBM Granite chat API.
pub struct GraniteAnalyzer {
    http: reqwest::Client,
    api_key: String,
    project_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl GraniteAnalyzer {
    pub fn new(api_key: String, project_id: String) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            api_key,
            project_id,
            token: Mutex::new(None),
        })
    }

    /// Reads `IBM_API_KEY` and `IBM_PROJECT_ID` from the environment.
    pub fn from_env() -> Result<Self, AnalysisError> {
        let api_key = env::var("IBM_API_KEY").map_err(|_| AnalysisError::MissingApiKey)?;
        let project_id = env::var("IBM_PROJECT_ID").map_err(|_| AnalysisError::MissingProjectId)?;

        Self::new(api_key, project_id)
    }

    async fn token(&self) -> Result<String, AnalysisError> {
        let cached = {
            let token = self.token.lock();
            token
                .as_ref()
                .filter(|t| t.expires_at > Instant::now())
                .map(|t| t.value.clone())
        };

        if let Some(value) = cached {
            return Ok(value);
        }

        let response = self
            .http
            .post(IAM_TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnalysisError::Authentication(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let value = body["access_token"]
            .as_str()
            .ok_or(AnalysisError::MalformedResponse)?
            .to_string();

        *self.token.lock() = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + TOKEN_VALIDITY,
        });

        Ok(value)
    }
}

#[async_trait]
impl Analyzer for GraniteAnalyzer {
    async fn analyze(&self, transcription: &str) -> Result<Analysis, AnalysisError> {
        let token = self.token().await?;

        let body = json!({
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [{ "type": "text", "text": transcription }]
                }
            ],
            "project_id": self.project_id,
            "model_id": GRANITE_MODEL,
            "frequency_penalty": 0,
            "max_tokens": 2000,
            "presence_penalty": 0,
            "temperature": 0,
            "top_p": 1
        });

        let response = self
            .http
            .post(GRANITE_CHAT_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let result: Value = response.json().await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(AnalysisError::MalformedResponse)?;

        let analysis = parse_analysis(content);
        info!(
            "Analyzed transcript into {} themes and {} prompts",
            analysis.themes.len(),
            analysis.prompts.len()
        );

        Ok(analysis)
    }
}

/// Extracts themes and prompts from the model output, falling back per
/// part when a tag is missing entirely.
pub(crate) fn parse_analysis(content: &str) -> Analysis {
    let fallback = Analysis::fallback();

    let themes = match extract_tag(content, "think") {
        Some(block) => parse_themes(block),
        None => {
            warn!("Model output is missing the <think> block");
            fallback.themes
        }
    };

    let prompts = match extract_tag(content, "response") {
        Some(block) => parse_prompts(block),
        None => {
            warn!("Model output is missing the <response> block");
            fallback.prompts
        }
    };

    Analysis { themes, prompts }
}

/// Returns the text between `<tag>` and `</tag>`, if both are present.
fn extract_tag<'c>(content: &'c str, tag: &str) -> Option<&'c str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let start = content.find(&open)? + open.len();
    let end = content[start..].find(&close)? + start;

    Some(&content[start..end])
}

fn parse_themes(block: &str) -> Vec<String> {
    let bullets: Vec<String> = block
        .split('\u{2022}')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if !bullets.is_empty() {
        return bullets;
    }

    // No bullets at all, treat each line as a theme, shorn of whatever
    // list marker the model chose instead.
    block
        .lines()
        .map(|line| {
            line.trim_start_matches(|c: char| {
                c.is_ascii_digit() || c.is_whitespace() || c == '-' || c == '*' || c == '.'
            })
            .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_prompts(block: &str) -> Vec<String> {
    let mut prompts: Vec<String> = vec![];

    for line in block.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        match strip_number_prefix(trimmed) {
            // A numbered line starts a new prompt.
            Some(rest) => prompts.push(rest.to_string()),
            // Continuation lines belong to the prompt above them.
            None => match prompts.last_mut() {
                Some(last) => {
                    last.push('\n');
                    last.push_str(trimmed);
                }
                None => prompts.push(trimmed.to_string()),
            },
        }
    }

    prompts
}

/// Strips a leading "1. " style marker, preserving any markdown after it.
fn strip_number_prefix(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();

    if digits == 0 {
        return None;
    }

    let rest = line[digits..].strip_prefix('.')?;
    Some(rest.trim_start())
}
