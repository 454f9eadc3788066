//! NL→SQL translator backed by a language model (mock or live chat-completions API).

use askdb_core::{CoreConfig, PipelineError, Translation, TranslationContext, Translator};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::sync::LazyLock;

const ENV_LLM_API_URL: &str = "ASKDB_LLM_API_URL";
const ENV_LLM_API_KEY: &str = "ASKDB_LLM_API_KEY";
const ENV_LLM_MODEL: &str = "ASKDB_LLM_MODEL";
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const STAGE: &str = "translation";

const SYSTEM_PROMPT: &str = "You translate questions about a PostgreSQL database into a single read-only SELECT statement. \
Respond with JSON only: {\"sql_query\": string or null, \"entities\": [string], \"intent\": string}. \
Use null for sql_query when the question cannot be answered with SQL. Never modify data.";

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap()
}

static HOW_MANY: LazyLock<Regex> = LazyLock::new(|| ci(r"\bhow\s+many\s+([a-z_][a-z0-9_]*)"));

static LIST_OF: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"\b(?:show|list|find|get|display)\s+(?:me\s+)?(?:all\s+)?(?:of\s+)?(?:the\s+)?([a-z_][a-z0-9_]*)")
});

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Mode for LLM invocation: mock (deterministic heuristics) or live (external API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LlmMode {
    #[default]
    Mock,
    Live,
}

impl LlmMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "live" => LlmMode::Live,
            _ => LlmMode::Mock,
        }
    }
}

/// Endpoint and credentials for live mode.
#[derive(Clone, Debug)]
pub struct LiveSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl LiveSettings {
    /// Reads `ASKDB_LLM_*`. `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(ENV_LLM_API_KEY).ok().filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_url: std::env::var(ENV_LLM_API_URL).unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key,
            model: std::env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }
}

pub struct ModelTranslator {
    mode: LlmMode,
    live: Option<LiveSettings>,
    client: reqwest::Client,
    schema_hint: Option<String>,
}

impl ModelTranslator {
    /// Live mode without settings is a configuration fault, reported here rather than per request.
    pub fn new(mode: LlmMode, live: Option<LiveSettings>) -> Result<Self, PipelineError> {
        if mode == LlmMode::Live && live.is_none() {
            return Err(PipelineError::InternalFault(format!(
                "llm_mode is live but {} is not set",
                ENV_LLM_API_KEY
            )));
        }
        Ok(Self {
            mode,
            live,
            client: reqwest::Client::new(),
            schema_hint: None,
        })
    }

    pub fn mock() -> Self {
        Self {
            mode: LlmMode::Mock,
            live: None,
            client: reqwest::Client::new(),
            schema_hint: None,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, PipelineError> {
        let translator = Self::new(LlmMode::parse(&config.llm_mode), LiveSettings::from_env())?;
        Ok(match config.schema_hint.as_deref().map(str::trim) {
            Some(hint) if !hint.is_empty() => translator.with_schema_hint(hint),
            _ => translator,
        })
    }

    /// Table/column overview included in every live prompt.
    pub fn with_schema_hint(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    fn build_prompt(&self, text: &str, context: &TranslationContext) -> String {
        let mut prompt = String::new();
        if let Some(hint) = &self.schema_hint {
            prompt.push_str("Database schema:\n");
            prompt.push_str(hint);
            prompt.push_str("\n\n");
        }
        if !context.is_empty() {
            prompt.push_str("Conversation context:\n");
            if let Some(q) = &context.last_query {
                prompt.push_str(&format!("- previous question: {}\n", q));
            }
            if let Some(sql) = &context.last_sql {
                prompt.push_str(&format!("- previous SQL: {}\n", sql));
            }
            if let Some(summary) = &context.last_result_summary {
                prompt.push_str(&format!("- previous result: {}\n", summary));
            }
            for message in &context.recent_messages {
                let role = serde_json::to_value(message.role)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                prompt.push_str(&format!("- {}: {}\n", role, message.content));
            }
            prompt.push('\n');
        }
        prompt.push_str("Question: ");
        prompt.push_str(text);
        prompt
    }

    /// Deterministic heuristics: "how many X" counts, "show/list X" selects.
    fn mock_translate(&self, text: &str) -> Translation {
        if let Some(caps) = HOW_MANY.captures(text) {
            let table = caps[1].to_lowercase();
            return Translation {
                sql_query: Some(format!("SELECT COUNT(*) AS count FROM {}", table)),
                entities: vec![table],
                intent: "count".to_string(),
            };
        }
        if let Some(caps) = LIST_OF.captures(text) {
            let table = caps[1].to_lowercase();
            return Translation {
                sql_query: Some(format!("SELECT * FROM {} LIMIT 100", table)),
                entities: vec![table],
                intent: "list".to_string(),
            };
        }
        Translation {
            sql_query: None,
            entities: Vec::new(),
            intent: "unknown".to_string(),
        }
    }

    async fn live_translate(
        &self,
        text: &str,
        context: &TranslationContext,
    ) -> Result<Translation, PipelineError> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| PipelineError::InternalFault("live translator has no API settings".into()))?;
        let prompt = self.build_prompt(text, context);

        let response = self
            .client
            .post(&live.api_url)
            .bearer_auth(&live.api_key)
            .json(&serde_json::json!({
                "model": &live.model,
                "temperature": 0,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt}
                ]
            }))
            .send()
            .await
            .map_err(|e| PipelineError::execution(STAGE, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(target: "askdb::translator", %status, body = %body, "LLM API error");
            return Err(PipelineError::execution(
                STAGE,
                format!("language model returned {}", status),
            ));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::execution(STAGE, format!("unreadable response: {}", e)))?;
        let content = api
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::execution(STAGE, "empty response from language model"))?;

        parse_translation(&content)
    }
}

#[async_trait::async_trait]
impl Translator for ModelTranslator {
    async fn translate(
        &self,
        text: &str,
        context: &TranslationContext,
    ) -> Result<Translation, PipelineError> {
        let translation = match self.mode {
            LlmMode::Mock => self.mock_translate(text),
            LlmMode::Live => self.live_translate(text, context).await?,
        };
        tracing::info!(
            target: "askdb::translator",
            mode = ?self.mode,
            intent = %translation.intent,
            has_sql = translation.sql_query.is_some(),
            "Question translated"
        );
        Ok(translation)
    }
}

/// Best-effort JSON extraction from free text: a fenced block first, else the outermost braces.
pub fn extract_json(text: &str) -> Result<serde_json::Value, PipelineError> {
    let candidate = match FENCED_JSON.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()),
        None => match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
            _ => None,
        },
    };
    let candidate = candidate
        .ok_or_else(|| PipelineError::execution(STAGE, "no JSON object in model response"))?;
    serde_json::from_str(candidate)
        .map_err(|e| PipelineError::execution(STAGE, format!("malformed JSON in model response: {}", e)))
}

pub fn parse_translation(text: &str) -> Result<Translation, PipelineError> {
    let value = extract_json(text)?;
    serde_json::from_value(value)
        .map_err(|e| PipelineError::execution(STAGE, format!("unexpected response shape: {}", e)))
}
