//! Model-family request/response envelopes.
//!
//! The request and response bodies differ by model family. Each model is
//! configured with an explicit [`ModelFamily`] tag; the family is never
//! guessed from the model identifier.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tokens per word used when the service does not report usage.
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Errors from decoding a response envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("{family} response is missing `{field}`")]
    MissingField {
        family: ModelFamily,
        field: &'static str,
    },

    #[error("Unknown model family '{0}' (expected completion, text-generation or messages)")]
    UnknownFamily(String),

    #[error("Invalid model spec '{0}' (expected <family>:<model-id>)")]
    InvalidSpec(String),
}

/// Closed set of envelope shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    /// `{"prompt": "Human: …\n\nAssistant:"}` in, `{"completion": …}` out.
    Completion,

    /// `{"inputText": …}` in, `{"results": [{"outputText", "tokenCount"}]}` out.
    TextGeneration,

    /// Chat `messages` in, `content[]` blocks plus `usage` out.
    Messages,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelFamily::Completion => "completion",
            ModelFamily::TextGeneration => "text-generation",
            ModelFamily::Messages => "messages",
        };
        f.write_str(s)
    }
}

impl FromStr for ModelFamily {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(ModelFamily::Completion),
            "text-generation" => Ok(ModelFamily::TextGeneration),
            "messages" => Ok(ModelFamily::Messages),
            other => Err(EnvelopeError::UnknownFamily(other.to_string())),
        }
    }
}

/// Sampling parameters shared by all families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: Some(0.7),
            top_p: Some(0.9),
        }
    }
}

/// Text and token usage extracted from a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub text: String,
    pub tokens: u64,

    /// False when `tokens` is a word-count estimate.
    pub tokens_reported: bool,
}

impl ModelFamily {
    /// Build the request body for `prompt`.
    pub fn request_body(self, prompt: &str, params: &GenerationParams) -> JsonValue {
        let mut body = match self {
            ModelFamily::Completion => json!({
                "prompt": format!("Human: {}\n\nAssistant:", prompt),
                "max_tokens_to_sample": params.max_tokens,
            }),
            ModelFamily::TextGeneration => {
                let mut config = json!({ "maxTokenCount": params.max_tokens });
                if let Some(t) = params.temperature {
                    config["temperature"] = json!(t);
                }
                if let Some(p) = params.top_p {
                    config["topP"] = json!(p);
                }
                return json!({ "inputText": prompt, "textGenerationConfig": config });
            }
            ModelFamily::Messages => json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": params.max_tokens,
                "messages": [{ "role": "user", "content": prompt }],
            }),
        };

        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        body
    }

    /// Extract the response text and token usage.
    pub fn parse_response(self, body: &JsonValue) -> Result<ParsedResponse, EnvelopeError> {
        let missing = |field| EnvelopeError::MissingField {
            family: self,
            field,
        };

        match self {
            ModelFamily::Completion => {
                let text = body["completion"]
                    .as_str()
                    .ok_or_else(|| missing("completion"))?
                    .trim()
                    .to_string();
                Ok(estimated(text))
            }
            ModelFamily::TextGeneration => {
                let result = body["results"]
                    .as_array()
                    .and_then(|r| r.first())
                    .ok_or_else(|| missing("results[0]"))?;
                let text = result["outputText"]
                    .as_str()
                    .ok_or_else(|| missing("results[0].outputText"))?
                    .trim()
                    .to_string();

                match result["tokenCount"].as_u64() {
                    Some(tokens) => Ok(ParsedResponse {
                        text,
                        tokens,
                        tokens_reported: true,
                    }),
                    None => Ok(estimated(text)),
                }
            }
            ModelFamily::Messages => {
                let blocks = body["content"]
                    .as_array()
                    .ok_or_else(|| missing("content"))?;
                let text = blocks
                    .iter()
                    .filter_map(|block| block["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
                    .trim()
                    .to_string();

                let usage = &body["usage"];
                match (usage["input_tokens"].as_u64(), usage["output_tokens"].as_u64()) {
                    (Some(input), Some(output)) => Ok(ParsedResponse {
                        text,
                        tokens: input + output,
                        tokens_reported: true,
                    }),
                    _ => Ok(estimated(text)),
                }
            }
        }
    }
}

fn estimated(text: String) -> ParsedResponse {
    let tokens = estimate_tokens(&text);
    ParsedResponse {
        text,
        tokens,
        tokens_reported: false,
    }
}

/// Word count × 1.3, truncated.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u64
}

/// A candidate model and its envelope family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub family: ModelFamily,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, family: ModelFamily) -> Self {
        Self {
            id: id.into(),
            family,
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.id)
    }
}

/// Parses `<family>:<model-id>`; the id itself may contain colons.
impl FromStr for ModelSpec {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, id) = s
            .split_once(':')
            .ok_or_else(|| EnvelopeError::InvalidSpec(s.to_string()))?;
        if id.trim().is_empty() {
            return Err(EnvelopeError::InvalidSpec(s.to_string()));
        }
        Ok(ModelSpec::new(id.trim(), family.parse()?))
    }
}
