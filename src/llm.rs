use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client as OpenAIClient;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::environment::{var_or, var_parsed_or};
use crate::error::AgentError;
use crate::TARGET_LLM_REQUEST;

const MAX_RETRIES: usize = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub enum LLMClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}

/// Token counters reported by one agent call. Accumulated into the
/// RunRecord whether or not the downstream stage ultimately succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
    }
}

/// One successful agent response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// The request/response capability consumed from the AI-agent collaborator.
/// Implemented by [`LlmAgent`] in production and by scripted agents in tests.
#[allow(async_fn_in_trait)]
pub trait AiAgent {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, AgentError>;
}

/// Production agent backed by Ollama or OpenAI, with per-call timeout and
/// exponential-backoff retries for transient failures.
#[derive(Clone)]
pub struct LlmAgent {
    client: LLMClient,
    model: String,
    temperature: f32,
    request_timeout: Duration,
}

impl LlmAgent {
    pub fn new(client: LLMClient, model: String, temperature: f32) -> Self {
        LlmAgent {
            client,
            model,
            temperature,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Builds an agent from the environment: `OPENAI_API_KEY`/`OPENAI_MODEL`
    /// when set, otherwise `OLLAMA_HOST`/`OLLAMA_PORT`/`OLLAMA_MODEL`.
    pub fn from_env() -> Self {
        let temperature: f32 = var_parsed_or("LLM_TEMPERATURE", 0.2);

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let config = OpenAIConfig::new().with_api_key(api_key);
            let model = var_or("OPENAI_MODEL", "gpt-4o-mini");
            info!(target: TARGET_LLM_REQUEST, "Using OpenAI agent with model {}", model);
            return LlmAgent::new(LLMClient::OpenAI(OpenAIClient::with_config(config)), model, temperature);
        }

        let host = var_or("OLLAMA_HOST", "http://localhost");
        let port: u16 = var_parsed_or("OLLAMA_PORT", 11434);
        let model = var_or("OLLAMA_MODEL", "llama3");
        info!(target: TARGET_LLM_REQUEST, "Using Ollama agent at {}:{} with model {}", host, port, model);
        LlmAgent::new(LLMClient::Ollama(Ollama::new(host, port)), model, temperature)
    }

    async fn complete_once(&self, system: &str, prompt: &str) -> Result<Completion, AgentError> {
        match &self.client {
            LLMClient::Ollama(ollama) => {
                let mut request = GenerationRequest::new(self.model.clone(), prompt.to_string());
                request.system = Some(system.to_string().into());
                request.options =
                    Some(GenerationOptions::default().temperature(self.temperature));

                match timeout(self.request_timeout, ollama.generate(request)).await {
                    Ok(Ok(response)) => {
                        let usage = TokenUsage {
                            prompt: response.prompt_eval_count.map(|c| c as u64).unwrap_or(0),
                            completion: response.eval_count.map(|c| c as u64).unwrap_or(0),
                        };
                        Ok(Completion {
                            text: response.response,
                            usage,
                        })
                    }
                    Ok(Err(e)) => Err(AgentError::Unreachable(e.to_string())),
                    Err(_) => Err(AgentError::Timeout(self.request_timeout)),
                }
            }
            LLMClient::OpenAI(client) => {
                let request = CreateChatCompletionRequestArgs::default()
                    .model(&self.model)
                    .temperature(self.temperature)
                    .messages([
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(system)
                            .build()
                            .map_err(|e| AgentError::Unreachable(e.to_string()))?
                            .into(),
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(prompt)
                            .build()
                            .map_err(|e| AgentError::Unreachable(e.to_string()))?
                            .into(),
                    ])
                    .build()
                    .map_err(|e| AgentError::Unreachable(e.to_string()))?;

                match timeout(self.request_timeout, client.chat().create(request)).await {
                    Ok(Ok(response)) => {
                        let text = response
                            .choices
                            .first()
                            .and_then(|choice| choice.message.content.clone())
                            .unwrap_or_default();
                        let usage = response
                            .usage
                            .map(|u| TokenUsage {
                                prompt: u.prompt_tokens as u64,
                                completion: u.completion_tokens as u64,
                            })
                            .unwrap_or_default();
                        Ok(Completion { text, usage })
                    }
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        if message.to_lowercase().contains("rate limit") {
                            Err(AgentError::RateLimited(message))
                        } else {
                            Err(AgentError::Unreachable(message))
                        }
                    }
                    Err(_) => Err(AgentError::Timeout(self.request_timeout)),
                }
            }
        }
    }
}

impl AiAgent for LlmAgent {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, AgentError> {
        let mut backoff = 2;
        let mut last_error = AgentError::Unreachable("no attempt made".to_string());

        for retry_count in 0..MAX_RETRIES {
            debug!(target: TARGET_LLM_REQUEST, "Sending LLM request ({} chars)", prompt.len());

            match self.complete_once(system, prompt).await {
                Ok(completion) => {
                    if completion.text.trim().is_empty() {
                        warn!(target: TARGET_LLM_REQUEST, "LLM returned an empty response");
                        last_error =
                            AgentError::Malformed("empty response from agent".to_string());
                    } else {
                        debug!(
                            target: TARGET_LLM_REQUEST,
                            "LLM response received ({} prompt / {} completion tokens)",
                            completion.usage.prompt,
                            completion.usage.completion
                        );
                        return Ok(completion);
                    }
                }
                Err(e) => {
                    warn!(target: TARGET_LLM_REQUEST, "LLM request failed: {}", e);
                    last_error = e;
                }
            }

            if retry_count < MAX_RETRIES - 1 {
                info!(
                    target: TARGET_LLM_REQUEST,
                    "Retrying LLM request in {}s... ({}/{})",
                    backoff,
                    retry_count + 1,
                    MAX_RETRIES
                );
                sleep(Duration::from_secs(backoff)).await;
                backoff *= 2;
            }
        }

        error!(
            target: TARGET_LLM_REQUEST,
            "Failed to generate response after {} retries: {}", MAX_RETRIES, last_error
        );
        Err(last_error)
    }
}
