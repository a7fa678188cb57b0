use crate::config::GeneratorConfig;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Questions used whenever no generator is configured or it comes back empty.
pub const BUILT_IN_QUESTIONS: &[&str] = &[
    "What's the most embarrassing thing you've searched for this month?",
    "Who in this room would you call first if you got arrested?",
    "What's a lie you told this week?",
    "What's the pettiest reason you've stopped talking to someone?",
    "Which app do you spend way too much time on?",
    "What's the worst gift you pretended to love?",
    "Have you ever read someone's messages without them knowing?",
    "What's a habit you hide from your roommates or family?",
    "Who here do you think is the worst at keeping secrets?",
    "What's the most money you've wasted on something useless?",
    "When did you last cancel plans with a fake excuse?",
    "What's something you've never admitted to your best friend?",
    "Which person here would you trust least with your phone?",
    "What's the last thing you did that you'd hate your boss to find out?",
    "Have you ever taken credit for someone else's work?",
    "What's your most irrational fear?",
    "What's the worst date you've ever been on?",
    "Which group chat would you never let anyone here read?",
    "What's a rumor you helped spread?",
    "Who was your most embarrassing crush?",
    "What's the longest you've gone without showering?",
    "What's something you pretend to understand but don't?",
    "Have you ever ghosted someone in this room?",
    "What's the meanest thing you've thought about someone here today?",
    "What would you do with the pot if you won it tonight?",
];

pub fn built_in_deck() -> Vec<String> {
    BUILT_IN_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

/// Parameters sent to a question generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub group_size: usize,
    pub vibe: Option<String>,
    pub spice_level: Option<String>,
    pub context: Option<String>,
    pub count: usize,
}

impl GenerateRequest {
    pub fn from_config(config: &GeneratorConfig, group_size: usize) -> Self {
        Self {
            group_size,
            vibe: config.vibe.clone(),
            spice_level: config.spice_level.clone(),
            context: config.context.clone(),
            count: config.count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>>;
}

/// Calls a remote generator endpoint with a JSON POST.
pub struct HttpQuestionGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpQuestionGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::generator(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>> {
        let mut builder = self.client.post(&self.config.url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::generator(format!(
                "Generator returned HTTP {}",
                status
            )));
        }

        let body: GenerateResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(CoreError::generator(error));
        }

        Ok(body.questions)
    }
}

/// Build a question deck, asking the generator first and falling back to the
/// built-in bank on any failure. Never fails.
pub async fn seed_deck(
    generator: Option<&dyn QuestionGenerator>,
    request: &GenerateRequest,
    max_len: usize,
) -> Vec<String> {
    let Some(generator) = generator else {
        return built_in_deck();
    };

    match generator.generate(request).await {
        Ok(questions) => {
            let cleaned = clean_questions(questions, max_len);
            if cleaned.is_empty() {
                tracing::warn!("Question generator returned no usable questions, using built-in bank");
                built_in_deck()
            } else {
                tracing::info!("Generated {} questions", cleaned.len());
                cleaned
            }
        }
        Err(e) => {
            tracing::warn!("Question generator failed, using built-in bank: {}", e);
            built_in_deck()
        }
    }
}

/// Trim, drop empty or oversized entries, and dedupe while keeping order.
pub fn clean_questions(questions: Vec<String>, max_len: usize) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(questions.len());
    for question in questions {
        let trimmed = question.trim();
        if trimmed.is_empty() || trimmed.chars().count() > max_len {
            continue;
        }
        if !cleaned.iter().any(|q| q == trimmed) {
            cleaned.push(trimmed.to_string());
        }
    }
    cleaned
}
