//! Model coherence probe
//!
//! Asks the model a few general Linux administration questions unrelated to the
//! CVE and checks the answers with keyword patterns. A model that cannot answer
//! these is considered degraded, even if its triage reply is well-formed JSON.

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::Serialize;

use crate::model::ModelConfig;
use crate::service::llm::{GenerationOptions, ModelClient, call_model};

/// Inline or fenced code span, counted as one command
static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]+`|```[^`]+```").unwrap());

/// One check applied to an indicator answer
#[derive(Debug)]
pub enum AnswerCheck {
    /// Case-insensitive keyword alternation must match somewhere
    Mentions(Regex),
    /// At least this many code spans
    CodeSpans(usize),
}

impl AnswerCheck {
    fn mentions(keywords: &str) -> Self {
        Self::Mentions(Regex::new(&format!("(?i)({})", keywords)).unwrap())
    }

    pub fn passes(&self, answer: &str) -> bool {
        match self {
            Self::Mentions(pattern) => pattern.is_match(answer),
            Self::CodeSpans(min) => CODE_SPAN.find_iter(answer).count() >= *min,
        }
    }
}

#[derive(Debug)]
pub struct IndicatorQuestion {
    pub question: &'static str,
    pub checks: Vec<AnswerCheck>,
}

/// Fixed catalog of indicator questions
pub static INDICATOR_QUESTIONS: LazyLock<Vec<IndicatorQuestion>> = LazyLock::new(|| {
    vec![
        IndicatorQuestion {
            question: "List three main Linux commands for vulnerability scanning and specify minimum privilege level required for each.",
            checks: vec![
                AnswerCheck::mentions("nmap|openvas|lynis|nikto|chkrootkit|rkhunter|clamav|snort|ossec"),
                AnswerCheck::mentions("root|sudo|administrator|privilege|superuser|elevated"),
                AnswerCheck::CodeSpans(3),
            ],
        },
        IndicatorQuestion {
            question: "List three Linux commands for managing user accounts and the minimum permission level required for each.",
            checks: vec![
                AnswerCheck::mentions(
                    "useradd|adduser|usermod|userdel|deluser|passwd|chage|groups|gpasswd|groupadd|groupdel|groupmod",
                ),
                AnswerCheck::mentions("root|sudo|administrator|superuser|elevated|privileges"),
                AnswerCheck::CodeSpans(3),
            ],
        },
        IndicatorQuestion {
            question: "Explain which Linux package management commands require root privileges and why.",
            checks: vec![
                AnswerCheck::mentions("apt|apt-get|yum|dnf|pacman|rpm|dpkg|snap|flatpak"),
                AnswerCheck::mentions("root|sudo|superuser|administrator|elevated"),
                AnswerCheck::mentions(
                    "system|files|directories|security|integrity|libraries|binaries|conflicts",
                ),
            ],
        },
        IndicatorQuestion {
            question: "What Linux commands can be used to monitor network traffic and which require elevated permissions?",
            checks: vec![
                AnswerCheck::mentions(
                    "tcpdump|wireshark|tshark|netstat|ss|iftop|nethogs|iptraf|nload|bmon|vnstat",
                ),
                AnswerCheck::mentions(
                    "root|sudo|administrator|privileges|elevated|superuser|capabilities|cap_net",
                ),
                AnswerCheck::mentions(
                    "raw socket|packet capture|interface|promiscuous|device access|kernel|system",
                ),
            ],
        },
    ]
});

/// Outcome of one indicator question
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question: String,
    pub response: String,
    pub passed: bool,
    pub validation_details: Vec<bool>,
}

/// Outcome of a coherence probe
#[derive(Debug, Clone, Default, Serialize)]
pub struct MistakeCheckResult {
    pub mistake_detected: bool,
    pub results: Vec<QuestionResult>,
}

impl MistakeCheckResult {
    pub fn failed_questions(&self) -> impl Iterator<Item = &QuestionResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Independent coherence gate run after a structurally valid reply
#[async_trait]
pub trait CoherenceProbe: Send + Sync {
    async fn check_model_mistakes(&self, model: &str, num_questions: usize) -> MistakeCheckResult;
}

/// Indicator-question probe backed by a model client
pub struct MistakeDetector {
    client: Arc<dyn ModelClient>,
    options: GenerationOptions,
    rng: Mutex<StdRng>,
}

impl MistakeDetector {
    pub fn new(client: Arc<dyn ModelClient>, config: &ModelConfig, rng: StdRng) -> Self {
        Self {
            client,
            options: GenerationOptions::indicator(config),
            rng: Mutex::new(rng),
        }
    }

    pub fn from_entropy(client: Arc<dyn ModelClient>, config: &ModelConfig) -> Self {
        Self::new(client, config, StdRng::from_entropy())
    }

    #[cfg(test)]
    pub fn with_seed(client: Arc<dyn ModelClient>, config: &ModelConfig, seed: u64) -> Self {
        Self::new(client, config, StdRng::seed_from_u64(seed))
    }

    /// Pick `count` distinct questions; the lock is released before any model call
    fn sample(&self, count: usize) -> Vec<&'static IndicatorQuestion> {
        let catalog: &'static [IndicatorQuestion] = INDICATOR_QUESTIONS.as_slice();
        let count = count.min(catalog.len());

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        catalog.choose_multiple(&mut *rng, count).collect()
    }
}

#[async_trait]
impl CoherenceProbe for MistakeDetector {
    async fn check_model_mistakes(&self, model: &str, num_questions: usize) -> MistakeCheckResult {
        let options = GenerationOptions {
            model: model.to_string(),
            ..self.options.clone()
        };

        let mut result = MistakeCheckResult::default();

        for indicator in self.sample(num_questions) {
            let response = call_model(self.client.as_ref(), indicator.question, &options).await;

            let validation_details: Vec<bool> =
                indicator.checks.iter().map(|c| c.passes(&response)).collect();
            let passed = validation_details.iter().all(|ok| *ok);

            if !passed {
                tracing::warn!(
                    model = %model,
                    question = indicator.question,
                    validation_details = ?validation_details,
                    "Indicator question failed"
                );
                result.mistake_detected = true;
            }

            result.results.push(QuestionResult {
                question: indicator.question.to_string(),
                response,
                passed,
                validation_details,
            });
        }

        tracing::debug!(
            model = %model,
            questions = result.results.len(),
            mistake_detected = result.mistake_detected,
            "Coherence probe completed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::llm::LlmError;
    use std::collections::HashSet;

    const GOOD_ANSWER: &str = "Run `nmap -sV host`, `lynis audit system`, `useradd bob`, \
        `apt install curl` and `tcpdump -i eth0`. These need root or sudo privileges because \
        they modify system files or open a raw socket for packet capture on the interface.";

    struct StubClient {
        reply: Result<String, ()>,
        calls: Mutex<Vec<(String, GenerationOptions)>>,
    }

    impl StubClient {
        fn answering(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(vec![]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                calls: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ModelClient for StubClient {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options.clone()));
            self.reply
                .clone()
                .map_err(|_| LlmError::Connection("http://localhost:11434".to_string()))
        }
    }

    fn detector(client: Arc<StubClient>, seed: u64) -> MistakeDetector {
        MistakeDetector::with_seed(client, &ModelConfig::default(), seed)
    }

    #[test]
    fn test_catalog_shape() {
        assert_eq!(INDICATOR_QUESTIONS.len(), 4);
        for q in INDICATOR_QUESTIONS.iter() {
            assert_eq!(q.checks.len(), 3);
            assert!(q.checks.iter().all(|c| c.passes(GOOD_ANSWER)), "{}", q.question);
        }
    }

    #[test]
    fn test_code_span_count() {
        let check = AnswerCheck::CodeSpans(3);
        assert!(check.passes("`a` `b` `c`"));
        assert!(check.passes("```\nsudo nmap\n``` then `lynis` and `nikto`"));
        assert!(!check.passes("`a` and `b`"));
        assert!(!check.passes(""));
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let check = AnswerCheck::mentions("nmap|lynis");
        assert!(check.passes("Use NMAP for scanning"));
        assert!(!check.passes("Use a port scanner"));
    }

    #[tokio::test]
    async fn test_clean_model() {
        let client = StubClient::answering(GOOD_ANSWER);
        let result = detector(client.clone(), 7)
            .check_model_mistakes("mistral:7b", 2)
            .await;

        assert!(!result.mistake_detected);
        assert_eq!(result.results.len(), 2);
        assert!(result.results.iter().all(|r| r.passed));

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].0, calls[1].0);
        assert!(calls.iter().all(|(_, o)| o.seed.is_none() && o.model == "mistral:7b"));
    }

    #[tokio::test]
    async fn test_empty_reply_fails_every_check() {
        let result = detector(StubClient::failing(), 1)
            .check_model_mistakes("mistral:7b", 2)
            .await;

        assert!(result.mistake_detected);
        assert_eq!(result.failed_questions().count(), 2);
        for r in &result.results {
            assert_eq!(r.response, "");
            assert!(r.validation_details.iter().all(|ok| !ok));
        }
    }

    #[tokio::test]
    async fn test_one_failed_check_flags_mistake() {
        // Mentions tools and privileges but has no code spans
        let result = detector(
            StubClient::answering("nmap useradd apt tcpdump need root on the system interface"),
            3,
        )
        .check_model_mistakes("mistral:7b", 4)
        .await;

        assert!(result.mistake_detected);
        assert!(result.results.iter().any(|r| r.validation_details == vec![true, true, false]));
    }

    #[tokio::test]
    async fn test_sample_is_clamped_and_distinct() {
        let client = StubClient::answering(GOOD_ANSWER);
        let result = detector(client, 11).check_model_mistakes("mistral:7b", 10).await;

        let asked: HashSet<_> = result.results.iter().map(|r| r.question.clone()).collect();
        assert_eq!(asked.len(), 4);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let pick = |seed| {
            detector(StubClient::answering(""), seed)
                .sample(2)
                .iter()
                .map(|q| q.question)
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(42), pick(42));
    }

    #[tokio::test]
    async fn test_zero_questions() {
        let client = StubClient::answering(GOOD_ANSWER);
        let result = detector(client.clone(), 5).check_model_mistakes("mistral:7b", 0).await;

        assert!(!result.mistake_detected);
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
