//! CVE triage service
//!
//! Drives the bounded attempt loop: build the prompt for the attempt, call the
//! model, check the reply structure, then run the coherence probe. The first
//! reply passing both gates wins.

use std::sync::Arc;
use std::time::Instant;

use crate::model::{ModelConfig, ModelReply, VulnerabilityRecord};
use crate::service::llm::{GenerationOptions, ModelClient, call_model};
use crate::service::mistakes::{CoherenceProbe, MistakeCheckResult};

pub mod error;
pub mod prompts;
pub mod validation;

pub use error::{PromptError, TriageError};
pub use prompts::build_prompt;
pub use validation::{is_valid, parse_reply};

/// Maximum number of main-prompt model calls per triage
pub const MAX_ATTEMPTS: u32 = prompts::MAX_PROMPT_ATTEMPT;

/// What happened on a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    EmptyReply,
    InvalidStructure,
    MistakesDetected,
    Accepted,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::EmptyReply => "empty reply",
            Self::InvalidStructure => "invalid structure",
            Self::MistakesDetected => "mistakes detected",
            Self::Accepted => "accepted",
        };
        f.pad(label)
    }
}

// One pass of the attempt loop
// - elapsed_ms: model call plus coherence probe
// - probe: set when the reply was structurally valid and the probe ran
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u128,
    pub probe: Option<MistakeCheckResult>,
}

/// Accepted reply and the attempts it took
#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub reply: ModelReply,
    pub attempts: Vec<AttemptRecord>,
}

/// Service running the triage loop against a model
pub struct TriageService {
    client: Arc<dyn ModelClient>,
    probe: Box<dyn CoherenceProbe>,
    config: ModelConfig,
}

impl TriageService {
    pub fn new(
        client: Arc<dyn ModelClient>,
        probe: Box<dyn CoherenceProbe>,
        config: ModelConfig,
    ) -> Self {
        tracing::info!(
            model = %config.name,
            indicator_questions = config.indicator_questions,
            "Triage service initialized"
        );

        Self {
            client,
            probe,
            config,
        }
    }

    /// Triage one CVE from its already collected record
    pub async fn triage(&self, record: &VulnerabilityRecord) -> Result<TriageOutcome, TriageError> {
        let options = GenerationOptions::triage(&self.config);
        let mut attempts = Vec::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let start_time = Instant::now();

            let prompt = build_prompt(record, attempt).map_err(|e| {
                tracing::error!(cve = %record.cve_id, attempt = attempt, error = %e, "Failed to build prompt");
                e
            })?;

            let raw = call_model(self.client.as_ref(), &prompt, &options).await;

            let (outcome, probe) = if raw.trim().is_empty() {
                tracing::warn!(cve = %record.cve_id, attempt = attempt, "Model returned an empty reply");
                (AttemptOutcome::EmptyReply, None)
            } else if !is_valid(&raw) {
                tracing::warn!(
                    cve = %record.cve_id,
                    attempt = attempt,
                    reply_length = raw.len(),
                    "Model reply failed structural validation"
                );
                (AttemptOutcome::InvalidStructure, None)
            } else {
                let probe = self
                    .probe
                    .check_model_mistakes(&self.config.name, self.config.indicator_questions)
                    .await;

                if probe.mistake_detected {
                    tracing::warn!(
                        cve = %record.cve_id,
                        attempt = attempt,
                        failed_questions = probe.failed_questions().count(),
                        "Coherence probe detected model mistakes"
                    );
                    (AttemptOutcome::MistakesDetected, Some(probe))
                } else {
                    (AttemptOutcome::Accepted, Some(probe))
                }
            };

            let elapsed_ms = start_time.elapsed().as_millis();

            if outcome == AttemptOutcome::Accepted {
                tracing::info!(
                    cve = %record.cve_id,
                    attempt = attempt,
                    elapsed_ms = elapsed_ms,
                    "Triage reply accepted"
                );
                attempts.push(AttemptRecord {
                    attempt,
                    outcome,
                    elapsed_ms,
                    probe,
                });
                return Ok(TriageOutcome {
                    reply: parse_reply(&raw),
                    attempts,
                });
            }

            attempts.push(AttemptRecord {
                attempt,
                outcome,
                elapsed_ms,
                probe,
            });
        }

        tracing::error!(cve = %record.cve_id, attempts = attempts.len(), "Triage attempts exhausted");

        Err(TriageError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::llm::LlmError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID: &str = r#"{"CVE": "CVE-2024-0001", "Решение": "патчить", "Обоснование": "в KEV", "Патч": null}"#;

    /// Replays scripted replies, repeating the last one
    struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front().unwrap_or_default()
            } else {
                replies.front().cloned().unwrap_or_default()
            };
            if reply == "<error>" {
                return Err(LlmError::Timeout(300));
            }
            Ok(reply)
        }
    }

    struct CountingProbe {
        mistake_detected: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CoherenceProbe for CountingProbe {
        async fn check_model_mistakes(&self, _model: &str, num_questions: usize) -> MistakeCheckResult {
            assert_eq!(num_questions, 2);
            self.calls.fetch_add(1, Ordering::SeqCst);
            MistakeCheckResult {
                mistake_detected: self.mistake_detected,
                results: vec![],
            }
        }
    }

    fn service(model: Arc<ScriptedModel>, mistakes: bool) -> (TriageService, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            mistake_detected: mistakes,
            calls: calls.clone(),
        };
        (
            TriageService::new(model, Box::new(probe), ModelConfig::default()),
            calls,
        )
    }

    fn record() -> VulnerabilityRecord {
        VulnerabilityRecord::empty("CVE-2024-0001".parse().unwrap())
    }

    #[tokio::test]
    async fn test_always_invalid_exhausts_after_three_calls() {
        let model = ScriptedModel::new(&["I think you should patch it."]);
        let (service, probe_calls) = service(model.clone(), false);

        let err = service.triage(&record()).await.unwrap_err();

        let TriageError::Exhausted { attempts } = err else {
            panic!("expected exhaustion, got {:?}", err);
        };
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::InvalidStructure));
        assert!(attempts.iter().all(|a| a.probe.is_none()));
        assert_eq!(
            attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(model.calls(), 3);
        assert_eq!(probe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_first_reply_succeeds_after_one_call() {
        let model = ScriptedModel::new(&[VALID]);
        let (service, probe_calls) = service(model.clone(), false);

        let outcome = service.triage(&record()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(probe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Accepted);
        assert!(outcome.attempts[0].probe.as_ref().is_some_and(|p| !p.mistake_detected));
        assert_eq!(outcome.reply.decision().as_deref(), Some("патчить"));
    }

    #[tokio::test]
    async fn test_empty_then_valid() {
        let model = ScriptedModel::new(&["<error>", "   ", VALID]);
        let (service, _) = service(model.clone(), false);

        let outcome = service.triage(&record()).await.unwrap();

        let outcomes: Vec<_> = outcome.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                AttemptOutcome::EmptyReply,
                AttemptOutcome::EmptyReply,
                AttemptOutcome::Accepted
            ]
        );
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_mistakes_exhaust_attempts() {
        let model = ScriptedModel::new(&[VALID]);
        let (service, probe_calls) = service(model.clone(), true);

        let err = service.triage(&record()).await.unwrap_err();

        let TriageError::Exhausted { attempts } = err else {
            panic!("expected exhaustion, got {:?}", err);
        };
        assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::MistakesDetected));
        assert!(attempts.iter().all(|a| a.probe.as_ref().is_some_and(|p| p.mistake_detected)));
        assert_eq!(model.calls(), 3);
        assert_eq!(probe_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prompts_escalate_per_attempt() {
        let model = ScriptedModel::new(&["nope"]);
        let (service, _) = service(model.clone(), false);

        let _ = service.triage(&record()).await;

        let prompts = model.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Оценка влияния"));
        assert!(prompts[1].contains("Оценка влияния"));
        assert!(!prompts[1].contains("Оценка эксплуатируемости"));
        assert!(prompts[2].contains("Оценка эксплуатируемости"));
    }
}
