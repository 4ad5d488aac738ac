pub mod llm;
pub mod mistakes;
pub mod triage;
pub mod vulnerability;

pub use llm::{ModelClient, OllamaClient};
pub use mistakes::MistakeDetector;
pub use triage::{TriageOutcome, TriageService};
pub use vulnerability::VulnerabilityService;
