//! Agent Module
//!
//! LLM plumbing (providers, retries, errors) and the policies that speak in a
//! consultation: the advisor, the simulated customer, and the reflector that
//! learns from the result.

mod error;
mod policies;
mod provider;
mod reflection;
mod retry;
mod types;

pub use error::{AgentError, AgentResult};
pub use policies::{
    parse_advisor_output, parse_customer_output, AdvisorContext, AdvisorPolicy, AdvisorReply, CustomerAssessment,
    CustomerContext, CustomerPolicy, CustomerProfile, CustomerReply, LlmAdvisor, LlmCustomer, END_MARKER,
    RESOLVED_MARKER,
};
pub use provider::{provider_from_config, Generator, LLMProvider, OllamaProvider, OpenAICompatibleProvider};
pub use reflection::{CandidatePrinciple, Reflector, RuleValue, SituationSummary};
pub use retry::RetryPolicy;
pub use types::{Speaker, TaskType};
