//! Advisory Agency CLI
//!
//! ```text
//! advisory_agency evaluate <customers.yaml> [max_turns]
//! advisory_agency ablate <customers.yaml> [max_turns]
//! advisory_agency judge <labelled.yaml>
//! ```
//!
//! Configuration comes from `AGENCY_CONFIG` (default `agency.json`).

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use advisory_agency::agent::{
    provider_from_config, AdvisorPolicy, CustomerPolicy, CustomerProfile, Generator, LLMProvider, LlmAdvisor,
    LlmCustomer, Reflector, RetryPolicy,
};
use advisory_agency::config::{AgencyConfig, ConfigManager, StorageBackend};
use advisory_agency::evaluation::{validate_llm_judges, EvaluationHarness, LabelledTranscript, LlmJudge};
use advisory_agency::learning::LearningPipeline;
use advisory_agency::memory::{
    embedder_from_config, CaseStore, ExperienceSnapshot, RetrievalEngine, RuleStore, SqliteKnowledgeStore,
    StaticKnowledge,
};
use advisory_agency::orchestrator::{AgencyEvent, EventBus, Orchestrator};
use advisory_agency::utils::telemetry::init_telemetry;

const USAGE: &str = "usage: advisory_agency <evaluate|ablate> <customers.yaml> [max_turns]\n       advisory_agency judge <labelled.yaml>";

enum Command {
    Evaluate { customers: String, max_turns: Option<usize> },
    Ablate { customers: String, max_turns: Option<usize> },
    Judge { labelled: String },
}

fn parse_args(args: &[String]) -> Result<Command> {
    let max_turns = |arg: Option<&String>| -> Result<Option<usize>> {
        arg.map(|s| s.parse::<usize>().with_context(|| format!("invalid max_turns '{}'", s)))
            .transpose()
    };

    match args.first().map(String::as_str) {
        Some("evaluate") => Ok(Command::Evaluate {
            customers: args.get(1).cloned().ok_or_else(|| anyhow!(USAGE))?,
            max_turns: max_turns(args.get(2))?,
        }),
        Some("ablate") => Ok(Command::Ablate {
            customers: args.get(1).cloned().ok_or_else(|| anyhow!(USAGE))?,
            max_turns: max_turns(args.get(2))?,
        }),
        Some("judge") => Ok(Command::Judge {
            labelled: args.get(1).cloned().ok_or_else(|| anyhow!(USAGE))?,
        }),
        _ => bail!(USAGE),
    }
}

struct Stores {
    cases: Arc<dyn CaseStore>,
    rules: Arc<dyn RuleStore>,
}

async fn open_stores(config: &AgencyConfig) -> Result<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let snapshot = ExperienceSnapshot::load(&config.storage.path)
                .await
                .with_context(|| format!("loading snapshot {:?}", config.storage.path))?;
            info!("Loaded {} cases and {} rules", snapshot.cases.len(), snapshot.rules.len());
            let (cases, rules) = snapshot.into_stores();
            Ok(Stores { cases: Arc::new(cases), rules: Arc::new(rules) })
        }
        StorageBackend::Sqlite => {
            let store = Arc::new(
                SqliteKnowledgeStore::new(&config.storage.path)
                    .await
                    .with_context(|| format!("opening database {:?}", config.storage.path))?,
            );
            Ok(Stores { cases: store.clone(), rules: store })
        }
    }
}

async fn persist(config: &AgencyConfig, stores: &Stores) -> Result<()> {
    if config.storage.backend == StorageBackend::Memory {
        let snapshot = ExperienceSnapshot::capture(stores.cases.as_ref(), stores.rules.as_ref()).await?;
        snapshot.save(&config.storage.path).await?;
        info!("Saved experience snapshot to {:?}", config.storage.path);
    }
    Ok(())
}

async fn load_customers(path: &Path, provider: &Arc<dyn LLMProvider>, config: &AgencyConfig) -> Result<Vec<Arc<dyn CustomerPolicy>>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let profiles: Vec<CustomerProfile> = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if profiles.is_empty() {
        bail!("{} has no customers", path.display());
    }

    Ok(profiles
        .into_iter()
        .map(|p| Arc::new(LlmCustomer::new(p, generator(provider, &config.provider.customer_model, config))) as Arc<dyn CustomerPolicy>)
        .collect())
}

fn generator(provider: &Arc<dyn LLMProvider>, model: &str, config: &AgencyConfig) -> Generator {
    Generator::new(provider.clone(), model).with_retry(RetryPolicy::from_config(&config.provider))
}

fn log_events(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(AgencyEvent::TurnCompleted { consultation, index, speaker }) => {
                    debug!("[{}] turn {} by {}", consultation, index, speaker);
                }
                Ok(event) => info!("event: {:?}", event),
                Err(RecvError::Lagged(n)) => warn!("Event log lagged, dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config_path = std::env::var("AGENCY_CONFIG").unwrap_or_else(|_| "agency.json".to_string());
    let config = ConfigManager::new(&config_path)
        .load()
        .await
        .with_context(|| format!("loading config {}", config_path))?;

    let _telemetry = init_telemetry(&config.logging).map_err(|e| anyhow!("failed to initialise telemetry: {}", e))?;

    let provider = provider_from_config(&config.provider);
    let analyst = generator(&provider, &config.provider.analyst_model, &config);

    if let Command::Judge { labelled } = &command {
        let labelled = LabelledTranscript::load_yaml(labelled).await?;
        let judge = LlmJudge::new(config.provider.analyst_model.clone(), analyst);
        let report = validate_llm_judges(&judge, &labelled, config.evaluation.calibration_bins).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let engine = Arc::new(RetrievalEngine::new(embedder_from_config(&config.provider), &config.retrieval));
    let stores = open_stores(&config).await?;

    let events = Arc::new(EventBus::new());
    log_events(&events);

    let mut orchestrator = Orchestrator::new(engine.clone(), stores.cases.clone(), stores.rules.clone(), &config)
        .with_events(events.clone());
    if let Some(path) = &config.storage.knowledge_path {
        let knowledge = StaticKnowledge::load_yaml(path, &engine)
            .await
            .with_context(|| format!("loading knowledge {:?}", path))?;
        info!("Loaded {} knowledge entries", knowledge.len());
        orchestrator = orchestrator.with_knowledge(Arc::new(knowledge));
    }

    let advisor: Arc<dyn AdvisorPolicy> = Arc::new(LlmAdvisor::new(
        config.provider.advisor_model.clone(),
        generator(&provider, &config.provider.advisor_model, &config),
    ));

    match command {
        Command::Evaluate { customers, max_turns } => {
            let customers = load_customers(Path::new(&customers), &provider, &config).await?;
            let pipeline = Arc::new(
                LearningPipeline::new(
                    engine.clone(),
                    stores.cases.clone(),
                    stores.rules.clone(),
                    Reflector::new(analyst),
                    config.learning.clone(),
                )
                .with_events(events.clone()),
            );
            let harness = EvaluationHarness::new(orchestrator, config.evaluation.clone()).with_learning(pipeline);
            let run = harness
                .evaluate_detailed(advisor, &customers, max_turns.unwrap_or(config.consultation.max_turns))
                .await;
            persist(&config, &stores).await?;
            println!("{}", serde_json::to_string_pretty(&run.metrics)?);
        }
        Command::Ablate { customers, max_turns } => {
            let customers = load_customers(Path::new(&customers), &provider, &config).await?;
            let harness = EvaluationHarness::new(orchestrator, config.evaluation.clone());
            let report = harness
                .run_ablation_study(advisor, &customers, max_turns.unwrap_or(config.consultation.max_turns))
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Judge { .. } => {}
    }

    Ok(())
}
