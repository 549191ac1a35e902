//! Bundled agent-step engine
//!
//! Each step asks the generation service, for every agent in turn, where the
//! agent goes next and how poignant that event is. Both calls go through the
//! shared [`RetryingGenerator`] and fall back to their fail-safes when the
//! service misbehaves. A step in which too many calls fell back is reported
//! as a recoverable failure so the executor can step back and retry it.

use super::history::HistoryEntry;
use super::prompts::{PromptLibrary, DEFAULT_ACTION_TEMPLATE, DEFAULT_IMPORTANCE_TEMPLATE};
use super::{SimulationEngine, StepFailure};
use crate::checkpoint::EngineSnapshot;
use crate::generation::{
    CallSite, FieldKind, GenerationOutput, GenerationParams, IntegerInRange, OneOf,
    OutputHandler, RetryingGenerator, SchemaDescriptor,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// Importance assigned when the service never produced a usable rating
pub const FAIL_SAFE_IMPORTANCE: i64 = 4;

const IDLE_ACTION: &str = "idle";

/// Initial placement of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub location: String,
}

/// Configuration of the bundled engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSpec>,

    #[serde(default = "default_locations")]
    pub locations: Vec<String>,

    /// Highest tolerated fraction of fail-safe calls within one step
    #[serde(default = "default_max_fail_safe_ratio")]
    pub max_fail_safe_ratio: f64,

    /// Notes kept per agent
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,

    #[serde(default = "default_action_attempts")]
    pub action_attempts: u32,

    #[serde(default = "default_importance_attempts")]
    pub importance_attempts: u32,

    /// Tera template overriding the built-in action prompt
    #[serde(default)]
    pub action_template: Option<String>,

    /// Tera template overriding the built-in importance prompt
    #[serde(default)]
    pub importance_template: Option<String>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            locations: default_locations(),
            max_fail_safe_ratio: default_max_fail_safe_ratio(),
            memory_size: default_memory_size(),
            action_attempts: default_action_attempts(),
            importance_attempts: default_importance_attempts(),
            action_template: None,
            importance_template: None,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("at least one agent is required");
        }
        if self.locations.is_empty() {
            bail!("at least one location is required");
        }
        if !(0.0..=1.0).contains(&self.max_fail_safe_ratio) {
            bail!(
                "max_fail_safe_ratio must be between 0 and 1, got {}",
                self.max_fail_safe_ratio
            );
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                bail!("agent '{}' is declared twice", agent.name);
            }
            if !self.locations.contains(&agent.location) {
                bail!(
                    "agent '{}' starts at unknown location '{}'",
                    agent.name,
                    agent.location
                );
            }
        }
        Ok(())
    }
}

fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            name: "Isabella Rodriguez".to_string(),
            location: "cafe".to_string(),
        },
        AgentSpec {
            name: "Klaus Mueller".to_string(),
            location: "library".to_string(),
        },
        AgentSpec {
            name: "Maria Lopez".to_string(),
            location: "dorm".to_string(),
        },
    ]
}

fn default_locations() -> Vec<String> {
    ["cafe", "library", "dorm", "park", "supply store"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_fail_safe_ratio() -> f64 {
    0.5
}

fn default_memory_size() -> usize {
    20
}

fn default_action_attempts() -> u32 {
    3
}

fn default_importance_attempts() -> u32 {
    2
}

/// What an agent does next and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub action: String,
    pub location: String,
}

impl AgentAction {
    /// Fail-safe action: stay where you are and do nothing
    pub fn idle(location: &str) -> Self {
        Self {
            action: IDLE_ACTION.to_string(),
            location: location.to_string(),
        }
    }
}

/// Accepts `{action, location}` objects naming a known location
struct ActionHandler {
    locations: OneOf,
}

impl ActionHandler {
    fn new(locations: &[String]) -> Self {
        Self {
            locations: OneOf::new(locations.iter().cloned()).in_field("location"),
        }
    }
}

impl OutputHandler<AgentAction> for ActionHandler {
    fn validate(&self, output: &GenerationOutput) -> bool {
        output
            .str_field("action")
            .is_some_and(|a| !a.trim().is_empty())
            && self.locations.validate(output)
    }

    fn transform(&self, output: &GenerationOutput) -> Result<AgentAction> {
        let action = output
            .str_field("action")
            .ok_or_else(|| anyhow!("missing action"))?
            .trim()
            .to_string();
        let location = self.locations.transform(output)?;
        Ok(AgentAction { action, location })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub step: u64,
    pub text: String,
    pub importance: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub location: String,
    pub action: String,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl AgentState {
    fn remember(&mut self, note: Note, capacity: usize) {
        self.notes.push(note);
        if self.notes.len() > capacity {
            let excess = self.notes.len() - capacity;
            self.notes.drain(..excess);
        }
    }
}

enum StepError {
    /// Too many calls in the step fell back to their fail-safe
    FailSafes { fail_safes: u32, calls: u32 },
    Other(anyhow::Error),
}

/// Agent-step engine backed by the generation service
pub struct AgentSimulation {
    generator: RetryingGenerator,
    prompts: PromptLibrary,
    action_site: CallSite<AgentAction, ActionHandler>,
    importance_site: CallSite<i64, IntegerInRange>,
    settings: SimulationSettings,
    step: u64,
    agents: Vec<AgentState>,
}

impl AgentSimulation {
    pub fn new(
        generator: RetryingGenerator,
        params: GenerationParams,
        settings: SimulationSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let prompts = PromptLibrary::new(
            settings
                .action_template
                .as_deref()
                .unwrap_or(DEFAULT_ACTION_TEMPLATE),
            settings
                .importance_template
                .as_deref()
                .unwrap_or(DEFAULT_IMPORTANCE_TEMPLATE),
        )?;

        let action_site = CallSite::new(
            "next_action",
            params.clone().with_max_output_size(params.max_output_size.max(60)),
            ActionHandler::new(&settings.locations),
            AgentAction::idle(&settings.locations[0]),
            settings.action_attempts,
        )
        .with_schema(
            SchemaDescriptor::new("next_action")
                .field("action", FieldKind::String)
                .field("location", FieldKind::String),
        );

        let importance_site = CallSite::new(
            "importance",
            params.with_max_output_size(3),
            IntegerInRange::new(1, 10),
            FAIL_SAFE_IMPORTANCE,
            settings.importance_attempts,
        );

        let agents = settings
            .agents
            .iter()
            .map(|spec| AgentState {
                name: spec.name.clone(),
                location: spec.location.clone(),
                action: IDLE_ACTION.to_string(),
                notes: Vec::new(),
            })
            .collect();

        Ok(Self {
            generator,
            prompts,
            action_site,
            importance_site,
            settings,
            step: 0,
            agents,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn generator(&self) -> &RetryingGenerator {
        &self.generator
    }

    /// Seed agents' memories from a history artifact
    pub fn apply_history(&mut self, entries: &[HistoryEntry]) -> Result<usize> {
        for entry in entries {
            let capacity = self.settings.memory_size;
            let step = self.step;
            let agent = self
                .agents
                .iter_mut()
                .find(|a| a.name == entry.agent)
                .ok_or_else(|| anyhow!("history names unknown agent '{}'", entry.agent))?;
            agent.remember(
                Note {
                    step,
                    text: entry.note.clone(),
                    importance: FAIL_SAFE_IMPORTANCE,
                },
                capacity,
            );
        }
        Ok(entries.len())
    }

    /// Compute every agent's next state without committing it
    async fn run_step(&self, step: u64) -> Result<Vec<AgentState>, StepError> {
        let mut next = self.agents.clone();
        let mut calls = 0u32;
        let mut fail_safes = 0u32;

        for agent in next.iter_mut() {
            let notes: Vec<String> = agent.notes.iter().map(|n| n.text.clone()).collect();
            let prompt = self
                .prompts
                .render_action(
                    step,
                    &agent.name,
                    &agent.location,
                    &agent.action,
                    &notes,
                    &self.settings.locations,
                )
                .map_err(StepError::Other)?;
            let decided = self
                .action_site
                .invoke_or(&self.generator, prompt, AgentAction::idle(&agent.location))
                .await;
            calls += 1;
            if decided.is_fail_safe() {
                fail_safes += 1;
            }
            let action = decided.into_value();

            let event = format!("{} is {} at the {}", agent.name, action.action, action.location);
            let prompt = self
                .prompts
                .render_importance(&agent.name, &event)
                .map_err(StepError::Other)?;
            let rated = self.importance_site.invoke(&self.generator, prompt).await;
            calls += 1;
            if rated.is_fail_safe() {
                fail_safes += 1;
            }

            trace!("Step {}: {}", step, event);
            agent.location = action.location;
            agent.action = action.action;
            agent.remember(
                Note {
                    step,
                    text: event,
                    importance: rated.into_value(),
                },
                self.settings.memory_size,
            );
        }

        if calls > 0 && f64::from(fail_safes) / f64::from(calls) > self.settings.max_fail_safe_ratio
        {
            return Err(StepError::FailSafes { fail_safes, calls });
        }
        Ok(next)
    }
}

#[async_trait]
impl SimulationEngine for AgentSimulation {
    async fn advance(&mut self, from: u64, to: u64) -> Result<(), StepFailure> {
        if from != self.step {
            return Err(StepFailure::unclassified(
                0,
                format!("engine is at step {} but was asked to advance from {}", self.step, from),
            ));
        }

        for step in from..to {
            match self.run_step(step).await {
                Ok(agents) => {
                    self.agents = agents;
                    self.step = step + 1;
                }
                Err(StepError::FailSafes { fail_safes, calls }) => {
                    warn!(
                        "Step {}: {}/{} generation calls fell back to fail-safes",
                        step, fail_safes, calls
                    );
                    return Err(StepFailure::recoverable(
                        step - from,
                        format!(
                            "{} of {} generation calls returned fail-safes at step {}",
                            fail_safes, calls, step
                        ),
                    ));
                }
                Err(StepError::Other(e)) => {
                    return Err(StepFailure::unclassified(step - from, format!("{:#}", e)));
                }
            }
        }

        debug!("Advanced {} agents from step {} to {}", self.agents.len(), from, to);
        Ok(())
    }

    fn snapshot(&self) -> Result<EngineSnapshot> {
        Ok(EngineSnapshot {
            step: self.step,
            state: serde_json::to_value(&self.agents).context("Failed to serialize agents")?,
        })
    }

    fn restore(&mut self, snapshot: EngineSnapshot) -> Result<()> {
        let agents: Vec<AgentState> = serde_json::from_value(snapshot.state)
            .context("Snapshot does not hold agent state")?;
        if agents.is_empty() {
            bail!("Snapshot at step {} holds no agents", snapshot.step);
        }
        self.agents = agents;
        self.step = snapshot.step;
        debug!("Restored {} agents at step {}", self.agents.len(), self.step);
        Ok(())
    }
}
