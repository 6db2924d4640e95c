//! Analysis workflow definition and execution plan.
//!
//! The workflow names the agents (one per analysis stage) and what each
//! depends on. [`ExecutionPlan`] turns that into groups: every agent in a
//! group has all of its dependencies satisfied by earlier groups, so a group
//! can run concurrently.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::annotate::Stage;
use crate::{Error, Result};

pub const WORKFLOW_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub stage: Stage,
    #[serde(default)]
    pub depends_on: Vec<Stage>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            stage,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.depends_on.extend(stages);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWorkflow {
    pub name: String,
    pub version: String,
    pub description: String,
    pub agents: Vec<AgentDefinition>,
}

impl AnalysisWorkflow {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: WORKFLOW_VERSION.to_string(),
            description: description.into(),
            agents: Vec::new(),
        }
    }

    /// Position, signal and industry analysis over the batch, then an
    /// advisor that reads all three.
    pub fn standard() -> Self {
        Self::new(
            "Crypto Investment Analysis Workflow",
            "Multi-agent analysis of an address's transaction history",
        )
        .with_agent(AgentDefinition::new(
            "PositionAgent",
            "Assesses position pattern and investment strategy",
            Stage::Position,
        ))
        .with_agent(AgentDefinition::new(
            "SignalAgent",
            "Identifies market signals and trade timing",
            Stage::Signal,
        ))
        .with_agent(AgentDefinition::new(
            "IndustryAgent",
            "Identifies sectors and ecosystems involved",
            Stage::Industry,
        ))
        .with_agent(
            AgentDefinition::new(
                "AdvisorAgent",
                "Combines the other analyses into a recommendation",
                Stage::Advisor,
            )
            .depends_on([Stage::Position, Stage::Signal, Stage::Industry]),
        )
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agent(&self, stage: Stage) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.stage == stage)
    }

    /// Stages in dependency order. Ties keep declaration order.
    pub fn execution_order(&self) -> Result<Vec<Stage>> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.stage) {
                return Err(Error::Workflow(format!(
                    "stage '{}' is defined more than once",
                    agent.stage
                )));
            }
        }

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        for agent in &self.agents {
            self.visit(agent.stage, &mut visited, &mut in_progress, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        stage: Stage,
        visited: &mut HashSet<Stage>,
        in_progress: &mut HashSet<Stage>,
        order: &mut Vec<Stage>,
    ) -> Result<()> {
        if visited.contains(&stage) {
            return Ok(());
        }
        if !in_progress.insert(stage) {
            return Err(Error::Workflow(format!(
                "circular dependency detected at stage '{}'",
                stage
            )));
        }

        let agent = self
            .agent(stage)
            .ok_or_else(|| Error::Workflow(format!("unknown dependency '{}'", stage)))?;
        for dep in &agent.depends_on {
            self.visit(*dep, visited, in_progress, order)?;
        }

        in_progress.remove(&stage);
        visited.insert(stage);
        order.push(stage);
        Ok(())
    }

    /// Write the workflow description as pretty JSON.
    pub fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("workflow configuration saved to {}", path.display());
        Ok(())
    }
}

impl Default for AnalysisWorkflow {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Stages in execution order.
    pub order: Vec<Stage>,
    /// Stages grouped by dependency level.
    pub parallel_groups: Vec<Vec<Stage>>,
}

impl ExecutionPlan {
    /// A stage's level is one more than the highest level among its
    /// dependencies; stages without dependencies are level 0.
    pub fn from_workflow(workflow: &AnalysisWorkflow) -> Result<Self> {
        let order = workflow.execution_order()?;

        let mut stage_level: HashMap<Stage, usize> = HashMap::new();
        let mut levels: Vec<Vec<Stage>> = Vec::new();

        for stage in &order {
            let agent = workflow
                .agent(*stage)
                .ok_or_else(|| Error::Workflow(format!("stage '{}' not found in workflow", stage)))?;

            let level = agent
                .depends_on
                .iter()
                .map(|dep| stage_level.get(dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);

            stage_level.insert(*stage, level);
            while levels.len() <= level {
                levels.push(Vec::new());
            }
            levels[level].push(*stage);
        }

        Ok(Self {
            order,
            parallel_groups: levels,
        })
    }
}
