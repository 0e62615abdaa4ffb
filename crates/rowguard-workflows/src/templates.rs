//! Workflow templates and executor lookup

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::{StepDefinition, StepType};
use crate::step::StepExecutor;

/// Builds the step sequence of a workflow type
pub type TemplateFactory = Arc<dyn Fn() -> Vec<StepDefinition> + Send + Sync>;

/// Supplies an executor for each template step
pub trait ExecutorProvider: Send + Sync {
    /// Executor for a step of a workflow type, if there is one
    fn executor_for(&self, workflow_type: &str, step: &StepDefinition) -> Option<Arc<dyn StepExecutor>>;
}

/// Provider that resolves executors by step id first, then by step type
#[derive(Default, Clone)]
pub struct ExecutorMap {
    by_step: HashMap<(String, String), Arc<dyn StepExecutor>>,
    by_type: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl ExecutorMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an executor for every step of a type
    pub fn with_type(mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) -> Self {
        self.by_type.insert(step_type, executor);
        self
    }

    /// Use an executor for one step of one workflow type
    pub fn with_step(
        mut self,
        workflow_type: impl Into<String>,
        step_id: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        self.by_step
            .insert((workflow_type.into(), step_id.into()), executor);
        self
    }
}

impl ExecutorProvider for ExecutorMap {
    fn executor_for(&self, workflow_type: &str, step: &StepDefinition) -> Option<Arc<dyn StepExecutor>> {
        self.by_step
            .get(&(workflow_type.to_string(), step.id.clone()))
            .or_else(|| self.by_type.get(&step.step_type))
            .cloned()
    }
}

/// Read-only lookup: understand the request, build the filter, show the rows
pub fn query_template() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new("understand", "Understand request", StepType::Understand)
            .with_description("Interpret what the user wants to see"),
        StepDefinition::new("filter", "Build filter", StepType::Filter)
            .with_description("Turn the request into conditions")
            .requires_confirmation(true),
        StepDefinition::new("preview", "Show results", StepType::Preview)
            .with_description("Run the query and list matching rows"),
    ]
}

/// Change existing rows
pub fn modify_template() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new("understand", "Understand request", StepType::Understand)
            .with_description("Interpret the requested change"),
        StepDefinition::new("filter", "Select rows", StepType::Filter)
            .with_description("Find the rows the change applies to")
            .requires_confirmation(true),
        StepDefinition::new("compare", "Compare values", StepType::Compare)
            .with_description("Show current and proposed values side by side"),
        StepDefinition::new("confirm", "Confirm change", StepType::Confirm)
            .with_description("Final go-ahead before data changes"),
        StepDefinition::new("execute", "Apply change", StepType::Execute)
            .with_description("Run the statement with a snapshot for undo"),
        StepDefinition::new("validate", "Validate", StepType::Validate)
            .with_description("Check the rows after the change")
            .skippable(true),
    ]
}

/// Insert new rows
pub fn generate_template() -> Vec<StepDefinition> {
    vec![
        StepDefinition::new("understand", "Understand request", StepType::Understand)
            .with_description("Interpret what should be created"),
        StepDefinition::new("preview", "Preview rows", StepType::Preview)
            .with_description("Show the rows that would be inserted")
            .requires_confirmation(true)
            .skippable(true),
        StepDefinition::new("confirm", "Confirm insert", StepType::Confirm)
            .with_description("Final go-ahead before data changes"),
        StepDefinition::new("execute", "Insert rows", StepType::Execute)
            .with_description("Run the insert and keep the generated keys for undo"),
        StepDefinition::new("validate", "Validate", StepType::Validate)
            .with_description("Check the inserted rows")
            .skippable(true),
    ]
}

/// Named step sequences
pub struct TemplateRegistry {
    templates: HashMap<String, TemplateFactory>,
}

impl TemplateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Registry holding `query`, `modify` and `generate`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("query", query_template);
        registry.register("modify", modify_template);
        registry.register("generate", generate_template);
        registry
    }

    /// Register or replace a template
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<StepDefinition> + Send + Sync + 'static,
    {
        self.templates.insert(name.into(), Arc::new(factory));
    }

    /// Whether a template exists
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the step sequence for a workflow type
    pub fn build(&self, name: &str) -> EngineResult<Vec<StepDefinition>> {
        self.templates
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownWorkflowType(name.to_string()))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
