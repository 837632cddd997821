// Incremental assembly of sparse MIP models

use super::models::{Bound, Model};
use super::value_objects::{Direction, VariableKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Constraint coefficient updates smaller than this are dropped
pub const COEFFICIENT_EPSILON: f64 = 1e-12;

/// Builds a [`Model`] one variable, bound and coefficient at a time.
///
/// Constraint coefficients accumulate, objective coefficients overwrite.
/// Registering a constraint name twice replaces its bound (last write wins);
/// the replaced bound is handed back to the caller.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    objective_key: String,
    variables: BTreeMap<String, BTreeMap<String, f64>>,
    constraints: BTreeMap<String, Bound>,
    binaries: BTreeSet<String>,
    integers: BTreeSet<String>,
}

impl ModelBuilder {
    pub fn new(objective_key: impl Into<String>) -> Self {
        Self {
            objective_key: objective_key.into(),
            variables: BTreeMap::new(),
            constraints: BTreeMap::new(),
            binaries: BTreeSet::new(),
            integers: BTreeSet::new(),
        }
    }

    pub fn objective_key(&self) -> &str {
        &self.objective_key
    }

    /// Register a decision variable and tag it by kind
    pub fn add_variable(&mut self, name: impl Into<String>, kind: VariableKind) -> &mut Self {
        let name = name.into();
        match kind {
            VariableKind::Binary => {
                self.integers.remove(&name);
                self.binaries.insert(name.clone());
            }
            VariableKind::Integer => {
                self.binaries.remove(&name);
                self.integers.insert(name.clone());
            }
            VariableKind::Continuous => {
                self.binaries.remove(&name);
                self.integers.remove(&name);
            }
        }
        self.variables.entry(name).or_default();
        self
    }

    /// Register a constraint bound, returning the bound it replaced
    pub fn add_constraint(&mut self, name: impl Into<String>, bound: Bound) -> Option<Bound> {
        let name = name.into();
        let previous = self.constraints.insert(name.clone(), bound);
        if let Some(previous) = previous {
            tracing::debug!(constraint = %name, ?previous, ?bound, "constraint bound redefined");
        }
        previous
    }

    /// Set (overwrite) a variable's objective coefficient
    pub fn set_objective_coef(&mut self, variable: &str, value: f64) -> &mut Self {
        let key = self.objective_key.clone();
        self.set_coefficient(variable, &key, value)
    }

    /// Set (overwrite) a variable's coefficient for an arbitrary key
    pub fn set_coefficient(&mut self, variable: &str, key: &str, value: f64) -> &mut Self {
        self.variables
            .entry(variable.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    /// Accumulate `delta` into a variable's coefficient for a constraint
    pub fn set_constraint_coef(&mut self, variable: &str, constraint: &str, delta: f64) -> &mut Self {
        if delta.abs() < COEFFICIENT_EPSILON {
            return self;
        }
        *self
            .variables
            .entry(variable.to_string())
            .or_default()
            .entry(constraint.to_string())
            .or_insert(0.0) += delta;
        self
    }

    pub fn has_constraint(&self, name: &str) -> bool {
        self.constraints.contains_key(name)
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Snapshot the current state into a model
    pub fn build_model(&self, direction: Direction) -> Model {
        Model {
            optimize: self.objective_key.clone(),
            direction,
            constraints: self.constraints.clone(),
            variables: self.variables.clone(),
            binaries: self.binaries.clone(),
            integers: self.integers.clone(),
        }
    }
}

/// Outcome of [`validate_model`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check a model for structural problems
pub fn validate_model(model: &Model) -> ValidationReport {
    let mut errors = Vec::new();

    if model.variables.is_empty() {
        errors.push("Model has no variables".to_string());
    }

    let carries_objective = model
        .variables
        .values()
        .any(|coefs| coefs.contains_key(&model.optimize));
    if !carries_objective {
        errors.push(format!(
            "Objective key '{}' is absent from every variable",
            model.optimize
        ));
    }

    let mut referenced: BTreeSet<&str> = BTreeSet::new();
    for (name, coefs) in &model.variables {
        for (key, coef) in coefs {
            if !coef.is_finite() {
                errors.push(format!(
                    "Variable '{}' has a non-finite coefficient for '{}'",
                    name, key
                ));
            }
            if key == &model.optimize {
                continue;
            }
            if model.constraints.contains_key(key) {
                referenced.insert(key.as_str());
            } else {
                errors.push(format!(
                    "Variable '{}' references undefined constraint '{}'",
                    name, key
                ));
            }
        }
    }

    for (name, bound) in &model.constraints {
        if !referenced.contains(name.as_str()) {
            errors.push(format!("Constraint '{}' has no referencing variable", name));
        }
        if bound.values().any(|v| !v.is_finite()) {
            errors.push(format!("Constraint '{}' has a non-finite bound", name));
        }
        if let (Some(min), Some(max)) = (bound.min, bound.max) {
            if min > max {
                errors.push(format!(
                    "Constraint '{}' has min ({}) > max ({})",
                    name, min, max
                ));
            }
        }
    }

    for tagged in model.binaries.iter().chain(model.integers.iter()) {
        if !model.variables.contains_key(tagged) {
            errors.push(format!(
                "Variable '{}' is tagged integral but never declared",
                tagged
            ));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
