use super::value_objects::{Direction, SolutionStatus, VariableKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bound on a constraint row. Any combination of `min`, `max` and `equal`
/// may be set; an empty bound is a free row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal: Option<f64>,
}

impl Bound {
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            ..Self::default()
        }
    }

    pub fn at_most(max: f64) -> Self {
        Self {
            max: Some(max),
            ..Self::default()
        }
    }

    pub fn exactly(value: f64) -> Self {
        Self {
            equal: Some(value),
            ..Self::default()
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            equal: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.equal.is_none()
    }

    /// Amount by which `activity` violates this bound (0 when satisfied)
    pub fn violation(&self, activity: f64) -> f64 {
        let mut worst: f64 = 0.0;
        if let Some(min) = self.min {
            worst = worst.max(min - activity);
        }
        if let Some(max) = self.max {
            worst = worst.max(activity - max);
        }
        if let Some(equal) = self.equal {
            worst = worst.max((activity - equal).abs());
        }
        worst
    }

    pub fn is_satisfied(&self, activity: f64, tolerance: f64) -> bool {
        self.violation(activity) <= tolerance
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = f64> {
        [self.min, self.max, self.equal].into_iter().flatten()
    }
}

/// Sparse MIP model in the interchange shape consumed by the solvers.
///
/// Every variable maps keys to coefficients; a key is either the objective
/// key (`optimize`) or the name of a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub optimize: String,
    #[serde(rename = "opType")]
    pub direction: Direction,
    #[serde(default)]
    pub constraints: BTreeMap<String, Bound>,
    #[serde(default)]
    pub variables: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default, with = "flag_set", skip_serializing_if = "BTreeSet::is_empty")]
    pub binaries: BTreeSet<String>,
    #[serde(
        rename = "ints",
        default,
        with = "flag_set",
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub integers: BTreeSet<String>,
}

impl Model {
    pub fn kind_of(&self, variable: &str) -> VariableKind {
        if self.binaries.contains(variable) {
            VariableKind::Binary
        } else if self.integers.contains(variable) {
            VariableKind::Integer
        } else {
            VariableKind::Continuous
        }
    }

    pub fn objective_coefficient(&self, variable: &str) -> f64 {
        self.variables
            .get(variable)
            .and_then(|coefs| coefs.get(&self.optimize))
            .copied()
            .unwrap_or(0.0)
    }

    /// Objective value of an assignment; unassigned variables count as zero
    pub fn evaluate_objective(&self, assignment: &BTreeMap<String, f64>) -> f64 {
        self.variables
            .iter()
            .filter_map(|(name, coefs)| {
                let coef = coefs.get(&self.optimize)?;
                Some(coef * assignment.get(name).copied().unwrap_or(0.0))
            })
            .sum()
    }

    /// Left-hand side of every constraint row for an assignment
    pub fn row_activities(&self, assignment: &BTreeMap<String, f64>) -> BTreeMap<&str, f64> {
        let mut rows: BTreeMap<&str, f64> =
            self.constraints.keys().map(|name| (name.as_str(), 0.0)).collect();
        for (name, coefs) in &self.variables {
            let value = assignment.get(name).copied().unwrap_or(0.0);
            if value == 0.0 {
                continue;
            }
            for (key, coef) in coefs {
                if let Some(activity) = rows.get_mut(key.as_str()) {
                    *activity += coef * value;
                }
            }
        }
        rows
    }

    /// Largest bound violation of an assignment across all rows
    pub fn max_violation(&self, assignment: &BTreeMap<String, f64>) -> f64 {
        self.row_activities(assignment)
            .into_iter()
            .filter_map(|(name, activity)| {
                self.constraints.get(name).map(|b| b.violation(activity))
            })
            .fold(0.0, f64::max)
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_integer_variables(&self) -> usize {
        self.variables
            .keys()
            .filter(|name| self.kind_of(name).is_integral())
            .count()
    }

    pub fn is_mixed_integer(&self) -> bool {
        self.num_integer_variables() > 0
    }
}

/// `{name: 1}` maps in the interchange format, sets in memory
mod flag_set {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    pub fn serialize<S: Serializer>(set: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
        set.iter()
            .map(|name| (name.as_str(), 1u8))
            .collect::<BTreeMap<_, _>>()
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
        let flags = BTreeMap::<String, f64>::deserialize(d)?;
        Ok(flags
            .into_iter()
            .filter(|(_, flag)| *flag != 0.0)
            .map(|(name, _)| name)
            .collect())
    }
}

/// Statistics about the solve process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverStatistics {
    pub solve_time_ms: f64,
    pub num_variables: u32,
    pub num_constraints: u32,
    pub num_integer_vars: u32,
    pub num_binary_vars: u32,
    /// Samples evaluated by the heuristic search (0 for exact solvers)
    pub trials_evaluated: u32,
}

impl SolverStatistics {
    pub fn for_model(model: &Model) -> Self {
        Self {
            solve_time_ms: 0.0,
            num_variables: model.num_variables() as u32,
            num_constraints: model.num_constraints() as u32,
            num_integer_vars: model.integers.len() as u32,
            num_binary_vars: model.binaries.len() as u32,
            trials_evaluated: 0,
        }
    }
}

/// Solution to a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub status: SolutionStatus,
    pub objective_value: Option<f64>,
    pub assignment: BTreeMap<String, f64>,
    pub message: String,
    /// Name of the backend that produced the solution
    pub solver: String,
    pub statistics: SolverStatistics,
    /// Set when the result came from the heuristic search and carries no
    /// optimality guarantee
    pub approximate: bool,
}

impl Solution {
    pub fn new(status: SolutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            objective_value: None,
            assignment: BTreeMap::new(),
            message: message.into(),
            solver: String::new(),
            statistics: SolverStatistics::default(),
            approximate: false,
        }
    }

    pub fn optimal(value: f64, assignment: BTreeMap<String, f64>) -> Self {
        Self {
            status: SolutionStatus::Optimal,
            objective_value: Some(value),
            assignment,
            message: "Optimal solution found".to_string(),
            solver: String::new(),
            statistics: SolverStatistics::default(),
            approximate: false,
        }
    }

    pub fn approximate(value: f64, assignment: BTreeMap<String, f64>) -> Self {
        Self {
            status: SolutionStatus::Feasible,
            objective_value: Some(value),
            assignment,
            message: "Feasible solution found by heuristic search".to_string(),
            solver: String::new(),
            statistics: SolverStatistics::default(),
            approximate: true,
        }
    }

    pub fn with_solver(mut self, solver: impl Into<String>) -> Self {
        self.solver = solver.into();
        self
    }

    pub fn with_statistics(mut self, statistics: SolverStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn is_feasible(&self) -> bool {
        matches!(
            self.status,
            SolutionStatus::Optimal | SolutionStatus::Feasible
        )
    }

    /// Value of a variable; absent variables are zero
    pub fn value(&self, variable: &str) -> f64 {
        self.assignment.get(variable).copied().unwrap_or(0.0)
    }

    /// True for binaries set to one (tolerant of solver round-off)
    pub fn is_active(&self, variable: &str) -> bool {
        self.value(variable) > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> Model {
        let json = r#"{
            "optimize": "cost",
            "opType": "min",
            "constraints": { "demand": { "min": 4 }, "pick": { "equal": 1 } },
            "variables": {
                "x": { "cost": 2, "demand": 1 },
                "y": { "cost": 3, "demand": 2, "pick": 1 }
            },
            "binaries": { "y": 1 },
            "ints": { "x": 1 }
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn interchange_format_parses() {
        let model = sample_model();
        assert_eq!(model.direction, Direction::Min);
        assert_eq!(model.kind_of("y"), VariableKind::Binary);
        assert_eq!(model.kind_of("x"), VariableKind::Integer);
        assert_eq!(model.constraints["pick"], Bound::exactly(1.0));

        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["opType"], "min");
        assert_eq!(json["ints"]["x"], 1);
    }

    #[test]
    fn violation_measures_each_bound() {
        let model = sample_model();
        let assignment: BTreeMap<String, f64> =
            [("x".to_string(), 2.0), ("y".to_string(), 1.0)].into();
        assert_eq!(model.evaluate_objective(&assignment), 7.0);
        assert_eq!(model.max_violation(&assignment), 0.0);

        let short: BTreeMap<String, f64> = [("x".to_string(), 1.0)].into();
        // demand row is 3 short, pick row is 1 short
        assert_eq!(model.max_violation(&short), 3.0);
    }

    #[test]
    fn free_bound_is_always_satisfied() {
        let bound = Bound::default();
        assert!(bound.is_free());
        assert!(bound.is_satisfied(1e9, 0.0));
        assert!(!Bound::between(1.0, 2.0).is_satisfied(2.5, 1e-6));
    }
}
