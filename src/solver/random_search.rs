// Seeded multi-start random search
// Samples every variable independently, keeps the best sample that satisfies
// all bounds. No optimality guarantee: results are flagged approximate.

use crate::domain::{
    models::{Model, Solution, SolverStatistics},
    solver_service::{Result, SolverError, SolverService},
    value_objects::{SolutionStatus, VariableKind},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSearchConfig {
    pub trials: u32,
    pub seed: u64,
    /// Integers are drawn from `0..=integer_max`
    pub integer_max: u32,
    /// Continuous variables are drawn from `[0, continuous_max)`
    pub continuous_max: f64,
    pub tolerance: f64,
}

impl Default for RandomSearchConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            seed: 42,
            integer_max: 10,
            continuous_max: 1000.0,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RandomSearchSolver {
    config: RandomSearchConfig,
}

impl RandomSearchSolver {
    pub fn new(config: RandomSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RandomSearchConfig {
        &self.config
    }

    fn sample(&self, rng: &mut StdRng, kind: VariableKind) -> f64 {
        match kind {
            VariableKind::Binary => f64::from(rng.gen_range(0..=1u8)),
            VariableKind::Integer => f64::from(rng.gen_range(0..=self.config.integer_max)),
            VariableKind::Continuous if self.config.continuous_max > 0.0 => {
                rng.gen_range(0.0..self.config.continuous_max)
            }
            VariableKind::Continuous => 0.0,
        }
    }
}

impl SolverService for RandomSearchSolver {
    fn solve(&self, model: &Model) -> Result<Solution> {
        self.solve_cancellable(model, &CancellationToken::new())
    }

    fn solve_cancellable(&self, model: &Model, cancel: &CancellationToken) -> Result<Solution> {
        self.validate(model)?;

        let start_time = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let columns: Vec<(&String, VariableKind)> = model
            .variables
            .keys()
            .map(|name| (name, model.kind_of(name)))
            .collect();

        let mut best: Option<(f64, BTreeMap<String, f64>)> = None;
        for _ in 0..self.config.trials {
            if cancel.is_cancelled() {
                return Err(SolverError::Cancelled);
            }
            let sample: BTreeMap<String, f64> = columns
                .iter()
                .map(|(name, kind)| ((*name).clone(), self.sample(&mut rng, *kind)))
                .collect();
            if model.max_violation(&sample) > self.config.tolerance {
                continue;
            }
            let value = model.evaluate_objective(&sample);
            let improves = best
                .as_ref()
                .map_or(true, |(incumbent, _)| model.direction.improves(value, *incumbent));
            if improves {
                best = Some((value, sample));
            }
        }

        let mut statistics = SolverStatistics::for_model(model);
        statistics.solve_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        statistics.trials_evaluated = self.config.trials;

        let solution = match best {
            Some((value, assignment)) => Solution::approximate(value, assignment),
            None => {
                let mut none = Solution::new(
                    SolutionStatus::Infeasible,
                    format!(
                        "No feasible sample found in {} trials",
                        self.config.trials
                    ),
                );
                none.approximate = true;
                none
            }
        };
        Ok(solution.with_solver(self.name()).with_statistics(statistics))
    }

    fn name(&self) -> &str {
        "Random Search"
    }

    fn is_exact(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bound, Direction, ModelBuilder};

    fn pick_one() -> Model {
        let mut builder = ModelBuilder::new("value");
        for (item, value) in [("a", 3.0), ("b", 5.0)] {
            builder.add_variable(item, VariableKind::Binary);
            builder.set_objective_coef(item, value);
            builder.set_constraint_coef(item, "pick", 1.0);
        }
        builder.add_constraint("pick", Bound::at_most(1.0));
        builder.build_model(Direction::Max)
    }

    #[test]
    fn finds_best_feasible_sample() {
        let solution = RandomSearchSolver::default().solve(&pick_one()).unwrap();
        assert_eq!(solution.status, SolutionStatus::Feasible);
        assert!(solution.approximate);
        assert_eq!(solution.objective_value, Some(5.0));
        assert!(solution.is_active("b"));
        assert_eq!(solution.statistics.trials_evaluated, 100);
    }

    #[test]
    fn same_seed_gives_same_result() {
        let mut builder = ModelBuilder::new("cost");
        builder.add_variable("x", VariableKind::Continuous);
        builder.add_variable("n", VariableKind::Integer);
        builder.set_objective_coef("x", 1.0);
        builder.set_objective_coef("n", 2.0);
        builder.set_constraint_coef("x", "floor", 1.0);
        builder.set_constraint_coef("n", "floor", 10.0);
        builder.add_constraint("floor", Bound::at_least(50.0));
        let model = builder.build_model(Direction::Min);

        let solver = RandomSearchSolver::default();
        let first = solver.solve(&model).unwrap();
        let second = solver.solve(&model).unwrap();
        assert!(first.is_feasible());
        assert_eq!(first.assignment, second.assignment);
        assert!(model.max_violation(&first.assignment) <= 1e-6);
    }

    #[test]
    fn unsatisfiable_model_reports_infeasible() {
        let mut builder = ModelBuilder::new("cost");
        builder.add_variable("x", VariableKind::Binary);
        builder.set_objective_coef("x", 1.0);
        builder.set_constraint_coef("x", "two", 1.0);
        builder.add_constraint("two", Bound::exactly(2.0));

        let solution = RandomSearchSolver::default()
            .solve(&builder.build_model(Direction::Min))
            .unwrap();
        assert_eq!(solution.status, SolutionStatus::Infeasible);
        assert!(!solution.is_feasible());
    }

    #[test]
    fn honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = RandomSearchSolver::default()
            .solve_cancellable(&pick_one(), &cancel)
            .unwrap_err();
        assert!(matches!(err, SolverError::Cancelled));
    }
}
