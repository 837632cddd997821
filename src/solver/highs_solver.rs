// HiGHS Solver Adapter
// Translates the keyed sparse model into a HiGHS row problem

use crate::domain::{
    models::{Model, Solution as DomainSolution, SolverStatistics},
    solver_service::{Result, SolverError, SolverService},
    value_objects::{Direction, SolutionStatus as DomainSolutionStatus, VariableKind},
};
use highs::{Col, HighsModelStatus, RowProblem, Sense};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

pub struct HighsSolver;

impl HighsSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HighsSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverService for HighsSolver {
    fn solve(&self, model: &Model) -> Result<DomainSolution> {
        // Validate first
        self.validate(model)?;

        let start_time = Instant::now();
        let mut pb = RowProblem::default();
        let mut cols: Vec<(&str, Col)> = Vec::with_capacity(model.num_variables());

        // Add variables, all non-negative
        for name in model.variables.keys() {
            let obj_coeff = model.objective_coefficient(name);
            let col = match model.kind_of(name) {
                VariableKind::Binary => pb.add_integer_column(obj_coeff, 0.0..=1.0),
                VariableKind::Integer => pb.add_integer_column(obj_coeff, 0.0..),
                VariableKind::Continuous => pb.add_column(obj_coeff, 0.0..),
            };
            cols.push((name.as_str(), col));
        }

        // Gather row terms
        let mut terms: HashMap<&str, Vec<(Col, f64)>> = HashMap::new();
        for (name, col) in &cols {
            for (key, &coeff) in &model.variables[*name] {
                if coeff != 0.0 && key != &model.optimize {
                    terms.entry(key.as_str()).or_default().push((*col, coeff));
                }
            }
        }

        // Add constraints
        for (name, bound) in &model.constraints {
            let row = terms.remove(name.as_str()).unwrap_or_default();
            if let Some(equal) = bound.equal {
                pb.add_row(equal..=equal, &row);
            }
            match (bound.min, bound.max) {
                (Some(min), Some(max)) => {
                    pb.add_row(min..=max, &row);
                }
                (Some(min), None) => {
                    pb.add_row(min.., &row);
                }
                (None, Some(max)) => {
                    pb.add_row(..=max, &row);
                }
                (None, None) => {}
            }
        }

        // Solve the problem
        let sense = match model.direction {
            Direction::Max => Sense::Maximise,
            Direction::Min => Sense::Minimise,
        };

        let solved = pb.optimise(sense).solve();
        let mut statistics = SolverStatistics::for_model(model);
        statistics.solve_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        // Process result
        match solved.status() {
            HighsModelStatus::Optimal => {
                let solution_data = solved.get_solution();
                let assignment: BTreeMap<String, f64> = cols
                    .iter()
                    .zip(solution_data.columns().iter())
                    .map(|((name, _), &value)| {
                        let value = if model.kind_of(name).is_integral() {
                            value.round()
                        } else {
                            value
                        };
                        (name.to_string(), value)
                    })
                    .collect();

                let objective_value = model.evaluate_objective(&assignment);
                let mut solution = DomainSolution::optimal(objective_value, assignment)
                    .with_solver(self.name())
                    .with_statistics(statistics);
                solution.message = "Optimal solution found by HiGHS".to_string();
                Ok(solution)
            }
            HighsModelStatus::Infeasible => Ok(DomainSolution::new(
                DomainSolutionStatus::Infeasible,
                "Model is infeasible: no solution satisfies all constraints",
            )
            .with_solver(self.name())
            .with_statistics(statistics)),
            HighsModelStatus::Unbounded | HighsModelStatus::UnboundedOrInfeasible => {
                Ok(DomainSolution::new(
                    DomainSolutionStatus::Unbounded,
                    "Model is unbounded: objective can be improved infinitely",
                )
                .with_solver(self.name())
                .with_statistics(statistics))
            }
            status => Err(SolverError::ExecutionFailed(format!(
                "HiGHS solver returned status: {:?}",
                status
            ))),
        }
    }

    fn name(&self) -> &str {
        "HiGHS"
    }

    fn is_exact(&self) -> bool {
        true
    }
}
