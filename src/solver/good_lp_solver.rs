// good_lp adapter
// Translates the keyed sparse model into good_lp expressions and runs it on
// one of the good_lp backends compiled into this build

use crate::domain::{
    models::{Model, Solution as DomainSolution, SolverStatistics},
    solver_service::{Result, SolverError, SolverService},
    value_objects::{SolutionStatus as DomainSolutionStatus, VariableKind},
    Direction,
};
use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError,
    Solution as GoodLpSolutionTrait, SolverModel, Variable as GoodLpVariable,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// good_lp backend used by a [`GoodLpSolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpBackend {
    #[cfg(feature = "microlp")]
    Microlp,
    #[cfg(feature = "coin_cbc")]
    CoinCbc,
}

pub struct GoodLpSolver {
    backend: LpBackend,
}

impl GoodLpSolver {
    pub fn new(backend: LpBackend) -> Self {
        Self { backend }
    }

    #[cfg(feature = "microlp")]
    pub fn microlp() -> Self {
        Self::new(LpBackend::Microlp)
    }

    #[cfg(feature = "coin_cbc")]
    pub fn coin_cbc() -> Self {
        Self::new(LpBackend::CoinCbc)
    }
}

/// good_lp form of a model
struct Formulation {
    vars: ProblemVariables,
    objective: Expression,
    rows: Vec<Constraint>,
    columns: Vec<(String, GoodLpVariable)>,
}

fn formulate(model: &Model) -> Formulation {
    let mut vars = ProblemVariables::new();
    let mut columns = Vec::with_capacity(model.num_variables());

    // All variables are non-negative
    for name in model.variables.keys() {
        let definition = match model.kind_of(name) {
            VariableKind::Binary => variable().binary(),
            VariableKind::Integer => variable().integer().min(0),
            VariableKind::Continuous => variable().min(0),
        };
        columns.push((name.clone(), vars.add(definition)));
    }

    let mut objective: Expression = 0.0.into();
    let mut lhs: HashMap<&str, Expression> = model
        .constraints
        .keys()
        .map(|name| (name.as_str(), Expression::from(0.0)))
        .collect();

    for (name, var) in &columns {
        for (key, &coef) in &model.variables[name] {
            if coef == 0.0 {
                continue;
            }
            if key == &model.optimize {
                objective += coef * *var;
            } else if let Some(row) = lhs.get_mut(key.as_str()) {
                *row += coef * *var;
            }
        }
    }

    let mut rows = Vec::new();
    for (name, bound) in &model.constraints {
        let Some(expr) = lhs.remove(name.as_str()) else {
            continue;
        };
        if let Some(equal) = bound.equal {
            rows.push(constraint::eq(expr.clone(), equal));
        }
        if let Some(min) = bound.min {
            rows.push(constraint::geq(expr.clone(), min));
        }
        if let Some(max) = bound.max {
            rows.push(constraint::leq(expr, max));
        }
    }

    Formulation {
        vars,
        objective,
        rows,
        columns,
    }
}

fn run<M>(
    problem: M,
    rows: Vec<Constraint>,
    columns: &[(String, GoodLpVariable)],
) -> std::result::Result<Vec<f64>, ResolutionError>
where
    M: SolverModel<Error = ResolutionError>,
{
    let solved = rows.into_iter().fold(problem, |p, row| p.with(row)).solve()?;
    Ok(columns.iter().map(|(_, var)| solved.value(*var)).collect())
}

impl SolverService for GoodLpSolver {
    fn solve(&self, model: &Model) -> Result<DomainSolution> {
        // Validate first
        self.validate(model)?;

        let start_time = Instant::now();
        let Formulation {
            vars,
            objective,
            rows,
            columns,
        } = formulate(model);

        let unsolved = match model.direction {
            Direction::Min => vars.minimise(objective),
            Direction::Max => vars.maximise(objective),
        };

        let solution_result = match self.backend {
            #[cfg(feature = "microlp")]
            LpBackend::Microlp => run(
                unsolved.using(good_lp::solvers::microlp::microlp),
                rows,
                &columns,
            ),
            #[cfg(feature = "coin_cbc")]
            LpBackend::CoinCbc => run(
                unsolved.using(good_lp::solvers::coin_cbc::coin_cbc),
                rows,
                &columns,
            ),
        };

        let mut statistics = SolverStatistics::for_model(model);
        statistics.solve_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        match solution_result {
            Ok(values) => {
                let assignment: BTreeMap<String, f64> = columns
                    .iter()
                    .zip(values)
                    .map(|((name, _), value)| {
                        // strip solver round-off from integral columns
                        let value = if model.kind_of(name).is_integral() {
                            value.round()
                        } else {
                            value
                        };
                        (name.clone(), value)
                    })
                    .collect();

                let objective_value = model.evaluate_objective(&assignment);
                let mut solution = DomainSolution::optimal(objective_value, assignment)
                    .with_solver(self.name())
                    .with_statistics(statistics);
                solution.message = format!("Optimal solution found by {}", self.name());
                Ok(solution)
            }
            Err(ResolutionError::Infeasible) => Ok(DomainSolution::new(
                DomainSolutionStatus::Infeasible,
                "Model is infeasible: no solution satisfies all constraints",
            )
            .with_solver(self.name())
            .with_statistics(statistics)),
            Err(ResolutionError::Unbounded) => Ok(DomainSolution::new(
                DomainSolutionStatus::Unbounded,
                "Model is unbounded: objective can be improved infinitely",
            )
            .with_solver(self.name())
            .with_statistics(statistics)),
            Err(e) => Err(SolverError::ExecutionFailed(format!("{}: {}", self.name(), e))),
        }
    }

    fn name(&self) -> &str {
        match self.backend {
            #[cfg(feature = "microlp")]
            LpBackend::Microlp => "microlp",
            #[cfg(feature = "coin_cbc")]
            LpBackend::CoinCbc => "COIN-OR CBC",
        }
    }

    fn is_exact(&self) -> bool {
        true
    }
}
