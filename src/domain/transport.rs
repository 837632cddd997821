// Facility-location and demand-assignment optimization
//
// Every destination is served by exactly one open facility. The model
// trades fixed facility cost and per-unit freight cost against a penalty
// for assignments beyond the service distance, subject to facility count
// bounds, mandatory sites, capacities and an aggregate service level.

use super::error::{PlanningError, PlanningResult};
use super::geo::CostMatrix;
use super::model_builder::ModelBuilder;
use super::models::{Bound, Model, Solution};
use super::solver_service::SolverService;
use super::value_objects::{Direction, VariableKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OBJECTIVE_KEY: &str = "cost";
const FACILITY_COUNT: &str = "facility_count";
const SERVICE_LEVEL: &str = "service_level";
/// Penalty per mile of excess distance per unit of demand
const DISTANCE_PENALTY: f64 = 10.0;

/// Service and capacity settings of a transport scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(alias = "required_facilities")]
    pub min_facilities: u32,
    pub max_facilities: u32,
    pub mandatory_facilities: Vec<String>,
    pub facility_capacity: BTreeMap<String, f64>,
    pub default_capacity: f64,
    pub fixed_facility_cost: BTreeMap<String, f64>,
    pub default_fixed_cost: f64,
    /// Share of demand that must lie within `max_distance_miles`
    pub service_level: f64,
    pub max_distance_miles: f64,
    pub cost_weight: f64,
    pub service_weight: f64,
    /// Demand assumed for destinations without an explicit figure
    pub default_demand: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            min_facilities: 1,
            max_facilities: 3,
            mandatory_facilities: Vec::new(),
            facility_capacity: BTreeMap::new(),
            default_capacity: 1_000_000.0,
            fixed_facility_cost: BTreeMap::new(),
            default_fixed_cost: 0.0,
            service_level: 0.95,
            max_distance_miles: 1000.0,
            cost_weight: 0.6,
            service_weight: 0.4,
            default_demand: 1.0,
        }
    }
}

impl TransportConfig {
    pub fn capacity_of(&self, facility: &str) -> f64 {
        self.facility_capacity
            .get(facility)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    pub fn fixed_cost_of(&self, facility: &str) -> f64 {
        self.fixed_facility_cost
            .get(facility)
            .copied()
            .unwrap_or(self.default_fixed_cost)
    }
}

/// One destination's assignment in the solved network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentMetrics {
    pub destination: String,
    pub facility: String,
    pub demand: f64,
    pub distance_miles: f64,
    pub unit_cost: f64,
    pub transport_cost: f64,
    pub within_service_distance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityMetrics {
    pub facility: String,
    pub destinations_served: usize,
    pub assigned_demand: f64,
    pub capacity: f64,
    pub utilization: f64,
    /// Demand-weighted average distance
    pub average_distance_miles: f64,
    pub transport_cost: f64,
    pub cost_per_unit: f64,
    pub fixed_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub open_facilities: usize,
    pub total_demand: f64,
    pub demand_within_service_distance: f64,
    pub service_level_achievement: f64,
    pub service_level_target: f64,
    pub meets_service_level: bool,
    pub weighted_average_distance_miles: f64,
    /// Assigned demand over the capacity of all open facilities
    pub network_utilization: f64,
    pub average_facility_utilization: f64,
    pub transport_cost: f64,
    pub fixed_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportPlan {
    pub open_facilities: Vec<String>,
    pub assignments: Vec<AssignmentMetrics>,
    pub facilities: Vec<FacilityMetrics>,
    pub network: NetworkMetrics,
    pub objective_value: f64,
    pub solver: String,
    pub approximate: bool,
}

fn open_var(i: usize) -> String {
    format!("open_{}", i)
}

fn assign_var(i: usize, j: usize) -> String {
    format!("assign_{}_{}", i, j)
}

/// Chooses open facilities and destination assignments
pub struct TransportOptimizer<'a> {
    solver: &'a dyn SolverService,
}

impl<'a> TransportOptimizer<'a> {
    pub fn new(solver: &'a dyn SolverService) -> Self {
        Self { solver }
    }

    /// Demand per destination, in matrix column order
    pub fn resolve_demand(
        matrix: &CostMatrix,
        demand: Option<&BTreeMap<String, f64>>,
        config: &TransportConfig,
    ) -> Vec<f64> {
        matrix
            .destinations
            .iter()
            .map(|d| {
                demand
                    .and_then(|m| m.get(d))
                    .copied()
                    .unwrap_or(config.default_demand)
            })
            .collect()
    }

    /// Matrix indices of the mandatory facilities, repeated names collapsed
    fn mandatory_indices(
        matrix: &CostMatrix,
        config: &TransportConfig,
    ) -> PlanningResult<BTreeSet<usize>> {
        config
            .mandatory_facilities
            .iter()
            .map(|name| {
                matrix.facility_index(name).ok_or_else(|| {
                    PlanningError::invalid(format!(
                        "mandatory facility '{}' is not a located candidate",
                        name
                    ))
                })
            })
            .collect()
    }

    fn validate(matrix: &CostMatrix, demand: &[f64], config: &TransportConfig) -> PlanningResult<()> {
        let candidates = matrix.num_facilities() as u32;
        if matrix.num_destinations() == 0 {
            return Err(PlanningError::invalid("no destinations to serve"));
        }
        if config.min_facilities > config.max_facilities {
            return Err(PlanningError::invalid(format!(
                "min facilities ({}) exceeds max facilities ({})",
                config.min_facilities, config.max_facilities
            )));
        }
        if config.min_facilities > candidates {
            return Err(PlanningError::invalid(format!(
                "min facilities ({}) exceeds the {} located candidates",
                config.min_facilities, candidates
            )));
        }
        let mandatory = Self::mandatory_indices(matrix, config)?;
        if mandatory.len() as u32 > config.max_facilities {
            return Err(PlanningError::invalid(format!(
                "{} mandatory facilities exceed max facilities ({})",
                mandatory.len(),
                config.max_facilities
            )));
        }
        if demand.iter().any(|d| *d < 0.0 || !d.is_finite()) {
            return Err(PlanningError::invalid("destination demand must be non-negative"));
        }
        if config.cost_weight < 0.0 || config.service_weight < 0.0 {
            return Err(PlanningError::invalid("objective weights must be non-negative"));
        }
        if !(0.0..=1.0).contains(&config.service_level) {
            return Err(PlanningError::invalid("service level must lie in [0, 1]"));
        }
        Ok(())
    }

    /// Formulate the facility-location model
    pub fn build_model(
        &self,
        matrix: &CostMatrix,
        demand: &[f64],
        config: &TransportConfig,
    ) -> PlanningResult<Model> {
        Self::validate(matrix, demand, config)?;
        let mut builder = ModelBuilder::new(OBJECTIVE_KEY);
        let total_demand: f64 = demand.iter().sum();
        let mut service_terms = 0usize;

        for (i, facility) in matrix.facilities.iter().enumerate() {
            let open = open_var(i);
            builder.add_variable(&open, VariableKind::Binary);
            builder.set_objective_coef(&open, config.cost_weight * config.fixed_cost_of(facility));
            builder.set_constraint_coef(&open, FACILITY_COUNT, 1.0);

            // sum_j demand_j * assign_ij - capacity_i * open_i <= 0
            let capacity = format!("capacity_{}", i);
            builder.set_constraint_coef(&open, &capacity, -config.capacity_of(facility));
            builder.add_constraint(capacity.clone(), Bound::at_most(0.0));

            for (j, d) in demand.iter().enumerate() {
                let assign = assign_var(i, j);
                let distance = matrix.distance(i, j);
                builder.add_variable(&assign, VariableKind::Binary);

                let excess = (distance - config.max_distance_miles).max(0.0);
                builder.set_objective_coef(
                    &assign,
                    config.cost_weight * matrix.cost(i, j) * d
                        + config.service_weight * DISTANCE_PENALTY * excess * d,
                );

                let serve = format!("serve_{}", j);
                builder.set_constraint_coef(&assign, &serve, 1.0);

                // assign_ij <= open_i
                let link = format!("link_{}_{}", i, j);
                builder.set_constraint_coef(&assign, &link, 1.0);
                builder.set_constraint_coef(&open, &link, -1.0);
                builder.add_constraint(link, Bound::at_most(0.0));

                builder.set_constraint_coef(&assign, &capacity, *d);

                if distance <= config.max_distance_miles && *d > 0.0 {
                    builder.set_constraint_coef(&assign, SERVICE_LEVEL, *d);
                    service_terms += 1;
                }
            }
        }

        for j in 0..matrix.num_destinations() {
            builder.add_constraint(format!("serve_{}", j), Bound::exactly(1.0));
        }
        builder.add_constraint(
            FACILITY_COUNT,
            Bound::between(config.min_facilities as f64, config.max_facilities as f64),
        );
        for i in Self::mandatory_indices(matrix, config)? {
            let name = format!("mandatory_{}", i);
            builder.set_constraint_coef(&open_var(i), &name, 1.0);
            builder.add_constraint(name, Bound::exactly(1.0));
        }

        let required_within = config.service_level * total_demand;
        if config.service_level > 0.0 && total_demand > 0.0 {
            if service_terms == 0 {
                warn!(
                    facilities = matrix.num_facilities(),
                    destinations = matrix.num_destinations(),
                    max_distance_miles = config.max_distance_miles,
                    "no facility lies within the service distance of any destination"
                );
                return Err(PlanningError::Infeasible(format!(
                    "no facility/destination pair lies within {} miles",
                    config.max_distance_miles
                )));
            }
            builder.add_constraint(SERVICE_LEVEL, Bound::at_least(required_within));
        }

        Ok(builder.build_model(Direction::Min))
    }

    pub fn optimize(
        &self,
        matrix: &CostMatrix,
        demand: Option<&BTreeMap<String, f64>>,
        config: &TransportConfig,
        cancel: &CancellationToken,
    ) -> PlanningResult<TransportPlan> {
        let demand = Self::resolve_demand(matrix, demand, config);
        let model = self.build_model(matrix, &demand, config)?;
        if cancel.is_cancelled() {
            return Err(PlanningError::Cancelled);
        }
        debug!(
            facilities = matrix.num_facilities(),
            destinations = matrix.num_destinations(),
            variables = model.num_variables(),
            constraints = model.num_constraints(),
            "transport model built"
        );

        let solution = self.solver.solve_cancellable(&model, cancel)?;
        if !solution.is_feasible() {
            warn!(
                status = %solution.status,
                facilities = matrix.num_facilities(),
                destinations = matrix.num_destinations(),
                total_demand = demand.iter().sum::<f64>(),
                min_facilities = config.min_facilities,
                max_facilities = config.max_facilities,
                "transport model has no feasible solution"
            );
            return Err(PlanningError::Infeasible(format!(
                "transport model is {} for {} facilities and {} destinations",
                solution.status,
                matrix.num_facilities(),
                matrix.num_destinations()
            )));
        }

        let plan = assemble_plan(matrix, &demand, config, &solution)?;
        info!(
            open = plan.open_facilities.len(),
            service_level = plan.network.service_level_achievement,
            total_cost = plan.network.total_cost,
            solver = %plan.solver,
            "transport plan solved"
        );
        Ok(plan)
    }
}

fn assemble_plan(
    matrix: &CostMatrix,
    demand: &[f64],
    config: &TransportConfig,
    solution: &Solution,
) -> PlanningResult<TransportPlan> {
    let open: Vec<usize> = (0..matrix.num_facilities())
        .filter(|i| solution.is_active(&open_var(*i)))
        .collect();

    let mut assignments = Vec::with_capacity(matrix.num_destinations());
    let mut served_by = Vec::with_capacity(matrix.num_destinations());
    for (j, destination) in matrix.destinations.iter().enumerate() {
        let active: Vec<usize> = (0..matrix.num_facilities())
            .filter(|i| solution.is_active(&assign_var(*i, j)))
            .collect();
        let [i] = active[..] else {
            return Err(PlanningError::Infeasible(format!(
                "destination '{}' has {} active assignments in the solution",
                destination,
                active.len()
            )));
        };
        let distance = matrix.distance(i, j);
        let unit_cost = matrix.cost(i, j);
        served_by.push(i);
        assignments.push(AssignmentMetrics {
            destination: destination.clone(),
            facility: matrix.facilities[i].clone(),
            demand: demand[j],
            distance_miles: distance,
            unit_cost,
            transport_cost: unit_cost * demand[j],
            within_service_distance: distance <= config.max_distance_miles,
        });
    }

    let facilities: Vec<FacilityMetrics> = open
        .iter()
        .map(|&i| {
            let name = &matrix.facilities[i];
            let served: Vec<&AssignmentMetrics> = assignments
                .iter()
                .zip(&served_by)
                .filter(|(_, by)| **by == i)
                .map(|(a, _)| a)
                .collect();
            let assigned_demand: f64 = served.iter().map(|a| a.demand).sum();
            let transport_cost: f64 = served.iter().map(|a| a.transport_cost).sum();
            let weighted_distance: f64 = served.iter().map(|a| a.distance_miles * a.demand).sum();
            let capacity = config.capacity_of(name);
            FacilityMetrics {
                facility: name.clone(),
                destinations_served: served.len(),
                assigned_demand,
                capacity,
                utilization: ratio(assigned_demand, capacity),
                average_distance_miles: ratio(weighted_distance, assigned_demand),
                transport_cost,
                cost_per_unit: ratio(transport_cost, assigned_demand),
                fixed_cost: config.fixed_cost_of(name),
            }
        })
        .collect();

    let total_demand: f64 = demand.iter().sum();
    let within: f64 = assignments
        .iter()
        .filter(|a| a.within_service_distance)
        .map(|a| a.demand)
        .sum();
    let service_level_achievement = if total_demand > 0.0 {
        within / total_demand
    } else {
        1.0
    };
    let weighted_distance: f64 = assignments.iter().map(|a| a.distance_miles * a.demand).sum();
    let open_capacity: f64 = facilities.iter().map(|f| f.capacity).sum();
    let transport_cost: f64 = facilities.iter().map(|f| f.transport_cost).sum();
    let fixed_cost: f64 = facilities.iter().map(|f| f.fixed_cost).sum();

    let network = NetworkMetrics {
        open_facilities: facilities.len(),
        total_demand,
        demand_within_service_distance: within,
        service_level_achievement,
        service_level_target: config.service_level,
        meets_service_level: service_level_achievement + 1e-9 >= config.service_level,
        weighted_average_distance_miles: ratio(weighted_distance, total_demand),
        network_utilization: ratio(total_demand, open_capacity),
        average_facility_utilization: ratio(
            facilities.iter().map(|f| f.utilization).sum(),
            facilities.len() as f64,
        ),
        transport_cost,
        fixed_cost,
        total_cost: transport_cost + fixed_cost,
    };

    Ok(TransportPlan {
        open_facilities: open.iter().map(|&i| matrix.facilities[i].clone()).collect(),
        assignments,
        facilities,
        network,
        objective_value: solution.objective_value.unwrap_or(0.0),
        solver: solution.solver.clone(),
        approximate: solution.approximate,
    })
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> CostMatrix {
        CostMatrix::from_rows(
            vec!["north".into(), "south".into()],
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![1.0, 2.0, 9.0], vec![8.0, 3.0, 1.0]],
            vec![vec![100.0, 400.0, 1500.0], vec![1400.0, 300.0, 50.0]],
        )
    }

    fn config() -> TransportConfig {
        TransportConfig {
            min_facilities: 1,
            max_facilities: 2,
            default_capacity: 100.0,
            service_level: 0.9,
            max_distance_miles: 1000.0,
            default_demand: 10.0,
            ..TransportConfig::default()
        }
    }

    fn optimizer_model(config: &TransportConfig) -> PlanningResult<Model> {
        let solver = crate::solver::RandomSearchSolver::default();
        let m = matrix();
        let demand = TransportOptimizer::resolve_demand(&m, None, config);
        TransportOptimizer::new(&solver).build_model(&m, &demand, config)
    }

    #[test]
    fn model_contains_every_structural_row() {
        let model = optimizer_model(&config()).unwrap();
        assert!(crate::domain::validate_model(&model).valid);

        assert_eq!(model.constraints["serve_2"], Bound::exactly(1.0));
        assert_eq!(model.constraints["facility_count"], Bound::between(1.0, 2.0));
        assert_eq!(model.variables["open_1"]["capacity_1"], -100.0);
        assert_eq!(model.variables["assign_1_2"]["capacity_1"], 10.0);
        assert_eq!(model.variables["open_0"]["link_0_1"], -1.0);
        // 1500 miles is outside the service radius
        assert!(!model.variables["assign_0_2"].contains_key("service_level"));
        assert_eq!(model.constraints["service_level"], Bound::at_least(27.0));
        assert_eq!(model.binaries.len(), 8);
    }

    #[test]
    fn excess_distance_is_penalized_in_objective() {
        let cfg = config();
        let model = optimizer_model(&cfg).unwrap();
        // cost part 0.6 * 9 * 10, penalty 0.4 * 10 * 500 * 10
        let expected = 0.6 * 9.0 * 10.0 + 0.4 * 10.0 * 500.0 * 10.0;
        assert!((model.variables["assign_0_2"]["cost"] - expected).abs() < 1e-9);
    }

    #[test]
    fn mandatory_facility_forced_open() {
        let mut cfg = config();
        cfg.mandatory_facilities = vec!["south".into()];
        let model = optimizer_model(&cfg).unwrap();
        assert_eq!(model.constraints["mandatory_1"], Bound::exactly(1.0));

        cfg.mandatory_facilities = vec!["east".into()];
        assert!(matches!(optimizer_model(&cfg), Err(PlanningError::InvalidInput(_))));
    }

    #[test]
    fn repeated_mandatory_facility_is_counted_once() {
        let mut cfg = config();
        cfg.max_facilities = 1;
        cfg.mandatory_facilities = vec!["south".into(), "south".into()];
        let model = optimizer_model(&cfg).unwrap();
        assert_eq!(model.variables["open_1"]["mandatory_1"], 1.0);
        assert_eq!(model.constraints["mandatory_1"], Bound::exactly(1.0));
    }

    #[test]
    fn inconsistent_bounds_are_rejected() {
        let mut cfg = config();
        cfg.min_facilities = 3;
        cfg.max_facilities = 3;
        assert!(matches!(optimizer_model(&cfg), Err(PlanningError::InvalidInput(_))));
    }

    #[test]
    fn unreachable_service_radius_is_infeasible() {
        let mut cfg = config();
        cfg.max_distance_miles = 10.0;
        assert!(matches!(optimizer_model(&cfg), Err(PlanningError::Infeasible(_))));
    }

    #[test]
    fn metrics_follow_solution() {
        let m = matrix();
        let cfg = config();
        let demand = vec![10.0, 10.0, 10.0];
        let assignment: BTreeMap<String, f64> = [
            ("open_0", 1.0),
            ("open_1", 1.0),
            ("assign_0_0", 1.0),
            ("assign_1_1", 1.0),
            ("assign_1_2", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let solution = Solution::optimal(0.0, assignment);

        let plan = assemble_plan(&m, &demand, &cfg, &solution).unwrap();
        assert_eq!(plan.open_facilities, vec!["north", "south"]);
        assert_eq!(plan.network.service_level_achievement, 1.0);
        assert!(plan.network.meets_service_level);

        let south = &plan.facilities[1];
        assert_eq!(south.destinations_served, 2);
        assert_eq!(south.assigned_demand, 20.0);
        assert!((south.utilization - 0.2).abs() < 1e-12);
        assert!((south.average_distance_miles - 175.0).abs() < 1e-9);
        assert!((south.cost_per_unit - 2.0).abs() < 1e-12);
        assert!((plan.network.network_utilization - 30.0 / 200.0).abs() < 1e-12);
    }

    #[test]
    fn incomplete_solution_is_rejected() {
        let m = matrix();
        let assignment: BTreeMap<String, f64> =
            [("open_0".to_string(), 1.0), ("assign_0_0".to_string(), 1.0)].into();
        let err = assemble_plan(&m, &[1.0, 1.0, 1.0], &config(), &Solution::optimal(0.0, assignment))
            .unwrap_err();
        assert!(matches!(err, PlanningError::Infeasible(_)));
    }
}
