// Multi-year warehouse capacity planning
//
// Forecast volumes are converted into pallet positions and floor area per
// year, then a MIP decides when to add facilities, how much space each
// addition contributes, and how much third-party space covers the rest.

use super::error::{PlanningError, PlanningResult};
use super::model_builder::ModelBuilder;
use super::models::{Bound, Model, Solution};
use super::solver_service::SolverService;
use super::value_objects::{Direction, VariableKind};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OBJECTIVE_KEY: &str = "cost";
const SQ_INCHES_PER_SQ_FOOT: f64 = 144.0;
const AREA_ROUNDING_TOLERANCE: f64 = 1e-6;

/// Forecast unit volume for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastYear {
    pub year: i32,
    pub annual_units: f64,
}

/// Baseline volume and pack configuration of one SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuProfile {
    pub sku: String,
    pub annual_units: f64,
    pub units_per_case: f64,
    pub cases_per_pallet: f64,
}

/// Physical and operational parameters of the warehouse network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseParameters {
    pub days_on_hand: f64,
    pub operating_days: f64,
    pub pallet_length_in: f64,
    pub pallet_width_in: f64,
    pub ceiling_height_ft: f64,
    pub rack_height_ft: f64,
    /// Share of storage floor consumed by aisles, in [0, 1)
    pub aisle_factor: f64,
    /// Target share of gross area actually used, in (0, 1]
    pub max_utilization: f64,
    pub pallets_per_door_per_day: f64,
    pub max_doors: u32,
    pub dock_area_per_door: f64,
    /// Staging floor for door demand beyond `max_doors`
    pub overflow_area_per_door: f64,
    pub office_area: f64,
    pub battery_area: f64,
    pub packing_area: f64,
    pub initial_facility_area: f64,
    /// Largest size a single facility addition may contribute
    pub design_area_cap: f64,
    pub facility_fixed_cost: f64,
    /// Annual cost per square foot of owned space
    pub internal_cost_per_sqft: f64,
    /// Annual cost per square foot of third-party space
    pub third_party_cost_per_sqft: f64,
    /// Share of gross area that must be covered by owned space
    pub service_level: f64,
    pub max_facilities_added: u32,
}

impl Default for WarehouseParameters {
    fn default() -> Self {
        Self {
            days_on_hand: 30.0,
            operating_days: 250.0,
            pallet_length_in: 48.0,
            pallet_width_in: 40.0,
            ceiling_height_ft: 32.0,
            rack_height_ft: 6.0,
            aisle_factor: 0.4,
            max_utilization: 0.85,
            pallets_per_door_per_day: 150.0,
            max_doors: 20,
            dock_area_per_door: 1000.0,
            overflow_area_per_door: 500.0,
            office_area: 5000.0,
            battery_area: 1500.0,
            packing_area: 8000.0,
            initial_facility_area: 0.0,
            design_area_cap: 250_000.0,
            facility_fixed_cost: 2_000_000.0,
            internal_cost_per_sqft: 8.5,
            third_party_cost_per_sqft: 12.0,
            service_level: 0.8,
            max_facilities_added: 3,
        }
    }
}

/// Objective weights of the multi-year model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningWeights {
    pub cost: f64,
    pub utilization: f64,
    pub service: f64,
}

impl Default for PlanningWeights {
    fn default() -> Self {
        Self {
            cost: 0.5,
            utilization: 0.3,
            service: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRequest {
    pub forecast: Vec<ForecastYear>,
    pub skus: Vec<SkuProfile>,
    #[serde(default)]
    pub parameters: WarehouseParameters,
    #[serde(default)]
    pub weights: PlanningWeights,
}

/// Space requirement derived from one forecast year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRequirement {
    pub year: i32,
    pub annual_units: f64,
    pub annual_pallets: f64,
    pub daily_pallets: f64,
    pub storage_pallets: f64,
    pub storage_area: f64,
    pub dock_doors: u32,
    pub overflow_doors: u32,
    pub dock_area: f64,
    pub net_area: f64,
    /// Net area grossed up by max utilization, whole square feet
    pub gross_area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyWarehousePlan {
    #[serde(flatten)]
    pub requirement: YearRequirement,
    pub facilities_added: u32,
    pub cumulative_facilities: u32,
    pub size_added: f64,
    /// Initial area plus every size added so far
    pub cumulative_size: f64,
    pub third_party_space: f64,
    pub internal_cost: f64,
    pub third_party_cost: f64,
    pub total_cost: f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSummary {
    pub volume_cagr: f64,
    pub cost_cagr: f64,
    pub total_cost: f64,
    pub final_facilities: u32,
    pub final_capacity: f64,
    pub peak_gross_area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehousePlan {
    pub years: Vec<YearlyWarehousePlan>,
    pub summary: WarehouseSummary,
    pub objective_value: f64,
    pub solver: String,
    pub approximate: bool,
}

/// Compound annual growth rate between the first and last value
pub fn cagr(first: f64, last: f64, periods: usize) -> f64 {
    if periods == 0 || first <= 0.0 || last < 0.0 {
        return 0.0;
    }
    (last / first).powf(1.0 / periods as f64) - 1.0
}

fn round_up_area(area: f64) -> f64 {
    (area - AREA_ROUNDING_TOLERANCE).ceil().max(0.0)
}

fn validate(request: &WarehouseRequest) -> PlanningResult<()> {
    let p = &request.parameters;
    if request.forecast.is_empty() {
        return Err(PlanningError::invalid("forecast has no years"));
    }
    if request.skus.is_empty() {
        return Err(PlanningError::invalid("SKU master is empty"));
    }
    if let Some(sku) = request
        .skus
        .iter()
        .find(|s| s.units_per_case <= 0.0 || s.cases_per_pallet <= 0.0)
    {
        return Err(PlanningError::invalid(format!(
            "SKU '{}' needs positive units per case and cases per pallet",
            sku.sku
        )));
    }
    if p.operating_days <= 0.0 {
        return Err(PlanningError::invalid("operating days must be positive"));
    }
    if !(0.0..1.0).contains(&p.aisle_factor) {
        return Err(PlanningError::invalid("aisle factor must lie in [0, 1)"));
    }
    if p.max_utilization <= 0.0 || p.max_utilization > 1.0 {
        return Err(PlanningError::invalid("max utilization must lie in (0, 1]"));
    }
    if p.rack_height_ft <= 0.0 || p.rack_height_ft > p.ceiling_height_ft {
        return Err(PlanningError::invalid(
            "rack height must be positive and no taller than the ceiling",
        ));
    }
    if p.pallets_per_door_per_day <= 0.0 {
        return Err(PlanningError::invalid("door throughput must be positive"));
    }
    if !(0.0..=1.0).contains(&p.service_level) {
        return Err(PlanningError::invalid("service level must lie in [0, 1]"));
    }
    Ok(())
}

/// Convert every forecast year into pallets and floor area
pub fn yearly_requirements(request: &WarehouseRequest) -> PlanningResult<Vec<YearRequirement>> {
    validate(request)?;
    let p = &request.parameters;

    let baseline_units: f64 = request.skus.iter().map(|s| s.annual_units).sum();
    if baseline_units <= 0.0 {
        return Err(PlanningError::invalid("SKU baseline volume is zero"));
    }

    let pallet_footprint = p.pallet_length_in * p.pallet_width_in / SQ_INCHES_PER_SQ_FOOT;
    let rack_levels = (p.ceiling_height_ft / p.rack_height_ft).floor().max(1.0);
    let fixed_area = p.office_area + p.battery_area + p.packing_area;

    let requirements = request
        .forecast
        .iter()
        .map(|year| {
            let scale = year.annual_units / baseline_units;
            let annual_pallets: f64 = request
                .skus
                .iter()
                .map(|s| s.annual_units * scale / (s.units_per_case * s.cases_per_pallet))
                .sum();
            let daily_pallets = annual_pallets / p.operating_days;
            let storage_pallets = daily_pallets * p.days_on_hand;
            let storage_area =
                storage_pallets * pallet_footprint / rack_levels / (1.0 - p.aisle_factor);

            let doors_needed = (daily_pallets / p.pallets_per_door_per_day).ceil() as u32;
            let dock_doors = doors_needed.min(p.max_doors);
            let overflow_doors = doors_needed - dock_doors;
            let dock_area = dock_doors as f64 * p.dock_area_per_door
                + overflow_doors as f64 * p.overflow_area_per_door;

            let net_area = storage_area + dock_area + fixed_area;
            YearRequirement {
                year: year.year,
                annual_units: year.annual_units,
                annual_pallets,
                daily_pallets,
                storage_pallets,
                storage_area,
                dock_doors,
                overflow_doors,
                dock_area,
                net_area,
                gross_area: round_up_area(net_area / p.max_utilization),
            }
        })
        .collect();
    Ok(requirements)
}

fn add_var(t: usize) -> String {
    format!("add_{}", t)
}

fn size_var(t: usize) -> String {
    format!("size_{}", t)
}

fn third_party_var(t: usize) -> String {
    format!("third_party_{}", t)
}

/// Sizes warehouse capacity over the forecast horizon
pub struct WarehousePlanner<'a> {
    solver: &'a dyn SolverService,
}

impl<'a> WarehousePlanner<'a> {
    pub fn new(solver: &'a dyn SolverService) -> Self {
        Self { solver }
    }

    /// Formulate the multi-year facility sizing model
    pub fn build_model(&self, request: &WarehouseRequest, requirements: &[YearRequirement]) -> Model {
        let p = &request.parameters;
        let w = &request.weights;
        let mut builder = ModelBuilder::new(OBJECTIVE_KEY);

        for t in 0..requirements.len() {
            let (add, size, third_party) = (add_var(t), size_var(t), third_party_var(t));
            builder.add_variable(&add, VariableKind::Binary);
            builder.add_variable(&size, VariableKind::Integer);
            builder.add_variable(&third_party, VariableKind::Continuous);

            builder.set_objective_coef(&add, w.cost * p.facility_fixed_cost);
            builder.set_objective_coef(&size, w.utilization);
            builder.set_objective_coef(&third_party, w.service);

            // size_t <= cap * add_t
            let link = format!("link_{}", t);
            builder.set_constraint_coef(&size, &link, 1.0);
            builder.set_constraint_coef(&add, &link, -p.design_area_cap);
            builder.add_constraint(link, Bound::at_most(0.0));

            builder.set_constraint_coef(&add, "max_facilities", 1.0);
        }
        builder.add_constraint("max_facilities", Bound::at_most(p.max_facilities_added as f64));

        // Owned space in year t is the initial area plus every size_k, k <= t,
        // so earlier years' additions are counted through the running sum.
        // Third-party space is leased on top of owned space to close the gap
        // to gross area; it never counts toward the service row.
        for (t, req) in requirements.iter().enumerate() {
            let capacity = format!("capacity_{}", t);
            let service = format!("service_{}", t);
            for k in 0..=t {
                builder.set_constraint_coef(&size_var(k), &capacity, 1.0);
                builder.set_constraint_coef(&size_var(k), &service, 1.0);
            }
            builder.set_constraint_coef(&third_party_var(t), &capacity, 1.0);
            builder.add_constraint(
                capacity,
                Bound::at_least(req.gross_area - p.initial_facility_area),
            );
            builder.add_constraint(
                service,
                Bound::at_least(p.service_level * req.gross_area - p.initial_facility_area),
            );
        }

        builder.build_model(Direction::Min)
    }

    pub fn plan(
        &self,
        request: &WarehouseRequest,
        cancel: &CancellationToken,
    ) -> PlanningResult<WarehousePlan> {
        let requirements = yearly_requirements(request)?;
        if cancel.is_cancelled() {
            return Err(PlanningError::Cancelled);
        }

        let model = self.build_model(request, &requirements);
        debug!(
            years = requirements.len(),
            variables = model.num_variables(),
            constraints = model.num_constraints(),
            "warehouse model built"
        );

        let solution = self.solver.solve_cancellable(&model, cancel)?;
        if !solution.is_feasible() {
            let peak = requirements.iter().map(|r| r.gross_area).fold(0.0, f64::max);
            warn!(
                status = %solution.status,
                years = requirements.len(),
                peak_gross_area = peak,
                design_area_cap = request.parameters.design_area_cap,
                max_facilities = request.parameters.max_facilities_added,
                "warehouse model has no feasible solution"
            );
            return Err(PlanningError::Infeasible(format!(
                "warehouse capacity model is {}: capacity or service constraints too tight",
                solution.status
            )));
        }

        let plan = assemble_plan(request, requirements, &solution);
        info!(
            years = plan.years.len(),
            facilities = plan.summary.final_facilities,
            total_cost = plan.summary.total_cost,
            solver = %plan.solver,
            "warehouse plan solved"
        );
        Ok(plan)
    }
}

fn assemble_plan(
    request: &WarehouseRequest,
    requirements: Vec<YearRequirement>,
    solution: &Solution,
) -> WarehousePlan {
    let p = &request.parameters;
    let mut cumulative_facilities = 0u32;
    let mut cumulative_size = p.initial_facility_area;
    let mut years = Vec::with_capacity(requirements.len());

    for (t, requirement) in requirements.into_iter().enumerate() {
        let facilities_added = u32::from(solution.is_active(&add_var(t)));
        let size_added = solution.value(&size_var(t)).round().max(0.0);
        let third_party_space = solution.value(&third_party_var(t)).max(0.0);
        cumulative_facilities += facilities_added;
        cumulative_size += size_added;

        let internal_cost = cumulative_size * p.internal_cost_per_sqft
            + facilities_added as f64 * p.facility_fixed_cost;
        let third_party_cost = third_party_space * p.third_party_cost_per_sqft;
        let utilization = if cumulative_size > 0.0 {
            requirement.net_area / cumulative_size
        } else {
            0.0
        };

        years.push(YearlyWarehousePlan {
            requirement,
            facilities_added,
            cumulative_facilities,
            size_added,
            cumulative_size,
            third_party_space,
            internal_cost,
            third_party_cost,
            total_cost: internal_cost + third_party_cost,
            utilization,
        });
    }

    let periods = years.len().saturating_sub(1);
    let (volume_cagr, cost_cagr) = match (years.first(), years.last()) {
        (Some(first), Some(last)) => (
            cagr(first.requirement.annual_units, last.requirement.annual_units, periods),
            cagr(first.total_cost, last.total_cost, periods),
        ),
        _ => (0.0, 0.0),
    };

    let summary = WarehouseSummary {
        volume_cagr,
        cost_cagr,
        total_cost: years.iter().map(|y| y.total_cost).sum(),
        final_facilities: cumulative_facilities,
        final_capacity: cumulative_size,
        peak_gross_area: years
            .iter()
            .map(|y| y.requirement.gross_area)
            .fold(0.0, f64::max),
    };

    WarehousePlan {
        years,
        summary,
        objective_value: solution.objective_value.unwrap_or(0.0),
        solver: solution.solver.clone(),
        approximate: solution.approximate,
    }
}
