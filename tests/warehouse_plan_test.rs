// Multi-year warehouse sizing

use netplan::application::{error_code_of, ErrorCode};
use netplan::domain::warehouse::{
    yearly_requirements, ForecastYear, PlanningWeights, SkuProfile, WarehouseParameters,
};
use netplan::domain::PlanningError;
use netplan::solver::{FallbackSolver, RandomSearchConfig};
use netplan::{WarehousePlanner, WarehouseRequest};
use tokio_util::sync::CancellationToken;

fn growing_request() -> WarehouseRequest {
    WarehouseRequest {
        forecast: [400_000.0, 520_000.0, 700_000.0, 880_000.0]
            .into_iter()
            .zip(2025..)
            .map(|(annual_units, year)| ForecastYear { year, annual_units })
            .collect(),
        skus: vec![
            SkuProfile {
                sku: "cases".into(),
                annual_units: 300_000.0,
                units_per_case: 12.0,
                cases_per_pallet: 40.0,
            },
            SkuProfile {
                sku: "bulk".into(),
                annual_units: 100_000.0,
                units_per_case: 4.0,
                cases_per_pallet: 30.0,
            },
        ],
        parameters: WarehouseParameters {
            design_area_cap: 40_000.0,
            max_facilities_added: 3,
            ..WarehouseParameters::default()
        },
        weights: PlanningWeights::default(),
    }
}

#[test]
fn requirements_grow_with_volume() {
    let reqs = yearly_requirements(&growing_request()).unwrap();
    assert_eq!(reqs.iter().map(|r| r.year).collect::<Vec<_>>(), vec![2025, 2026, 2027, 2028]);
    for pair in reqs.windows(2) {
        assert!(pair[1].storage_pallets > pair[0].storage_pallets);
        assert!(pair[1].gross_area >= pair[0].gross_area);
    }
    assert!(reqs.iter().all(|r| r.gross_area.fract() == 0.0));
}

#[test]
fn heuristic_that_cannot_cover_demand_reports_infeasible() {
    let solver = FallbackSolver::heuristic(RandomSearchConfig {
        trials: 20,
        ..RandomSearchConfig::default()
    });
    let err = WarehousePlanner::new(&solver)
        .plan(&growing_request(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, PlanningError::Infeasible(_)));
    assert_eq!(error_code_of(&anyhow::Error::from(err)), ErrorCode::OptimizationError);
}

#[test]
fn cancelled_plan_never_reaches_the_solver() {
    let solver = FallbackSolver::heuristic(RandomSearchConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = WarehousePlanner::new(&solver)
        .plan(&growing_request(), &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[cfg(feature = "microlp")]
mod exact {
    use super::*;
    use netplan::solver::GoodLpSolver;

    #[test]
    fn capacity_only_grows_and_covers_every_year() {
        let request = growing_request();
        let solver = GoodLpSolver::microlp();
        let plan = WarehousePlanner::new(&solver)
            .plan(&request, &CancellationToken::new())
            .unwrap();
        let p = &request.parameters;

        assert_eq!(plan.years.len(), 4);
        assert!(!plan.approximate);
        for pair in plan.years.windows(2) {
            assert!(pair[1].cumulative_size >= pair[0].cumulative_size);
            assert!(pair[1].cumulative_facilities >= pair[0].cumulative_facilities);
        }
        for year in &plan.years {
            let gross = year.requirement.gross_area;
            assert!(year.cumulative_size + year.third_party_space + 1e-3 >= gross);
            assert!(year.cumulative_size + 1e-3 >= p.service_level * gross);
            assert!(year.size_added <= p.design_area_cap * year.facilities_added as f64 + 1e-6);
        }
        assert!(plan.summary.final_facilities <= p.max_facilities_added);
        assert_eq!(
            plan.summary.final_capacity,
            plan.years.last().unwrap().cumulative_size
        );
        assert!(plan.summary.volume_cagr > 0.0);
    }
}
