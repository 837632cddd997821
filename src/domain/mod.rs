// Domain module: model building, solver contract and the planning formulations

pub mod error;
pub mod geo;
pub mod model_builder;
pub mod models;
pub mod solver_service;
pub mod transport;
pub mod value_objects;
pub mod warehouse;

pub use error::*;
pub use geo::{CostMatrix, CostMatrixBuilder, FreightRates, GeoError, GeoPoint, LocationLookup};
pub use model_builder::*;
pub use models::*;
pub use solver_service::*;
pub use transport::{TransportConfig, TransportOptimizer, TransportPlan};
pub use value_objects::*;
pub use warehouse::{WarehousePlan, WarehousePlanner, WarehouseRequest};
