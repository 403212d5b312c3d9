//! Bundled protocol drivers.

pub mod appa_55ii;
pub mod cem_dt_885x;
pub mod demo;

use crate::registry::DriverFactory;

/// Factories for every bundled driver.
pub fn bundled() -> Vec<Box<dyn DriverFactory>> {
    vec![
        Box::new(appa_55ii::Appa55iiFactory),
        Box::new(cem_dt_885x::CemDt885xFactory),
        Box::new(demo::DemoFactory),
    ]
}
