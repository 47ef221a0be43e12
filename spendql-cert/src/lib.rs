pub mod steps;
mod world;

pub use world::CertWorld;
