mod routes;

pub mod app;
pub mod bounding_box;
pub mod camera;
pub mod capture;
pub mod config;
pub mod cv_utils;
pub mod detector;
pub mod model_service;
pub mod ort_service;
pub mod retry;
pub mod server;
pub mod state;
pub mod store;
pub mod stream;
pub mod telemetry;

pub use app::start_app;
