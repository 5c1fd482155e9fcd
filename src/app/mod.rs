pub mod errors;
pub mod factory;
pub mod service;

pub use factory::{AppFactory, AppPaths};
pub use service::AppService;
