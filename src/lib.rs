//! Web application test automation: explore a site, plan test suites from
//! what was found, and execute suites or hand-written scenarios in a browser.
//!
//! The flow for a hands-off run is [`crawler`] → [`planner`] → [`engine`],
//! orchestrated by [`pipeline`]. Hand-written scenarios skip straight to the
//! engine through [`scenario`]. Everything that touches a browser does so via
//! the [`driver::Page`] trait.

pub mod chrome;
pub mod config;
pub mod crawler;
pub mod driver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod mock;
pub mod observation;
pub mod pipeline;
pub mod planner;
pub mod report;
pub mod scenario;
pub mod schema;
pub mod selector;
pub mod suite;

pub use driver::{Launcher, Page};
pub use error::{RunError, RunResult, StepError, ValidationError};
pub use report::{RunReport, RunStatus};
