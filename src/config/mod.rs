//! Configuration module for the cluster deployer.
//!
//! This module handles all configuration-related functionality:
//! - Parsing the plans file and the run configuration
//! - Layering overrides from the run config, environment and command line
//! - Validation of plans before a driver is built

mod plan;
mod parser;
mod validator;

pub use plan::{
    AksSettings, GkeSettings, Operation, Plan, PlanOverrides, PlansFile, Provider, RunConfig,
    VaultInfo,
};
pub use parser::{
    ConfigParser, PLANS_FILE_NAME, PlanSelection, RUN_CONFIG_FILE_NAME, find_config_file,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
