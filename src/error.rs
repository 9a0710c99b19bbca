//! Unified error types for vpcctl

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vpcctl operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("{0}")]
    ConfigConflict(String),

    // Address space errors
    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidAddressBlock { cidr: String, reason: String },

    #[error("CIDR {cidr} overlaps with {with} ({with_cidr})")]
    OverlapConflict {
        cidr: String,
        with: String,
        with_cidr: String,
    },

    #[error("Subnet CIDR {subnet} is not within VPC CIDR {vpc_cidr}")]
    SubnetNotContained { subnet: String, vpc_cidr: String },

    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    // Topology errors
    #[error("VPC '{0}' does not exist")]
    VpcNotFound(String),

    #[error("Subnet '{subnet}' not found in VPC '{vpc}'")]
    SubnetNotFound { vpc: String, subnet: String },

    #[error("VPCs '{a}' and '{b}' are already peered with different CIDRs ({existing}); unpeer them first")]
    PeeringConflict {
        a: String,
        b: String,
        existing: String,
    },

    // State store errors
    #[error("State record '{path}' is invalid: {message}")]
    StateCorrupt { path: PathBuf, message: String },

    #[error("State directory is locked by another vpcctl process ({0})")]
    StateLocked(PathBuf),

    // Policy errors
    #[error("Failed to read policy file '{path}': {source}")]
    PolicyRead { path: PathBuf, source: io::Error },

    #[error("Invalid policy: {0}")]
    PolicyInvalid(String),

    // External command errors
    #[error("Invalid app command: {0}")]
    InvalidCommand(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    // System errors
    #[error("This tool must be run as root")]
    NotPrivileged,
}

/// Result type alias for vpcctl operations
pub type Result<T> = std::result::Result<T, Error>;
