// exit.rs — Map failures to process exit codes.
//
// 0 ok, 1 any other failure, 2 schema invalid, 3 missing required file or
// config, 4 unknown action. The code comes from the first cause in the
// error chain that has one.

use std::fmt;

use keel_actions::ActionError;
use keel_config::ConfigError;
use keel_events::SchemaError;
use keel_followup::FollowupError;

pub const FAILURE: u8 = 1;
pub const SCHEMA_INVALID: u8 = 2;
pub const MISSING: u8 = 3;
pub const UNKNOWN_ACTION: u8 = 4;

/// A command outcome that should end the process with a specific code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

pub fn code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(failure) = cause.downcast_ref::<Failure>() {
            return failure.code;
        }
        if cause.is::<SchemaError>() {
            return SCHEMA_INVALID;
        }
        if let Some(ConfigError::Missing { .. }) = cause.downcast_ref::<ConfigError>() {
            return MISSING;
        }
        match cause.downcast_ref::<ActionError>() {
            Some(ActionError::UnknownAction { .. }) => return UNKNOWN_ACTION,
            Some(ActionError::InvalidInput { .. }) => return SCHEMA_INVALID,
            _ => {}
        }
        if let Some(FollowupError::UnknownAction { .. }) = cause.downcast_ref::<FollowupError>() {
            return UNKNOWN_ACTION;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::NotFound {
                return MISSING;
            }
        }
    }
    FAILURE
}
