//! # Motor interface
//!
//! Seam between the control loop and whatever actually turns the wheels. The executable drives
//! [`SimMotors`]; a hardware build supplies its own [`MotorInterface`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;

use crate::cmd::MotorCommand;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// An actuator backend which accepts motor commands.
pub trait MotorInterface {
    /// Apply the given command to the motors.
    fn drive(&mut self, cmd: &MotorCommand) -> Result<(), MotorError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Simulated motors which simply record the last command.
#[derive(Debug, Default)]
pub struct SimMotors {
    last_cmd: MotorCommand,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("The motor driver rejected the command: {0}")]
    CommandRejected(String),

    #[error("The motor driver is not responding")]
    NotResponding,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimMotors {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently applied command.
    pub fn last_cmd(&self) -> &MotorCommand {
        &self.last_cmd
    }
}

impl MotorInterface for SimMotors {
    fn drive(&mut self, cmd: &MotorCommand) -> Result<(), MotorError> {
        trace!("Motor command: {:?} at {:.2}", cmd.action, cmd.speed);
        self.last_cmd = *cmd;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
