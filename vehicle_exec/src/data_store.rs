//! # Data Store

use log::{info, warn};

use crate::cmd::MotorCommand;
use crate::loc::Pose;
use crate::safety::SafetyState;

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Gives the reason the vehicle has been put into safe mode
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SafeModeCause {
    /// The safety monitor raised the halt flag
    SafetyHalt,

    /// Planning failed and there is no path to drive
    PlanningFailed,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u128,

    /// True if this cycle falls on a 1Hz boundary
    pub is_1_hz_cycle: bool,

    /// Session elapsed time
    pub elapsed_time_s: f64,

    // Safe mode variables
    /// Determines if the vehicle is in safe mode.
    pub safe: bool,

    /// Gives the reason for the vehicle being in safe mode.
    pub safe_cause: Option<SafeModeCause>,

    // Localisation
    pub pose: Pose,

    // Control
    /// Command issued to the motors this cycle
    pub motor_cmd: MotorCommand,

    /// Id of the waypoint currently being driven towards
    pub target_waypoint: Option<u32>,

    /// Id of the plan request currently in flight, if any
    pub pending_plan: Option<u64>,

    // Safety
    pub safety_state: SafetyState,

    // Monitoring counters
    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Puts the vehicle into safe mode with the given cause.
    pub fn make_safe(&mut self, cause: SafeModeCause) {
        if !self.safe {
            warn!("Make safe requested, cause: {:?}", cause);
            self.safe = true;
            self.safe_cause = Some(cause);
        }
    }

    /// Attempts to disable the safe mode by clearing the given cause.
    ///
    /// Returns `Ok(())` if this cause was cleared and safe mode was disabled, or `Err(())`
    /// otherwise. To remove safe mode the provided cause must match the initial reason for safe
    /// mode being enabled.
    ///
    /// If safe mode was not enabled `Ok(())` is returned
    pub fn make_unsafe(&mut self, cause: SafeModeCause) -> Result<(), ()> {
        if !self.safe {
            return Ok(());
        }

        match self.safe_cause {
            Some(root_cause) => {
                if cause == root_cause {
                    self.safe = false;
                    self.safe_cause = None;
                    info!("Make unsafe requested, root cause match, safe mode disabled");
                    Ok(())
                } else {
                    Err(())
                }
            }
            None => Ok(()),
        }
    }

    /// Perform actions required at the start of a cycle.
    ///
    /// Clears those items that need clearing at the start of a cycle, and sets the 1Hz cycle flag.
    pub fn cycle_start(&mut self, cycle_frequency_hz: f64) {
        self.is_1_hz_cycle = self.num_cycles % (cycle_frequency_hz as u128) == 0;

        self.motor_cmd = MotorCommand::stop();

        self.elapsed_time_s = util::session::get_elapsed_seconds();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_safe_mode_root_cause() {
        let mut ds = DataStore::default();

        ds.make_safe(SafeModeCause::SafetyHalt);
        assert!(ds.safe);

        // Clearing with the wrong cause is rejected
        assert!(ds.make_unsafe(SafeModeCause::PlanningFailed).is_err());
        assert!(ds.safe);

        assert!(ds.make_unsafe(SafeModeCause::SafetyHalt).is_ok());
        assert!(!ds.safe);
    }

    #[test]
    fn test_one_hz_cycle_flag() {
        let mut ds = DataStore::default();

        // At 5 Hz the flag is set on every fifth cycle, starting with the first
        let mut flags = Vec::new();
        for _ in 0..6 {
            ds.cycle_start(5.0);
            flags.push(ds.is_1_hz_cycle);
            ds.num_cycles += 1;
        }

        assert_eq!(flags, vec![true, false, false, false, false, true]);
    }
}
