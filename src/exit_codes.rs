//! Process exit codes for `warden`.

use crate::errors::DriverError;

pub const FAILURE: i32 = 1;
pub const QUEUE_LOAD: i32 = 2;
pub const KILL_SWITCH: i32 = 3;

/// Map a command error to its exit code.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DriverError>() {
        Some(DriverError::QueueLoad(_)) => QUEUE_LOAD,
        Some(DriverError::KillSwitch { .. }) => KILL_SWITCH,
        _ => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QueueError;

    #[test]
    fn test_driver_errors_map_to_distinct_codes() {
        let queue = anyhow::Error::new(DriverError::QueueLoad(QueueError::UnknownTask("x".into())));
        let kill = anyhow::Error::new(DriverError::KillSwitch {
            mode: "off".into(),
        });
        assert_eq!(for_error(&queue), QUEUE_LOAD);
        assert_eq!(for_error(&kill), KILL_SWITCH);
        assert_eq!(for_error(&anyhow::anyhow!("boom")), FAILURE);
    }

    #[test]
    fn test_context_does_not_hide_the_code() {
        let err = anyhow::Error::new(DriverError::KillSwitch {
            mode: "paused".into(),
        })
        .context("batch aborted");
        assert_eq!(for_error(&err), KILL_SWITCH);
    }
}
