use crate::error::TransactionError;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const OPERATIONAL_FAILURE: i32 = 1;
    pub const PLANNING_FAILURE: i32 = 2;
    pub const TRANSACTIONAL_FAILURE: i32 = 3;
}

/// Exit code for an error returned by a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<TransactionError>())
    {
        Some(TransactionError::Planning { .. }) => exit::PLANNING_FAILURE,
        Some(_) => exit::TRANSACTIONAL_FAILURE,
        None => exit::OPERATIONAL_FAILURE,
    }
}
