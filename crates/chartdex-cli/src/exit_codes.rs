//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Invalid argument - the request was rejected before anything was written
pub const INVALID_ARGUMENT: i32 = 2;

/// Not found - repository, secret or package does not exist
pub const NOT_FOUND: i32 = 3;

/// Permission denied - the caller lacks rights for the operation
pub const PERMISSION_DENIED: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Aborted - conflicting writes outlasted the retries
pub const ABORTED: i32 = 6;

/// Service unavailable (following sysexits.h convention)
pub const UNAVAILABLE: i32 = 69;
