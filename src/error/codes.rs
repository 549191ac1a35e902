/// Error code registry for simdrive
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Generation errors
/// - 3000-3999: Checkpoint storage errors
/// - 4000-4999: Simulation engine errors
/// - 5000-5999: Run control errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;
    pub const CONFIG_PATH_ERROR: u16 = 1004;

    // Generation errors (2000-2999)
    pub const GENERATION_GENERIC: u16 = 2000;
    pub const GENERATION_CLIENT_SETUP: u16 = 2001;

    // Checkpoint storage errors (3000-3999)
    pub const CHECKPOINT_GENERIC: u16 = 3000;
    pub const CHECKPOINT_IO_ERROR: u16 = 3001;
    pub const CHECKPOINT_NOT_FOUND: u16 = 3002;
    pub const CHECKPOINT_CORRUPTED: u16 = 3003;
    pub const CHECKPOINT_ORDER_VIOLATION: u16 = 3004;
    pub const CHECKPOINT_INCOMPATIBLE_VERSION: u16 = 3005;

    // Simulation engine errors (4000-4999)
    pub const ENGINE_GENERIC: u16 = 4000;
    pub const ENGINE_RESTORE_FAILED: u16 = 4001;
    pub const ENGINE_SNAPSHOT_FAILED: u16 = 4002;
    pub const ENGINE_HISTORY_INVALID: u16 = 4003;

    // Run control errors (5000-5999)
    pub const RUN_GENERIC: u16 = 5000;
    pub const RUN_ABORTED: u16 = 5001;
    pub const RUN_INTERRUPTED: u16 = 5002;
    pub const RUN_INVALID_WINDOW: u16 = 5003;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_GENERIC => "Configuration error",
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_PARSE_ERROR => "Configuration file could not be parsed",
        ErrorCode::CONFIG_INVALID_VALUE => "Invalid configuration value",
        ErrorCode::CONFIG_PATH_ERROR => "Configuration path error",

        ErrorCode::GENERATION_GENERIC => "Generation error",
        ErrorCode::GENERATION_CLIENT_SETUP => "Generation client could not be created",

        ErrorCode::CHECKPOINT_GENERIC => "Checkpoint error",
        ErrorCode::CHECKPOINT_IO_ERROR => "Checkpoint I/O error",
        ErrorCode::CHECKPOINT_NOT_FOUND => "Checkpoint not found",
        ErrorCode::CHECKPOINT_CORRUPTED => "Checkpoint corrupted",
        ErrorCode::CHECKPOINT_ORDER_VIOLATION => "Checkpoint would move the run backwards",
        ErrorCode::CHECKPOINT_INCOMPATIBLE_VERSION => "Checkpoint format is newer than supported",

        ErrorCode::ENGINE_GENERIC => "Simulation engine error",
        ErrorCode::ENGINE_RESTORE_FAILED => "Engine could not restore a snapshot",
        ErrorCode::ENGINE_SNAPSHOT_FAILED => "Engine could not produce a snapshot",
        ErrorCode::ENGINE_HISTORY_INVALID => "History artifact is invalid",

        ErrorCode::RUN_GENERIC => "Run control error",
        ErrorCode::RUN_ABORTED => "Run aborted after exhausting stepbacks",
        ErrorCode::RUN_INTERRUPTED => "Run interrupted",
        ErrorCode::RUN_INVALID_WINDOW => "Invalid step window",

        ErrorCode::OTHER_GENERIC => "Unexpected error",

        _ => "Unknown error",
    }
}
