// Queue constants (no magic values)

/// Attempts allowed before a job fails
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Queue carrying "send step N" jobs
pub const EMAIL_QUEUE: &str = "email-sending";

