/// Longest household display name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Reservations held in memory per laundry before new bookings are refused.
/// The retention reaper keeps real deployments far below this.
pub const MAX_RESERVATIONS_PER_TENANT: usize = 50_000;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Largest WAL record accepted on replay. Anything bigger is treated as corruption.
pub const MAX_WAL_RECORD_LEN: usize = 64 * 1024;
