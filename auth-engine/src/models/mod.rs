mod backup_code;
mod identity;
mod session;

pub use backup_code::BackupCode;
pub use identity::{Identity, MfaState};
pub use session::{DeviceInfo, Session};
