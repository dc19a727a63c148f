//! Context names shared by the subsystems that feed the scheduler.

pub const SYSTEM: &str = "System";
pub const POPUP: &str = "Popup";
pub const DIALOG: &str = "Dialog";
pub const NOTIFICATION: &str = "Notification";
pub const BACKGROUND: &str = "Background";
pub const TUTORIAL: &str = "Tutorial";

/// All well-known context names.
pub const ALL: &[&str] = &[SYSTEM, POPUP, DIALOG, NOTIFICATION, BACKGROUND, TUTORIAL];
