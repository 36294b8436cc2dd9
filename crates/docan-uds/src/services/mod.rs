//! The diagnostic service leaves

pub mod communication_control;
pub mod control_dtc_setting;
pub mod ecu_reset;
pub mod read_data;
pub mod routine_control;
pub mod security_access;
pub mod session_control;
pub mod tester_present;
