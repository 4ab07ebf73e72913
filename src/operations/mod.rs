pub mod config_op;
pub mod devices_op;
pub mod install_op;
pub mod op_helper;
pub mod preflight_op;
pub mod probe_op;
pub mod run_op;
