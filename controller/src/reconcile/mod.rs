//! Per-application reconciliation

pub mod control_loop;
pub mod fsm;
