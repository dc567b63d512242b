//! meshctl commands

pub mod iface;
pub mod mesh;
pub mod realize;
pub mod route;
pub mod router;
pub mod rule;
