//! Domain layer: entities, their state machines and the ports the core
//! calls out through. Nothing here performs I/O.

pub mod coupon;
pub mod download;
pub mod identity;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod product;
pub mod tenant;
