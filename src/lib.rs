//! Shared washing-machine booking for small apartment buildings.
//!
//! The rules live in [`booking`] and [`household`] as pure functions over
//! explicit inputs. [`engine`] keeps one laundry's state durable and
//! serialized, and [`wire`] serves it over the PostgreSQL protocol.

pub mod auth;
pub mod booking;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod engine;
pub mod household;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
