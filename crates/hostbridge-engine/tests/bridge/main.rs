//! Bridge integration tests
//!
//! Each module drives a `BridgeContext` against the testkit doubles and
//! inspects the doubles' call and disposal logs afterwards.


mod identity;
mod invocation;
mod lifecycle;
mod registry;
mod scenarios;
