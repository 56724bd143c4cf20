/// Native module contains implementations of core traits
/// for Linux hosts, talking to `/proc` and sending signals directly
/// instead of going through a monitoring library.
pub mod breaker;
pub mod executor;
pub mod procfs;
