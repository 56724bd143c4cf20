pub mod cleanup;
pub mod scheduling;
