//! Device adapters for Innosonix Maxx amplifiers

pub mod device;
