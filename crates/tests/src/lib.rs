//! Integration tests driving the full auto-ampenable service against an
//! in-process fake amplifier

#[cfg(test)]
mod fake_device;

#[cfg(test)]
mod auto_ampenable_integration;
