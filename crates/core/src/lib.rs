//! Core of maxxctl: snapshot decoding, stream supervision and the
//! auto-ampenable reconciliation engine for Innosonix Maxx amplifiers.

pub mod domain;
