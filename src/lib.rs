//! System Audio Tap - typed streaming interface to an external audio capture process.

pub mod capture;
pub mod controller;
