pub mod artifact_store;
pub mod controller;
pub mod detector;
pub mod dto;
pub mod frame_source;
pub mod plot;
pub mod ports;
pub mod services;
