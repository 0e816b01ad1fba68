pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod decoy;
pub mod error_handling;
pub mod export;
pub mod network;
pub mod storage;
