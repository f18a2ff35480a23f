//! Acquisition d'un magnétomètre RM3100 et de capteurs de température
//! MCP9808 sur un bus I2C Linux.

pub mod cli;
pub mod clock;
pub mod config;
pub mod i2c;
pub mod logfile;
pub mod output;
pub mod runner;
pub mod sbc;
pub mod sensors;
