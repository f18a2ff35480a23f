#![allow(unused)]

// MCP9808 (Microchip)
pub const MCP9808_REMOTE_ADDR: u16 = 0x18;
pub const MCP9808_LOCAL_ADDR: u16 = 0x19;

pub const MCP9808_CONFIG: u8 = 0x01;
pub const MCP9808_UPPER_TEMP: u8 = 0x02;
pub const MCP9808_LOWER_TEMP: u8 = 0x03;
pub const MCP9808_CRIT_TEMP: u8 = 0x04;
pub const MCP9808_AMBIENT_TEMP: u8 = 0x05;
pub const MCP9808_MANUF_ID: u8 = 0x06;
pub const MCP9808_DEVICE_ID: u8 = 0x07;
pub const MCP9808_RESOLUTION: u8 = 0x08;

pub const MCP9808_MANUF_ID_EXPECTED: u16 = 0x0054;
pub const MCP9808_DEVICE_ID_EXPECTED: u16 = 0x0400;
