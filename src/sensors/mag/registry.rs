#![allow(unused)]

// RM3100 (PNI Sensor Corp.), table 5-1 du manuel utilisateur
pub const RM3100_ADDR: u16 = 0x20;
pub const RM3100_REVID_EXPECTED: u8 = 0x22;

pub const RM3100_POLL: u8 = 0x00;
pub const RM3100_CMM: u8 = 0x01;

pub const RM3100_CCX_1: u8 = 0x04;
pub const RM3100_CCX_0: u8 = 0x05;
pub const RM3100_CCY_1: u8 = 0x06;
pub const RM3100_CCY_0: u8 = 0x07;
pub const RM3100_CCZ_1: u8 = 0x08;
pub const RM3100_CCZ_0: u8 = 0x09;
pub const RM3100_NOS: u8 = 0x0A;
pub const RM3100_TMRC: u8 = 0x0B;

pub const RM3100_XYZ: u8 = 0x24;
pub const RM3100_XYZ_SIZE: usize = 9;

pub const RM3100_BIST: u8 = 0x33;
pub const RM3100_STATUS: u8 = 0x34;
pub const RM3100_HSHAKE: u8 = 0x35;
pub const RM3100_REVID: u8 = 0x36;

pub const RM3100_STATUS_DRDY: u8 = 0x80;

// POLL : axes à mesurer
pub const RM3100_POLL_X: u8 = 0x10;
pub const RM3100_POLL_Y: u8 = 0x20;
pub const RM3100_POLL_Z: u8 = 0x40;
pub const RM3100_POLL_XYZ: u8 = RM3100_POLL_X | RM3100_POLL_Y | RM3100_POLL_Z;

// CMM : démarrage + axes
pub const RM3100_CMM_START: u8 = 0x01;
pub const RM3100_CMM_DRDM: u8 = 0x04;
pub const RM3100_CMM_X: u8 = 0x10;
pub const RM3100_CMM_Y: u8 = 0x20;
pub const RM3100_CMM_Z: u8 = 0x40;
pub const RM3100_CMM_ALL: u8 = RM3100_CMM_START | RM3100_CMM_X | RM3100_CMM_Y | RM3100_CMM_Z;

// Bloc CCX_1..NOS relu après configuration
pub const RM3100_CC_BLOCK_SIZE: usize = 7;
