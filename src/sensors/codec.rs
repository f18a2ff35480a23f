//! Conversion entre valeurs typées et octets de registres.

use super::error::SensorError;

/// Table cycle count -> gain (LSB/µT), seuils croissants
pub const GAIN_TABLE: [(u16, u16); 5] = [(50, 20), (100, 38), (200, 75), (300, 113), (400, 150)];

/// Table fréquence CMM (Hz) -> valeur du registre TMRC
pub const SAMPLE_RATE_TABLE: [(u16, u8); 8] = [
    (2, 0x0A),
    (4, 0x09),
    (8, 0x08),
    (16, 0x07),
    (31, 0x06),
    (62, 0x05),
    (125, 0x04),
    (220, 0x03),
];

/// Résolution du MCP9808 (°C par LSB)
pub const CELSIUS_PER_LSB: f32 = 0.0625;

/// Découpe un cycle count en (poids fort, poids faible)
pub fn encode_cycle_count(count: u16) -> (u8, u8) {
    ((count >> 8) as u8, (count & 0xFF) as u8)
}

pub fn decode_cycle_count(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

/// Mesure 24 bits signée, gros-boutiste. Le premier octet porte le signe.
pub fn decode_sample24(bytes: [u8; 3]) -> i32 {
    (bytes[0] as i8 as i32) * 65536 + (bytes[1] as i32) * 256 + bytes[2] as i32
}

/// Inverse de `decode_sample24` (valeur tronquée à 24 bits)
pub fn encode_sample24(value: i32) -> [u8; 3] {
    let v = (value as u32) & 0x00FF_FFFF;
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

/// Température 13 bits en complément à deux (les 3 bits de poids fort du
/// premier octet sont des drapeaux d'alarme, ignorés)
pub fn decode_temperature13(byte0: u8, byte1: u8) -> i32 {
    let raw = (byte0 & 0x1F) as i32 * 256 + byte1 as i32;
    if raw > 4095 {
        raw - 8192
    } else {
        raw
    }
}

pub fn temperature_celsius(raw: i32) -> f32 {
    raw as f32 * CELSIUS_PER_LSB
}

/// Gain correspondant au plus petit seuil >= `cc`.
///
/// Au-delà de la table, retourne `GainTableExceeded` avec le dernier gain
/// connu, à l'appelant de décider quoi en faire.
pub fn gain_for_cycle_count(cc: u16) -> Result<u16, SensorError> {
    match GAIN_TABLE.iter().find(|(threshold, _)| cc <= *threshold) {
        Some((_, gain)) => Ok(*gain),
        None => Err(SensorError::GainTableExceeded {
            cycle_count: cc,
            clamped: GAIN_TABLE[GAIN_TABLE.len() - 1].1,
        }),
    }
}

/// Plus petite fréquence supportée >= `hz` (la plus rapide sinon).
/// Retourne (fréquence retenue, code TMRC).
pub fn sample_rate_code(hz: u16) -> (u16, u8) {
    SAMPLE_RATE_TABLE
        .iter()
        .find(|(rate, _)| hz <= *rate)
        .copied()
        .unwrap_or(SAMPLE_RATE_TABLE[SAMPLE_RATE_TABLE.len() - 1])
}
