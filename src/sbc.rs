use std::fmt::Write;

use crate::i2c::bus_path;

/// Carte connue et bus I2C exposé par sa distribution par défaut
#[derive(Debug, Clone, Copy)]
pub struct KnownBus {
    pub board: &'static str,
    pub bus: u8,
}

pub const KNOWN_BUSES: &[KnownBus] = &[
    KnownBus { board: "Khadas Edge bus 3", bus: 3 },
    KnownBus { board: "Khadas VIM3 bus 3", bus: 3 },
    KnownBus { board: "Khadas VIM3 bus 4", bus: 4 },
    KnownBus { board: "NV Xavier bus 8", bus: 8 },
    KnownBus { board: "NV Nano bus 1", bus: 1 },
    KnownBus { board: "Odroid C0 bus 1", bus: 1 },
    KnownBus { board: "Odroid C1 bus 1", bus: 1 },
    KnownBus { board: "Odroid C2 bus 1", bus: 1 },
    KnownBus { board: "Odroid C4 bus 2", bus: 2 },
    KnownBus { board: "Odroid C4 bus 3", bus: 3 },
    KnownBus { board: "Odroid N2 bus 2", bus: 2 },
    KnownBus { board: "Odroid N2 bus 3", bus: 3 },
    KnownBus { board: "Odroid N2+ bus 0", bus: 0 },
    KnownBus { board: "Odroid N2+ bus 1", bus: 1 },
    KnownBus { board: "Raspberry Pi 3/4", bus: 1 },
];

/// Tableau affiché par `-a`
pub fn list_known_buses() -> String {
    let mut out = String::new();
    out.push_str("\nCartes connues (distributions Linux par défaut).\n");
    out.push_str("  Le device tree peut renommer ou supprimer ces bus, utiliser -b pour choisir.\n\n");
    let _ = writeln!(out, " {:>5}  {:<20} {:<12} {}", "Index", "Carte", "Chemin", "Bus");
    for (index, known) in KNOWN_BUSES.iter().enumerate() {
        let _ = writeln!(out, " {:>5}  {:<20} {:<12} {}", index, known.board, bus_path(known.bus), known.bus);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_board() {
        let table = list_known_buses();
        assert_eq!(table.lines().filter(|l| l.contains("/dev/i2c-")).count(), KNOWN_BUSES.len());
        assert!(table.contains("Raspberry Pi 3/4"));
    }
}
