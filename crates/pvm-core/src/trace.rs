//! Formatage des lignes de trace de debug (spec §6 "Debug trace"), sous
//! feature-gate pour qu'un intégrateur sans `tracing` ne paie rien pour ça.
//!
//! Une ligne par [`crate::vm::Vm::step`], de la forme
//! `PC:<pc> <mnemonic> [operands] {stack-top-down}`. Ce module ne fait que
//! formater et émettre ; il n'influence jamais le flux de contrôle.

use core::fmt;

use crate::error::VmResult;
use crate::stack::DataStack;

/// Émet un événement `tracing::trace!` décrivant l'instruction qui vient
/// d'être fetchée à `pc` et la pile de données après coup.
///
/// `pc` est l'adresse de l'octet d'opcode lui-même (déjà dé-avancée par
/// l'appelant), conformément à la remarque du §7 selon laquelle l'adresse
/// d'une instruction en échec est `pc − 1` après l'incrément du fetch.
pub fn emit<const N: usize>(pc: u16, opcode: u8, stack: &DataStack<N>, result: &VmResult<()>) {
    let mnemonic = mnemonic(opcode);
    let top = TopDown(stack);
    match result {
        Ok(()) => tracing::trace!(pc, opcode, mnemonic, stack = %top, "step"),
        Err(e) => tracing::trace!(pc, opcode, mnemonic, stack = %top, error = %e, "step failed"),
    }
}

/// Affiche les cellules vivantes d'une [`DataStack`] sommet en premier sous
/// la forme `{a, b, c}`, en n'utilisant que `core::fmt` pour que la feature
/// `trace` reste utilisable sous des builds `alloc` seule.
struct TopDown<'a, const N: usize>(&'a DataStack<N>);

impl<const N: usize> fmt::Display for TopDown<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for depth in 0..self.0.len() {
            if depth > 0 {
                f.write_str(", ")?;
            }
            // `peek` ne peut pas échouer pour `depth < stack.len()`.
            write!(f, "{}", self.0.peek(depth).unwrap_or(0))?;
        }
        f.write_str("}")
    }
}

/// Le mnémonique §4.4 pour un octet d'opcode fetché, indépendamment de
/// toute résolution d'opérande (purement display ; [`crate::decode::decode`]
/// fait autorité sur la sémantique).
fn mnemonic(opcode: u8) -> &'static str {
    if opcode & 0x80 == 0 {
        return "PSH";
    }
    if opcode & 0x40 != 0 {
        return match (opcode >> 4) & 0b11 {
            0b00 => "JMP",
            0b01 => "CAL",
            0b10 => "LDV",
            _ => "STV",
        };
    }
    let bits = opcode & 0x3F;
    if bits & 0x20 == 0 {
        return "PSC";
    }
    if bits & 0x10 == 0 {
        return if bits & 0x08 != 0 {
            match bits & 0b111 {
                0 => "ADD",
                1 => "SUB",
                2 => "MUL",
                3 => "DIV",
                4 => "PWR",
                5 => "AND",
                6 => "IOR",
                _ => "XOR",
            }
        } else {
            match bits & 0b111 {
                0 => "BZE",
                1 => "BNZ",
                2 => "BEQ",
                3 => "BNE",
                4 => "BGT",
                5 => "BLT",
                6 => "BGE",
                _ => "BLE",
            }
        };
    }
    if bits & 0x08 != 0 {
        return if bits & 0x04 != 0 {
            "POP"
        } else {
            match bits & 0b11 {
                0 => "NEG",
                1 => "INV",
                2 => "INC",
                _ => "DEC",
            }
        };
    }
    if bits & 0x04 != 0 {
        return if bits & 0x02 != 0 {
            if bits & 0x01 != 0 { "JMB" } else { "LDC" }
        } else if bits & 0x01 != 0 {
            "RET"
        } else {
            "SLP"
        };
    }
    "SKIP"
}
