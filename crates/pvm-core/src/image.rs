//! Accesseur de l'image exécutable packée (spec §3, §6).
//!
//! L'image est un buffer en lecture seule, fourni de l'extérieur, packé
//! octet par octet, en little-endian. Le parsing ne copie jamais :
//! [`Image`] emprunte les octets et résout les offsets à la demande,
//! conformément à l'instruction des Design Notes d'exprimer les
//! enregistrements packés comme des parseurs octet par octet sur un slice
//! emprunté, sans hypothèse d'alignement.

use crate::cell::{Cell, CellWidth};

/// Version de VM que ce build du cœur supporte. Une image dont l'octet
/// `vm_version` ne correspond pas est rejetée par [`Image::check`] avant
/// toute autre lecture.
pub const VM_VERSION: u8 = 1;

const FUNCTION_RECORD_LEN: usize = 5; // address:u16 + arguments_count:u8 + variables_count:u8 + packed:u8

/// Raisons pour lesquelles [`Image::check`] peut refuser une image (spec §6 `check`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// Le buffer est trop court pour contenir ne serait-ce qu'un en-tête fixe.
    #[error("image too short for a header")]
    Truncated,
    /// `vm_version` ne correspond pas à [`VM_VERSION`].
    #[error("wrong vm_version")]
    WrongVersion,
    /// La taille de section recalculée ne correspond pas au champ `size`
    /// déclaré, ou la taille déclarée ne tient pas dans le buffer fourni.
    #[error("wrong size")]
    WrongSize,
}

/// Une vue analysée et empruntée sur une image exécutable packée.
#[derive(Debug, Clone, Copy)]
pub struct Image<'a> {
    bytes: &'a [u8],
    functions_count: u8,
    constants_count: u8,
    main_variables_count: u8,
    functions_offset: usize,
    constants_offset: usize,
    code_offset: usize,
    cell_width: CellWidth,
}

/// Une entrée de la table des fonctions de l'image (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDesc {
    /// Offset de code (fonction utilisateur) ou index dans la table des fonctions natives.
    pub address: u16,
    /// Nombre d'arguments déclarés (non variadiques).
    pub arguments_count: u8,
    /// Nombre de variables locales au-delà des arguments.
    pub variables_count: u8,
    /// Nombre de cellules retournées par la fonction.
    pub returns_count: u8,
    /// Si CAL doit d'abord dépiler un nombre d'arguments supplémentaires.
    pub is_variadic: bool,
    /// Si `address` indexe la table des fonctions natives de l'hôte plutôt que du code.
    pub is_built_in: bool,
}

impl FunctionDesc {
    fn parse(raw: &[u8; FUNCTION_RECORD_LEN]) -> Self {
        let address = u16::from_le_bytes([raw[0], raw[1]]);
        let arguments_count = raw[2];
        let variables_count = raw[3];
        let packed = raw[4];
        FunctionDesc {
            address,
            arguments_count,
            variables_count,
            returns_count: packed & 0b0011_1111,
            is_variadic: packed & 0b0100_0000 != 0,
            is_built_in: packed & 0b1000_0000 != 0,
        }
    }

    /// Taille combinée de la fenêtre arguments + locales pour un appel non variadique.
    pub fn locals_len(&self) -> usize {
        self.arguments_count as usize + self.variables_count as usize
    }
}

impl<'a> Image<'a> {
    /// Analyse et valide `bytes` comme image exécutable packée, en utilisant
    /// la largeur de cellule par défaut (32 bits) pour le pool de constantes.
    ///
    /// Voir [`Image::check_with_width`] pour les builds à cellules étroites.
    pub fn check(bytes: &'a [u8]) -> Result<Self, CheckError> {
        Self::check_with_width(bytes, CellWidth::Bits32)
    }

    /// Analyse et valide `bytes`, en utilisant `cell_width` pour le pool de constantes.
    pub fn check_with_width(bytes: &'a [u8], cell_width: CellWidth) -> Result<Self, CheckError> {
        // vm_version (1) + size (2) + functions_count (1) + constants_count (1)
        // + main_variables_count (1)
        if bytes.len() < 6 {
            return Err(CheckError::Truncated);
        }
        let vm_version = bytes[0];
        if vm_version != VM_VERSION {
            return Err(CheckError::WrongVersion);
        }
        let size = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        let functions_count = bytes[3];
        let constants_count = bytes[4];
        let main_variables_count = bytes[5];

        let functions_offset = 6;
        let functions_len = functions_count as usize * FUNCTION_RECORD_LEN;
        let constants_offset = functions_offset + functions_len;
        let constants_len = constants_count as usize * cell_width.byte_len();
        let code_offset = constants_offset + constants_len;

        // `size` couvre tout ce qui suit le champ `size` lui-même : les
        // trois octets de comptage, la table des fonctions, le pool de
        // constantes, et le code.
        let accounted_before_code = 3 + functions_len + constants_len;
        if accounted_before_code > size {
            return Err(CheckError::WrongSize);
        }
        let code_len = size - accounted_before_code;
        let total_len = 3 + size; // vm_version + champ size + les octets couverts par size
        if bytes.len() < total_len || code_offset + code_len != total_len {
            return Err(CheckError::WrongSize);
        }

        Ok(Image {
            bytes,
            functions_count,
            constants_count,
            main_variables_count,
            functions_offset,
            constants_offset,
            code_offset,
            cell_width,
        })
    }

    /// Nombre de fonctions dans la table des fonctions.
    pub fn functions_count(&self) -> u8 {
        self.functions_count
    }

    /// Nombre d'entrées dans le pool de constantes.
    pub fn constants_count(&self) -> u8 {
        self.constants_count
    }

    /// Nombre de locales réservées pour la frame main implicite.
    pub fn main_variables_count(&self) -> u8 {
        self.main_variables_count
    }

    /// Récupère le descripteur de fonction `idx`, ou `None` si hors limites.
    pub fn function(&self, idx: u8) -> Option<FunctionDesc> {
        if idx >= self.functions_count {
            return None;
        }
        let start = self.functions_offset + idx as usize * FUNCTION_RECORD_LEN;
        let raw: [u8; FUNCTION_RECORD_LEN] = self.bytes[start..start + FUNCTION_RECORD_LEN]
            .try_into()
            .expect("slice length matches FUNCTION_RECORD_LEN");
        Some(FunctionDesc::parse(&raw))
    }

    /// Récupère la constante `idx`, étendue en signe vers un [`Cell`]
    /// complet, ou `None` si hors limites.
    pub fn constant(&self, idx: u8) -> Option<Cell> {
        if idx >= self.constants_count {
            return None;
        }
        let width = self.cell_width.byte_len();
        let start = self.constants_offset + idx as usize * width;
        let raw = &self.bytes[start..start + width];
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(raw);
        Some(self.cell_width.widen(u32::from_le_bytes(buf)))
    }

    /// La section de code : octets d'instructions, adressés depuis zéro.
    pub fn code(&self) -> &'a [u8] {
        &self.bytes[self.code_offset..]
    }
}
