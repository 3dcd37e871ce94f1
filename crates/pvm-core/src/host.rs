//! Horloge fournie par l'intégrateur et table des fonctions natives (spec §5, §6).
//!
//! La VM est générique sur une seule implémentation `Host` plutôt que de
//! stocker un trait object boxé, si bien qu'un intégrateur `no_std`/sans
//! allocation ne paie rien pour une indirection dont il n'a pas besoin —
//! conforme à l'instruction des Design Notes selon laquelle la table des
//! fonctions natives est "un vecteur de trait objects / valeurs de fonction
//! fournies à la construction ; la VM en détient un emprunt, pas la
//! propriété", adaptée ici en emprunt statique via des génériques plutôt
//! qu'un `Vec`.

use crate::cell::Cell;
use crate::error::{VmError, VmResult};

/// Tout ce dont la VM a besoin de son environnement d'intégration : une
/// horloge monotone, et un dispatcheur pour les fonctions natives nommées par CAL.
///
/// Les fonctions natives s'exécutent en ligne sur le fil de l'appelant et ne
/// peuvent muter que la fenêtre d'arguments/retours qui leur est confiée ;
/// elles ne doivent pas rappeler [`crate::Vm::step`] (spec §5).
pub trait Host {
    /// Millisecondes monotones, tolérantes au débordement par soustraction
    /// (spec §6). Doit être non décroissante et insensible aux changements
    /// d'horloge murale.
    fn now_ms(&self) -> u32;

    /// Invoque la fonction native `index` avec sa fenêtre d'arguments/retours.
    ///
    /// `window` a pour longueur `max(args_count, returns_count)` dans le
    /// tableau sous-jacent de la pile de données ; l'hôte doit écrire
    /// exactement `returns_count` cellules à partir de `window[0]` avant de
    /// retourner (la VM ne revérifie pas combien ont été écrites — c'est le
    /// `returns_count` du descripteur, pas la parole de l'hôte, qui décide
    /// du nouveau sommet de pile).
    ///
    /// Renvoie [`VmError::BuiltinNoFunction`] si `index` n'est pas reconnu par cet hôte.
    fn call_builtin(
        &mut self,
        index: u16,
        window: &mut [Cell],
        args_count: u8,
    ) -> VmResult<()>;
}

/// Une fonction native [`Host`] implémentée comme simple pointeur de
/// fonction, pour les intégrateurs qui préfèrent une table de
/// correspondance à un `match` écrit à la main dans `call_builtin`.
pub type BuiltinFn<H> = fn(host: &mut H, window: &mut [Cell], args_count: u8) -> VmResult<()>;

/// Une entrée d'une table de fonctions natives à pointeurs de fonction.
pub struct Builtin<H> {
    /// Index de table auquel cette entrée répond.
    pub index: u16,
    /// La fonction à invoquer.
    pub func: BuiltinFn<H>,
}

/// Distribue `index` contre une table d'entrées [`Builtin`], pour les
/// intégrateurs qui préfèrent composer [`Host::call_builtin`] à partir d'un
/// slice constant plutôt que d'écrire leur propre `match`.
pub fn dispatch<H>(
    table: &[Builtin<H>],
    host: &mut H,
    index: u16,
    window: &mut [Cell],
    args_count: u8,
) -> VmResult<()> {
    for entry in table {
        if entry.index == index {
            return (entry.func)(host, window, args_count);
        }
    }
    Err(VmError::BuiltinNoFunction)
}
