//! Taxonomie d'erreurs stable (spec §6, §7) plus les issues de step non-erreur.

/// Alias de résultat utilisé dans tout le cœur.
pub type VmResult<T> = Result<T, VmError>;

/// Tout ce qu'un seul [`crate::Vm::step`] peut remonter à l'intégrateur.
///
/// `Ok` et `MainReturn` ne sont pas des échecs : `MainReturn` est le signal
/// de fin normale (RET exécuté sans frame utilisateur vivante, §4.5), et
/// `Ok` signifie que l'instruction s'est exécutée (ou que la porte de
/// sommeil a retenu le pas) sans incident. Toute autre variante est une
/// [`VmError`] à laquelle l'intégrateur doit réagir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Le pas s'est exécuté normalement (ou a été suspendu par un sommeil en cours).
    Ok,
    /// `RET` exécuté sans frame utilisateur vivante — fin de programme normale.
    MainReturn,
    /// Le pas a échoué ; aucun état de la VM n'a été annulé.
    Err(VmError),
}

impl From<VmResult<()>> for StepOutcome {
    fn from(r: VmResult<()>) -> Self {
        match r {
            Ok(()) => StepOutcome::Ok,
            Err(VmError::MainReturn) => StepOutcome::MainReturn,
            Err(e) => StepOutcome::Err(e),
        }
    }
}

/// Ordinaux d'erreur stables (spec §6 "Error taxonomy").
///
/// `MainReturn` fait aussi office de `call_stack_underflow` : RET sans frame
/// sur la pile d'appels n'est pas un malfonctionnement de la VM, c'est la
/// façon dont un programme dit "j'ai terminé" (spec §4.5, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// RET exécuté avec une pile d'appels vide : fin normale.
    #[error("main return (call stack underflow)")]
    MainReturn,
    /// CAL tenté alors que la pile d'appels est déjà pleine.
    #[error("call stack overflow")]
    CallStackOverflow,
    /// Un pop a été tenté sur une pile de données vide.
    #[error("data stack underflow")]
    DataStackUnderflow,
    /// Un push a été tenté sur une pile de données pleine.
    #[error("data stack overflow")]
    DataStackOverflow,
    /// La fenêtre d'arguments de CAL ne tient pas sous le sommet de pile courant.
    #[error("arg out of stack")]
    ArgOutOfStack,
    /// Pas assez de place au-dessus du sommet pour réserver les locales d'une fonction appelée.
    #[error("var out of stack")]
    VarOutOfStack,
    /// Pas assez de place au-dessus du sommet pour réserver les retours d'une fonction appelée.
    #[error("return out of stack")]
    ReturnOutOfStack,
    /// RET a trouvé la pile déséquilibrée par rapport à la forme déclarée de l'appelée.
    #[error("data stack smashed")]
    DataStackSmashed,
    /// `pc` a atteint ou dépassé la fin de la section de code.
    #[error("pc overrun")]
    PcOverrun,
    /// L'index de fonction de CAL dépasse la table des fonctions de l'image.
    #[error("exe: no such function")]
    ExeNoFunction,
    /// CAL a visé un index de fonction native que l'hôte ne reconnaît pas.
    #[error("builtin: no such function")]
    BuiltinNoFunction,
    /// LDV/STV a adressé une variable hors de la fenêtre de la frame courante.
    #[error("no such variable")]
    NoVariable,
    /// LDC a adressé une constante hors du pool de constantes de l'image.
    #[error("no such constant")]
    NoConstant,
    /// Le nombre d'arguments supplémentaires dépilé par un CAL variadique a fait dépasser 255 à `args`.
    #[error("variadic size out of range")]
    VariadicSize,
}
