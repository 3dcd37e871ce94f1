//! Le type [`Vm`] : `check`/`reset`/`step` (l'API cœur à quatre opérations
//! de la spec §6, moins `now_ms` qui vit sur [`Host`]).
//!
//! Ceci relie [`image::Image`], les deux piles de taille fixe, et un
//! [`Host`] dans la boucle coopérative mono-thread décrite par les Design
//! Notes : "porte de minuterie → vérification des bornes du compteur de
//! programme → fetch d'un opcode → decode → execute → (éventuellement)
//! émission d'une ligne de trace de debug".

use crate::cell::CellWidth;
use crate::error::{StepOutcome, VmError, VmResult};
use crate::frame::CallStack;
use crate::host::Host;
use crate::image::{CheckError, Image};
use crate::stack::DataStack;
use crate::{decode, exec};

/// Configuration à la construction d'un [`Vm`]. `N` et `M` (les capacités
/// des piles de données et d'appels) sont des génériques const sur `Vm`
/// lui-même, pas ici — ceci ne couvre que la largeur de cellule et l'octet
/// `persist.binding`, des valeurs qui restent fixes à travers `reset`
/// (spec §3 "persist").
#[derive(Debug, Clone, Copy, Default)]
pub struct VmConfig {
    /// Largeur d'une cellule étroite sur disque (pool de constantes) ; le
    /// registre de travail est toujours un [`crate::Cell`] complet.
    pub cell_width: CellWidth,
    /// Un octet défini par l'utilisateur qui survit à `reset`, opaque pour la VM elle-même.
    pub binding: u8,
}

/// Un interpréteur de bytecode à pile lié à une seule image exécutable.
///
/// `N` est la capacité en cellules de la pile de données, `M` la capacité
/// en frames de la pile d'appels — toutes deux fixées à la compilation de
/// sorte que la VM n'alloue jamais (spec §1, §3 : "quelques dizaines
/// d'octets de RAM... quelques kilooctets de code").
pub struct Vm<'img, const N: usize, const M: usize> {
    image: Image<'img>,
    config: VmConfig,
    data: DataStack<N>,
    calls: CallStack<M>,
    pc: u16,
    timer: u32,
    timeout: u32,
}

impl<'img, const N: usize, const M: usize> Vm<'img, N, M> {
    /// Valide `bytes` comme image (spec §6 `check`) et lie une nouvelle VM
    /// à celle-ci, déjà `reset`.
    pub fn new(bytes: &'img [u8], config: VmConfig) -> Result<Self, CheckError> {
        let image = Image::check_with_width(bytes, config.cell_width)?;
        let mut vm = Vm {
            image,
            config,
            data: DataStack::new(),
            calls: CallStack::new(),
            pc: 0,
            timer: 0,
            timeout: 0,
        };
        vm.reset();
        Ok(vm)
    }

    /// Remet à zéro tout état transitoire et réserve les locales de main
    /// (spec §3 "Lifecycle", §6 `reset`). `persist` (la config passée à
    /// [`Vm::new`]) n'est pas touchée.
    pub fn reset(&mut self) {
        self.data = DataStack::new();
        self.calls.clear();
        self.pc = 0;
        self.timer = 0;
        self.timeout = 0;
        self.data.set_len(self.image.main_variables_count() as usize);
    }

    /// Compteur de programme courant (offset en octets dans la région de code).
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Nombre d'entrées vivantes sur la pile de données.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Nombre de frames d'appel vivantes (0 signifie que la frame main
    /// implicite est active).
    pub fn call_depth(&self) -> usize {
        self.calls.len()
    }

    /// L'octet défini par l'utilisateur porté dans [`VmConfig::binding`].
    pub fn binding(&self) -> u8 {
        self.config.binding
    }

    /// Exécute au plus une instruction (spec §6 `step`).
    ///
    /// Ordre, calqué exactement sur le flux de contrôle du §2 : porte de
    /// minuterie, puis vérification des bornes de `pc`, puis
    /// fetch/decode/execute, puis (feature `trace`) une ligne de trace de debug.
    pub fn step<H: Host>(&mut self, host: &mut H) -> StepOutcome {
        if self.timer != 0 {
            let elapsed = host.now_ms().wrapping_sub(self.timer);
            if elapsed < self.timeout {
                return StepOutcome::Ok;
            }
        }

        let code = self.image.code();
        if self.pc as usize >= code.len() {
            return StepOutcome::Err(VmError::PcOverrun);
        }

        let opcode = code[self.pc as usize];
        self.pc = self.pc.wrapping_add(1);

        let result = self.step_inner(opcode, host);

        #[cfg(feature = "trace")]
        crate::trace::emit(self.pc.wrapping_sub(1), opcode, &self.data, &result);

        StepOutcome::from(result)
    }

    fn step_inner<H: Host>(&mut self, opcode: u8, host: &mut H) -> VmResult<()> {
        let instr = decode::decode(opcode, &mut self.data)?;
        exec::execute(
            instr,
            &self.image,
            &mut self.data,
            &mut self.calls,
            &mut self.pc,
            &mut self.timer,
            &mut self.timeout,
            host,
        )
    }
}
