//! pvm-cli — intégrateur CLI pour `pvm-core`.
//!
//! Lit une image exécutable packée depuis le disque, lie un [`pvm_core::Vm`]
//! à celle-ci, installe deux fonctions natives d'exemple (`print` à l'index
//! 0, `clock` à l'index 1 — la paire utilisée par les exemples travaillés
//! de l'interface externe de la VM), et pilote `step()` en boucle jusqu'à
//! une issue autre que `ok`.

use std::{fs, path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use pvm_core::error::StepOutcome;
use pvm_core::vm::{Vm, VmConfig};
use pvm_core::{Cell, Host, VmError};

/// Capacité de la pile de données, en cellules (spec §3 : "typiquement 30").
const DATA_STACK_CAPACITY: usize = 30;
/// Capacité de la pile d'appels, en frames (spec §3 : "typiquement 10").
const CALL_STACK_CAPACITY: usize = 10;

/// Index de table natif pour `print`.
const BUILTIN_PRINT: u16 = 0;
/// Index de table natif pour `clock`.
const BUILTIN_CLOCK: u16 = 1;

/// Point d'entrée appelé par `main()`.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "pvm_core=trace"
                    .parse()
                    .expect("static directive always parses"),
            ))
            .init();
    }

    let bytes = fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;

    let config = VmConfig { cell_width: cli.cell_width.into(), binding: cli.binding };
    let mut vm: Vm<'_, DATA_STACK_CAPACITY, CALL_STACK_CAPACITY> = Vm::new(&bytes, config)
        .map_err(|e| anyhow::anyhow!("invalid image: {e}"))?;

    let mut host = ClockHost::new();
    let mut steps = 0u64;
    loop {
        if let Some(budget) = cli.steps {
            if steps >= budget {
                bail!("step budget ({budget}) exhausted without termination");
            }
        }
        match vm.step(&mut host) {
            StepOutcome::Ok => {}
            StepOutcome::MainReturn => {
                eprintln!("program terminated normally after {steps} step(s)");
                return Ok(());
            }
            StepOutcome::Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("at pc={}, step {steps}", vm.pc()));
            }
        }
        steps += 1;
    }
}

#[derive(Parser, Debug)]
#[command(name = "pvm", version, about = "Run a packed pvm bytecode image")]
struct Cli {
    /// Chemin vers l'image exécutable packée.
    image: PathBuf,

    /// Arrête avec une erreur après ce nombre de pas au lieu de tourner indéfiniment.
    #[arg(long)]
    steps: Option<u64>,

    /// Émet un événement de tracing par pas à `pvm_core=trace`.
    #[arg(long)]
    trace: bool,

    /// Largeur de cellule constante sur disque.
    #[arg(long, value_enum, default_value_t = CellWidthArg::Bits32)]
    cell_width: CellWidthArg,

    /// L'octet `binding` persistant passé à la VM (spec §3).
    #[arg(long, default_value_t = 0)]
    binding: u8,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CellWidthArg {
    Bits8,
    Bits16,
    Bits32,
}

impl From<CellWidthArg> for pvm_core::CellWidth {
    fn from(value: CellWidthArg) -> Self {
        match value {
            CellWidthArg::Bits8 => pvm_core::CellWidth::Bits8,
            CellWidthArg::Bits16 => pvm_core::CellWidth::Bits16,
            CellWidthArg::Bits32 => pvm_core::CellWidth::Bits32,
        }
    }
}

/// L'hôte d'exemple : une horloge monotone plus les fonctions natives `print`/`clock`.
struct ClockHost {
    start: Instant,
}

impl ClockHost {
    fn new() -> Self {
        ClockHost { start: Instant::now() }
    }
}

impl Host for ClockHost {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn call_builtin(&mut self, index: u16, window: &mut [Cell], args_count: u8) -> Result<(), VmError> {
        match index {
            BUILTIN_PRINT => {
                let args = &window[..args_count as usize];
                let rendered = args
                    .iter()
                    .map(Cell::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{rendered}");
                Ok(())
            }
            BUILTIN_CLOCK => {
                window[0] = self.now_ms() as Cell;
                Ok(())
            }
            _ => Err(VmError::BuiltinNoFunction),
        }
    }
}
