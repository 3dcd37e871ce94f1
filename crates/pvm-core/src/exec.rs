//! Exécution des instructions (spec §4.2–§4.5) : la seconde fonction
//! demandée par les Design Notes, qui prend l'[`Instruction`] fournie par
//! [`crate::decode::decode`] et mute l'état de la VM en conséquence.

use crate::cell::Cell;
use crate::decode::{BinaryOp, BranchTest, Instruction, UnaryOp};
use crate::error::{VmError, VmResult};
use crate::frame::{ActiveFrame, CallStack, Frame};
use crate::host::Host;
use crate::image::Image;
use crate::stack::DataStack;

/// Convention de déplacement de branchement (spec §4.2) : compense le `pc`
/// déjà avancé et un encodage de skip historique. `JMP`/`JMB` et les
/// branchements conditionnels appliquent tous la même règle.
pub fn branch_target(pc: u16, d: i32) -> u16 {
    let d = if d < 0 { d - 2 } else { d };
    (pc as i32).wrapping_add(d).wrapping_add(1) as u16
}

fn apply_binary(op: BinaryOp, second: Cell, value: Cell) -> Cell {
    match op {
        BinaryOp::Add => second.wrapping_add(value),
        BinaryOp::Sub => second.wrapping_sub(value),
        BinaryOp::Mul => second.wrapping_mul(value),
        BinaryOp::Div => {
            if value == 0 {
                0
            } else {
                second.wrapping_div(value)
            }
        }
        BinaryOp::Pwr => {
            if value <= 0 {
                1
            } else {
                let mut result: Cell = 1;
                for _ in 0..value {
                    result = result.wrapping_mul(second);
                }
                result
            }
        }
        BinaryOp::And => second & value,
        BinaryOp::Ior => second | value,
        BinaryOp::Xor => second ^ value,
    }
}

fn apply_unary(op: UnaryOp, value: Cell) -> Cell {
    match op {
        UnaryOp::Neg => value.wrapping_neg(),
        UnaryOp::Inv => !value,
        UnaryOp::Inc => value.wrapping_add(1),
        UnaryOp::Dec => value.wrapping_sub(1),
    }
}

fn branch_taken(test: BranchTest, second: Cell) -> bool {
    match test {
        BranchTest::Bze | BranchTest::Beq => second == 0,
        BranchTest::Bnz | BranchTest::Bne => second != 0,
        BranchTest::Bgt => second > 0,
        BranchTest::Blt => second < 0,
        BranchTest::Bge => second >= 0,
        BranchTest::Ble => second <= 0,
    }
}

/// Bornes du paramètre de LDV/STV contre la frame active (spec §4.3).
fn variable_window(active: &ActiveFrame, image: &Image<'_>, param: i32) -> VmResult<usize> {
    if param < 0 {
        return Err(VmError::NoVariable);
    }
    // Seule une frame utilisateur nécessite de chercher son descripteur ;
    // `variable_limit` ignore cette valeur pour `Main`.
    let locals_len = match active {
        ActiveFrame::Main { .. } => 0,
        ActiveFrame::User(f) => {
            let desc = image.function(f.function_index).ok_or(VmError::NoVariable)?;
            desc.locals_len()
        }
    };
    let limit = active.variable_limit(locals_len);
    if param as i64 >= limit as i64 {
        return Err(VmError::NoVariable);
    }
    let abs = active.variables_start() + param as usize;
    Ok(abs)
}

/// Exécute une instruction déjà décodée.
///
/// `pc` a déjà été avancé au-delà de l'octet d'opcode (spec §4 : le fetch
/// qui a produit `instr` l'a incrémenté). Renvoie `Ok(())` pour un pas
/// normal, `Err(VmError::MainReturn)` à la fin normale du programme, ou la
/// [`VmError`] en échec sinon — exactement la répartition en trois cas que
/// modélise [`crate::StepOutcome`].
#[allow(clippy::too_many_arguments)]
pub fn execute<const N: usize, const M: usize, H: Host>(
    instr: Instruction,
    image: &Image<'_>,
    stack: &mut DataStack<N>,
    calls: &mut CallStack<M>,
    pc: &mut u16,
    timer: &mut u32,
    timeout: &mut u32,
    host: &mut H,
) -> VmResult<()> {
    match instr {
        Instruction::Psh(v) => stack.push(v),

        Instruction::Psc(low5) => {
            let v = stack.pop()?;
            stack.push((v.wrapping_shl(5)) | (low5 as Cell))
        }

        Instruction::PopN(n) => stack.pop_n(n as usize),

        Instruction::Unary(op) => {
            let v = stack.pop()?;
            stack.push(apply_unary(op, v))
        }

        Instruction::Binary(op) => {
            let value = stack.pop()?;
            let second = stack.pop()?;
            stack.push(apply_binary(op, second, value))
        }

        Instruction::Branch(test) => {
            let value = stack.pop()?;
            let mut second = stack.pop()?;
            if test.needs_third_operand() {
                let third = stack.pop()?;
                second = second.wrapping_sub(third);
            }
            if branch_taken(test, second) {
                *pc = branch_target(*pc, value);
            }
            Ok(())
        }

        Instruction::Jmp(d) => {
            *pc = branch_target(*pc, d);
            Ok(())
        }

        Instruction::Jmb => {
            let v = stack.pop()?;
            *pc = branch_target(*pc, v.wrapping_neg());
            Ok(())
        }

        Instruction::Ldc => {
            let idx = stack.pop()?;
            if idx < 0 || idx as u32 >= image.constants_count() as u32 {
                return Err(VmError::NoConstant);
            }
            let c = image.constant(idx as u8).ok_or(VmError::NoConstant)?;
            stack.push(c)
        }

        Instruction::Slp => {
            let v = stack.pop()?;
            *timer = host.now_ms();
            if *timer == 0 {
                *timer = 1; // timer==0 signifie "pas de sommeil en cours" (spec §3) ; ne jamais stocker un vrai zéro.
            }
            *timeout = v.max(0) as u32;
            Ok(())
        }

        Instruction::Ldv(param) => {
            let active = calls.current(image.main_variables_count());
            let abs = variable_window(&active, image, param)?;
            let v = stack.get(abs)?;
            stack.push(v)
        }

        Instruction::Stv(param) => {
            let active = calls.current(image.main_variables_count());
            let abs = variable_window(&active, image, param)?;
            let v = stack.pop()?;
            stack.set(abs, v)
        }

        Instruction::Skip => Ok(()),

        Instruction::Cal(param) => exec_call(param, image, stack, calls, pc, host),

        Instruction::Ret => exec_return(image, stack, calls, pc),
    }
}

fn exec_call<const N: usize, const M: usize, H: Host>(
    param: i32,
    image: &Image<'_>,
    stack: &mut DataStack<N>,
    calls: &mut CallStack<M>,
    pc: &mut u16,
    host: &mut H,
) -> VmResult<()> {
    if param < 0 || param as u32 >= image.functions_count() as u32 {
        return Err(VmError::ExeNoFunction);
    }
    // Ordre des étapes de la spec : la vérification de pile d'appels pleine
    // se fait avant de savoir si le descripteur est natif (§4.5 étape 2
    // précède étape 3/6), donc elle s'applique uniformément même si un
    // appel natif ne pousse jamais de frame.
    if calls.len() >= calls.capacity() {
        return Err(VmError::CallStackOverflow);
    }

    let desc = image.function(param as u8).ok_or(VmError::ExeNoFunction)?;

    let base_args = desc.arguments_count as usize;
    let args = if desc.is_variadic {
        let k = stack.pop()?;
        if k < 0 {
            return Err(VmError::VariadicSize);
        }
        let total = base_args + k as usize;
        if total > 255 {
            return Err(VmError::VariadicSize);
        }
        total
    } else {
        base_args
    };

    if stack.len() < args {
        return Err(VmError::ArgOutOfStack);
    }
    let call_stack_start = stack.len() - args;

    let free = stack.capacity() - stack.len();
    if free < desc.variables_count as usize {
        return Err(VmError::VarOutOfStack);
    }
    if free < desc.returns_count as usize {
        return Err(VmError::ReturnOutOfStack);
    }

    if desc.is_built_in {
        let window_len = args.max(desc.returns_count as usize);
        let window = stack.window_mut(call_stack_start, window_len)?;
        host.call_builtin(desc.address, window, args as u8)?;
        stack.set_len(call_stack_start + desc.returns_count as usize);
    } else {
        calls.push(Frame {
            return_address: *pc,
            variables_start: call_stack_start,
            arguments_count: args as u8,
            function_index: param as u8,
        })?;
        for _ in 0..desc.variables_count {
            stack.push(0)?;
        }
        *pc = desc.address;
    }
    Ok(())
}

fn exec_return<const N: usize, const M: usize>(
    image: &Image<'_>,
    stack: &mut DataStack<N>,
    calls: &mut CallStack<M>,
    pc: &mut u16,
) -> VmResult<()> {
    let frame = calls.pop()?; // Err(MainReturn) se propage directement.
    let desc = image
        .function(frame.function_index)
        .ok_or(VmError::ExeNoFunction)?;

    let stack_start = frame.variables_start;
    let returns_count = desc.returns_count as usize;
    if stack.len() < returns_count {
        return Err(VmError::ReturnOutOfStack);
    }
    let returns_start = stack.len() - returns_count;
    let expected_returns_start =
        stack_start + frame.arguments_count as usize + desc.variables_count as usize;
    if expected_returns_start != returns_start {
        return Err(VmError::DataStackSmashed);
    }

    for i in 0..returns_count {
        let v = stack.get(returns_start + i)?;
        stack.set(stack_start + i, v)?;
    }
    stack.set_len(stack_start + returns_count);
    *pc = frame.return_address;
    Ok(())
}
