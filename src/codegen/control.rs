//! Structured control-flow helpers over the block primitives.
//!
//! Translators express guards and scans with these; the helpers realize the
//! usual diamond / header-body-exit shapes through the facade so both
//! backends see the same block structure.

use super::proxy::Bool;
use super::{ProgramBuilder, ProgramRef};

/// `if (cond) { then_fn() }`.
pub fn if_then<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    cond: &Bool<B>,
    then_fn: impl FnOnce(),
) {
    let (then_block, end_block) = {
        let mut pb = program.borrow_mut();
        let then_block = pb.generate_block();
        let end_block = pb.generate_block();
        pb.cond_branch(cond.value(), then_block, end_block);
        pb.set_current_block(then_block);
        (then_block, end_block)
    };
    let _ = then_block;

    then_fn();

    let mut pb = program.borrow_mut();
    pb.branch(end_block);
    pb.set_current_block(end_block);
}

/// `if (cond) { then_fn() } else { else_fn() }`.
pub fn if_then_else<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    cond: &Bool<B>,
    then_fn: impl FnOnce(),
    else_fn: impl FnOnce(),
) {
    let (else_block, end_block) = {
        let mut pb = program.borrow_mut();
        let then_block = pb.generate_block();
        let else_block = pb.generate_block();
        let end_block = pb.generate_block();
        pb.cond_branch(cond.value(), then_block, else_block);
        pb.set_current_block(then_block);
        (else_block, end_block)
    };

    then_fn();

    {
        let mut pb = program.borrow_mut();
        pb.branch(end_block);
        pb.set_current_block(else_block);
    }

    else_fn();

    let mut pb = program.borrow_mut();
    pb.branch(end_block);
    pb.set_current_block(end_block);
}

/// `init(); while (cond()) { body() }`.
///
/// The condition is evaluated in the loop header, so loop-carried state must
/// live in alloca slots (see the proxies' `assign_to`).
pub fn loop_while<B: ProgramBuilder>(
    program: &ProgramRef<B>,
    init: impl FnOnce(),
    cond: impl FnOnce() -> Bool<B>,
    body: impl FnOnce(),
) {
    init();

    let header = {
        let mut pb = program.borrow_mut();
        let header = pb.generate_block();
        pb.branch(header);
        pb.set_current_block(header);
        header
    };

    let continue_cond = cond();

    let (body_block, end_block) = {
        let mut pb = program.borrow_mut();
        let body_block = pb.generate_block();
        let end_block = pb.generate_block();
        pb.cond_branch(continue_cond.value(), body_block, end_block);
        pb.set_current_block(body_block);
        (body_block, end_block)
    };
    let _ = body_block;

    body();

    let mut pb = program.borrow_mut();
    pb.branch(header);
    pb.set_current_block(end_block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::proxy::Int32;
    use crate::codegen::{program_ref, SourceProgram};
    use std::rc::Rc;

    fn setup() -> ProgramRef<SourceProgram> {
        let mut pb = SourceProgram::new();
        let void = pb.type_void();
        pb.create_public_function("compute", void, &[]);
        program_ref(pb)
    }

    #[test]
    fn test_if_then_shape() {
        let program = setup();
        let a = Int32::constant(Rc::clone(&program), 1);
        let b = Int32::constant(Rc::clone(&program), 2);
        let cond = a.lt(&b);

        if_then(&program, &cond, || {
            let _ = &a + &b;
        });
        program.borrow_mut().ret_void();

        let src = program.borrow().to_source();
        assert!(src.contains("if (v2) { goto b1; } else { goto b2; }"));
        assert!(src.contains("b1:;"));
        assert!(src.contains("b2:;"));
    }

    #[test]
    fn test_loop_shape() {
        let program = setup();
        let slot = {
            let mut pb = program.borrow_mut();
            let i32t = pb.type_i32();
            pb.alloca(i32t)
        };

        loop_while(
            &program,
            || {
                Int32::constant(Rc::clone(&program), 0).assign_to(slot);
            },
            || {
                let cur = Int32::new(
                    Rc::clone(&program),
                    program.borrow_mut().load(slot),
                );
                cur.lt(&Int32::constant(Rc::clone(&program), 10))
            },
            || {
                let cur = Int32::new(
                    Rc::clone(&program),
                    program.borrow_mut().load(slot),
                );
                let one = Int32::constant(Rc::clone(&program), 1);
                (&cur + &one).assign_to(slot);
            },
        );
        program.borrow_mut().ret_void();

        let src = program.borrow().to_source();
        // Header evaluates the condition and branches; the body jumps back.
        assert!(src.contains("goto b1;"));
        assert!(src.contains("if (v4) { goto b2; } else { goto b3; }"));
    }
}
