use super::*;
use crate::virtual_machine::isa::Instruction::*;
use crate::virtual_machine::ports::ScriptedPorts;

const TEST_CAPACITY: usize = 64;

/// Machine whose `WAIT` halts the run, with no input.
fn boot(image: &[Cell]) -> VM<ScriptedPorts> {
    boot_with(image, TEST_CAPACITY, ScriptedPorts::new([]).halt_on_wait())
}

fn boot_with(image: &[Cell], capacity: usize, ports: ScriptedPorts) -> VM<ScriptedPorts> {
    VM::new(
        Image::load(image, capacity).expect("image load failed"),
        ports,
    )
}

fn run_vm(image: &[Cell]) -> VM<ScriptedPorts> {
    let mut vm = boot(image);
    vm.run().expect("vm run faulted");
    vm
}

fn run_and_get_data(image: &[Cell]) -> Vec<Cell> {
    run_vm(image).data_stack().as_slice().to_vec()
}

fn run_expect_fault(mut vm: VM<ScriptedPorts>) -> Fault {
    let fault = vm.run().expect_err("expected a fault");
    assert!(vm.is_halted());
    fault
}

// ==================== Stack ====================

#[test]
fn lit_pushes_operand_and_skips_it() {
    let vm = run_vm(&cells![Lit, 42, Lit, -7, Wait]);
    assert_eq!(vm.data_stack().as_slice(), &[42, -7]);
    assert_eq!(vm.ip(), 5);
    assert_eq!(vm.steps(), 3);
}

#[test]
fn nop_only_advances() {
    let vm = run_vm(&cells![Nop, Nop, Wait]);
    assert!(vm.data_stack().is_empty());
    assert_eq!(vm.ip(), 3);
}

#[test]
fn dup_drop_swap() {
    assert_eq!(run_and_get_data(&cells![Lit, 5, Dup, Wait]), vec![5, 5]);
    assert_eq!(run_and_get_data(&cells![Lit, 1, Lit, 2, Drop, Wait]), vec![1]);
    assert_eq!(
        run_and_get_data(&cells![Lit, 1, Lit, 2, Swap, Wait]),
        vec![2, 1]
    );
}

#[test]
fn push_pop_move_between_stacks() {
    let vm = run_vm(&cells![Lit, 9, Push, Wait]);
    assert!(vm.data_stack().is_empty());
    assert_eq!(vm.address_stack().as_slice(), &[9]);

    let vm = run_vm(&cells![Lit, 9, Push, Lit, 3, Pop, Wait]);
    assert_eq!(vm.data_stack().as_slice(), &[3, 9]);
    assert!(vm.address_stack().is_empty());
}

// ==================== Arithmetic ====================

#[test]
fn add_sub_mul() {
    assert_eq!(run_and_get_data(&cells![Lit, 2, Lit, 3, Add, Wait]), vec![5]);
    assert_eq!(run_and_get_data(&cells![Lit, 10, Lit, 3, Sub, Wait]), vec![7]);
    assert_eq!(run_and_get_data(&cells![Lit, 3, Lit, 10, Sub, Wait]), vec![-7]);
    assert_eq!(run_and_get_data(&cells![Lit, -4, Lit, 6, Mul, Wait]), vec![-24]);
}

#[test]
fn arithmetic_wraps() {
    assert_eq!(
        run_and_get_data(&cells![Lit, Cell::MAX, Lit, 1, Add, Wait]),
        vec![Cell::MIN]
    );
    assert_eq!(
        run_and_get_data(&cells![Lit, Cell::MIN, Lit, 1, Sub, Wait]),
        vec![Cell::MAX]
    );
    assert_eq!(
        run_and_get_data(&cells![Lit, Cell::MAX, Inc, Wait]),
        vec![Cell::MIN]
    );
    assert_eq!(
        run_and_get_data(&cells![Lit, Cell::MIN, Dec, Wait]),
        vec![Cell::MAX]
    );
}

#[test]
fn inc_dec() {
    assert_eq!(run_and_get_data(&cells![Lit, 41, Inc, Wait]), vec![42]);
    assert_eq!(run_and_get_data(&cells![Lit, 0, Dec, Wait]), vec![-1]);
}

#[test]
fn divmod_pushes_remainder_then_quotient() {
    assert_eq!(run_and_get_data(&cells![Lit, 7, Lit, 2, DivMod, Wait]), vec![1, 3]);
    // truncates toward zero
    assert_eq!(
        run_and_get_data(&cells![Lit, -7, Lit, 2, DivMod, Wait]),
        vec![-1, -3]
    );
    assert_eq!(
        run_and_get_data(&cells![Lit, 7, Lit, -2, DivMod, Wait]),
        vec![1, -3]
    );
}

#[test]
fn divmod_min_by_minus_one_wraps() {
    assert_eq!(
        run_and_get_data(&cells![Lit, Cell::MIN, Lit, -1, DivMod, Wait]),
        vec![0, Cell::MIN]
    );
}

#[test]
fn bitwise_ops() {
    assert_eq!(run_and_get_data(&cells![Lit, 12, Lit, 10, And, Wait]), vec![8]);
    assert_eq!(run_and_get_data(&cells![Lit, 12, Lit, 10, Or, Wait]), vec![14]);
    assert_eq!(run_and_get_data(&cells![Lit, 12, Lit, 10, Xor, Wait]), vec![6]);
}

#[test]
fn shifts() {
    assert_eq!(run_and_get_data(&cells![Lit, 1, Lit, 4, Shl, Wait]), vec![16]);
    assert_eq!(run_and_get_data(&cells![Lit, 256, Lit, 4, Shr, Wait]), vec![16]);
    // logical right shift
    assert_eq!(run_and_get_data(&cells![Lit, -1, Lit, 28, Shr, Wait]), vec![15]);
    assert_eq!(
        run_and_get_data(&cells![Lit, 1, Lit, 31, Shl, Wait]),
        vec![Cell::MIN]
    );
}

#[test]
fn shift_counts_outside_cell_width_give_zero() {
    assert_eq!(run_and_get_data(&cells![Lit, 1, Lit, 32, Shl, Wait]), vec![0]);
    assert_eq!(run_and_get_data(&cells![Lit, -1, Lit, 40, Shr, Wait]), vec![0]);
    assert_eq!(run_and_get_data(&cells![Lit, 1, Lit, -1, Shl, Wait]), vec![0]);
    assert_eq!(run_and_get_data(&cells![Lit, 8, Lit, -3, Shr, Wait]), vec![0]);
}

// ==================== Memory ====================

#[test]
fn store_then_fetch() {
    let vm = run_vm(&cells![Lit, 99, Lit, 40, Store, Lit, 40, Fetch, Wait]);
    assert_eq!(vm.data_stack().as_slice(), &[99]);
    assert_eq!(vm.image().read(40).unwrap(), 99);
}

#[test]
fn fetch_reads_code_cells() {
    // images are self-describing: code is data
    assert_eq!(run_and_get_data(&cells![Lit, 0, Fetch, Wait]), vec![1]);
}

#[test]
fn store_can_patch_code_ahead() {
    // overwrite the NOP at 7 with INC
    let vm = run_vm(&cells![Lit, Inc, Lit, 7, Store, Lit, 1, Nop, Wait]);
    assert_eq!(vm.data_stack().as_slice(), &[2]);
}

// ==================== Control flow ====================

#[test]
fn jump_is_absolute() {
    let data = run_and_get_data(&cells![Jump, 4, Lit, 1, Lit, 2, Wait]);
    assert_eq!(data, vec![2]);
}

#[test]
fn call_pushes_operand_address_and_return_resumes_after_call() {
    // 0: CALL 5 ; 2: LIT 7 ; 4: WAIT ; 5: LIT 3 ; 7: RETURN
    let image = cells![Call, 5, Lit, 7, Wait, Lit, 3, Return];
    let mut vm = boot(&image);
    vm.step().unwrap();
    assert_eq!(vm.ip(), 5);
    assert_eq!(vm.address_stack().as_slice(), &[1]);
    vm.run().unwrap();
    assert_eq!(vm.data_stack().as_slice(), &[3, 7]);
    assert!(vm.address_stack().is_empty());
}

#[test]
fn return_to_seeded_address() {
    // 0: RETURN ; 1: NOP ; 2: LIT 7 ; 4: WAIT
    let mut vm = boot(&cells![Return, Nop, Lit, 7, Wait]);
    vm.address_stack_mut().push(1).unwrap();
    vm.step().unwrap();
    assert_eq!(vm.ip(), 2);
    assert!(vm.address_stack().is_empty());
    vm.run().unwrap();
    assert_eq!(vm.data_stack().as_slice(), &[7]);
}

#[test]
fn return_address_can_be_rewritten_with_push_pop() {
    // subroutine at 8 bumps its return address past the `LIT 1`
    // 0: CALL 8 ; 2: LIT 1 ; 4: LIT 2 ; 6: WAIT ; 8: POP INC INC PUSH RETURN
    let mut image = cells![Call, 8, Lit, 1, Lit, 2, Wait, Nop];
    image.extend(cells![Pop, Inc, Inc, Push, Return]);
    assert_eq!(run_and_get_data(&image), vec![2]);
}

#[test]
fn zero_exit_returns_on_zero() {
    // 0: CALL 5 ; 2: WAIT ; 5: ZERO_EXIT ; 6: LIT 9 ; 8: RETURN
    let image = cells![Call, 5, Wait, Nop, Nop, ZeroExit, Lit, 9, Return];

    let mut vm = boot(&image);
    vm.data_stack_mut().push(0).unwrap();
    vm.run().unwrap();
    assert!(vm.data_stack().is_empty());
    assert!(vm.address_stack().is_empty());
    assert_eq!(vm.ip(), 3);

    let mut vm = boot(&image);
    vm.data_stack_mut().push(4).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.data_stack().as_slice(), &[4, 9]);
    assert!(vm.address_stack().is_empty());
}

#[test]
fn conditional_jumps_over_sign_combinations() {
    type Cmp = fn(Cell, Cell) -> bool;
    let cases: [(Instruction, Cmp); 4] = [
        (GtJump, |x, y| x > y),
        (LtJump, |x, y| x < y),
        (NeJump, |x, y| x != y),
        (EqJump, |x, y| x == y),
    ];
    for (instr, cmp) in cases {
        for x in -1..=1 {
            for y in -1..=1 {
                // 0: LIT x ; 2: LIT y ; 4: Jcc 10 ; 6: LIT 0 ; 8: WAIT ; 10: LIT 1 ; 12: WAIT
                let image = cells![Lit, x, Lit, y, instr, 10, Lit, 0, Wait, Nop, Lit, 1, Wait];
                let mut vm = boot(&image);
                vm.step().unwrap();
                vm.step().unwrap();
                vm.step().unwrap();
                let taken = cmp(x, y);
                let expected_ip = if taken { 10 } else { 6 };
                assert_eq!(
                    vm.ip(),
                    expected_ip,
                    "{} {x} {y}",
                    instr.mnemonic()
                );
                assert!(vm.data_stack().is_empty(), "{} pops both", instr.mnemonic());
                vm.run().unwrap();
                assert_eq!(
                    vm.data_stack().as_slice(),
                    &[Cell::from(taken)],
                    "{} {x} {y}",
                    instr.mnemonic()
                );
            }
        }
    }
}

/// Main calls a chain of `levels` subroutines; each one calls the next,
/// then outputs its index and returns. The last one is a leaf.
fn nested_calls(levels: usize) -> Vec<Cell> {
    let mut image = cells![Call, 3, Wait];
    for i in 0..levels {
        let base = image.len() as Cell;
        let k = i as Cell;
        if i + 1 < levels {
            image.extend(cells![Call, base + 6, Lit, k, Out, Return]);
        } else {
            image.extend(cells![Lit, k, Out, Return]);
        }
    }
    image
}

#[test]
fn nested_calls_up_to_address_capacity() {
    const DEPTH: usize = 8;
    let image = nested_calls(DEPTH);
    let mut vm = VM::with_depths(
        Image::load(&image, 128).unwrap(),
        ScriptedPorts::new([]).halt_on_wait(),
        16,
        DEPTH,
    );
    vm.run().unwrap();
    let expected: Vec<Cell> = (0..DEPTH as Cell).rev().collect();
    assert_eq!(vm.ports().output(), expected.as_slice());
    assert!(vm.address_stack().is_empty());
}

#[test]
fn nested_calls_past_address_capacity_overflow() {
    const DEPTH: usize = 8;
    let image = nested_calls(DEPTH + 1);
    let vm = VM::with_depths(
        Image::load(&image, 128).unwrap(),
        ScriptedPorts::new([]).halt_on_wait(),
        16,
        DEPTH,
    );
    let fault = run_expect_fault(vm);
    assert_eq!(
        fault.error,
        VMError::StackOverflow {
            stack: StackKind::Address,
            capacity: DEPTH
        }
    );
}

// ==================== Ports ====================

#[test]
fn out_emits_in_order() {
    let vm = run_vm(&cells![Lit, 72, Out, Lit, 105, Out, Wait]);
    assert_eq!(vm.ports().output(), &[72, 105]);
    assert!(vm.data_stack().is_empty());
}

#[test]
fn echo_until_input_exhausted() {
    let image = cells![In, Out, Jump, 0];
    let mut vm = boot_with(&image, image.len(), ScriptedPorts::new(*b"HI"));
    let report = vm.run().expect("echo faulted");
    assert_eq!(vm.ports().output(), &[72, 73]);
    assert!(vm.is_halted());
    // the final IN did not complete
    assert_eq!(report.ip, 0);
    assert!(vm.data_stack().is_empty());
}

#[test]
fn add_output_wait_scenario() {
    let image = cells![Lit, 5, Add, Out, Wait];
    let mut vm = boot_with(&image, 16, ScriptedPorts::new([]).halt_on_wait());
    vm.data_stack_mut().push(10).unwrap();
    let report = vm.run().unwrap();
    assert_eq!(vm.ports().output(), &[15]);
    assert_eq!(report.steps, 4);
    assert_eq!(report.ip, 5);
}

#[test]
fn wait_without_halt_mapping_continues() {
    let image = cells![Wait, Wait, In];
    let mut vm = boot_with(&image, 8, ScriptedPorts::new([]));
    vm.run().unwrap();
    assert_eq!(vm.ports().waits(), 2);
    assert_eq!(vm.ip(), 2);
}

#[test]
fn in_without_room_keeps_input() {
    let image = cells![Lit, 1, In];
    let mut vm = VM::with_depths(
        Image::load(&image, 8).unwrap(),
        ScriptedPorts::new([65]),
        1,
        4,
    );
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 2);
    assert!(matches!(fault.error, VMError::StackOverflow { stack: StackKind::Data, .. }));
    assert_eq!(vm.ports().remaining_input(), 1);
}

// ==================== Halt ====================

#[test]
fn halt_is_checked_after_each_instruction() {
    let mut vm = boot(&cells![Nop, Nop, Nop, Wait]);
    vm.ports().halt_signal().raise();
    let report = vm.run().unwrap();
    assert_eq!(report.steps, 1);
    assert_eq!(report.ip, 1);
}

#[test]
fn stepping_a_halted_machine_is_a_noop() {
    let mut vm = run_vm(&cells![Lit, 1, Wait, Lit, 2]);
    let steps = vm.steps();
    let ip = vm.ip();
    assert_eq!(vm.step(), Ok(Status::Halted));
    assert_eq!(vm.step(), Ok(Status::Halted));
    assert_eq!(vm.steps(), steps);
    assert_eq!(vm.ip(), ip);
    assert_eq!(vm.data_stack().as_slice(), &[1]);
}

#[test]
fn run_for_bounds_execution() {
    let mut vm = boot(&cells![Jump, 0]);
    assert_eq!(vm.run_for(10), Ok(Status::Running));
    assert_eq!(vm.steps(), 10);
    assert_eq!(vm.ip(), 0);
    assert!(!vm.is_halted());
}

#[test]
fn run_for_stops_at_halt() {
    let mut vm = boot(&cells![Nop, Wait, Nop]);
    assert_eq!(vm.run_for(10), Ok(Status::Halted));
    assert_eq!(vm.steps(), 2);
}

// ==================== Faults ====================

#[test]
fn invalid_opcode_is_fatal() {
    let mut vm = boot(&cells![Lit, 1, 99]);
    let fault = vm.run().unwrap_err();
    assert_eq!(
        fault,
        Fault {
            ip: 2,
            error: VMError::InvalidOpcode { opcode: 99 }
        }
    );
    assert!(vm.is_halted());
    assert_eq!(vm.data_stack().as_slice(), &[1]);
    assert_eq!(vm.step(), Ok(Status::Halted));
}

#[test]
fn division_by_zero_is_fatal_and_keeps_operands() {
    let mut vm = boot(&cells![Lit, 7, Lit, 0, DivMod]);
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 4);
    assert_eq!(fault.error, VMError::DivisionByZero);
    assert_eq!(vm.data_stack().as_slice(), &[7, 0]);
}

#[test]
fn fetch_out_of_bounds() {
    let mut vm = boot(&cells![Lit, 1000, Fetch]);
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 2);
    assert_eq!(
        fault.error,
        VMError::OutOfBounds {
            addr: 1000,
            capacity: TEST_CAPACITY
        }
    );
    assert_eq!(vm.data_stack().as_slice(), &[1000]);
}

#[test]
fn store_out_of_bounds_leaves_stack_and_memory() {
    let mut vm = boot(&cells![Lit, 1, Lit, -1, Store]);
    let before = vm.image().as_slice().to_vec();
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 4);
    assert!(matches!(fault.error, VMError::OutOfBounds { addr: -1, .. }));
    assert_eq!(vm.data_stack().as_slice(), &[1, -1]);
    assert_eq!(vm.image().as_slice(), before.as_slice());
}

#[test]
fn jump_outside_image_faults_without_moving_ip() {
    let mut vm = boot(&cells![Nop, Jump, 500]);
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 1);
    assert_eq!(vm.ip(), 1);
    assert!(matches!(fault.error, VMError::OutOfBounds { addr: 500, .. }));
}

#[test]
fn call_outside_image_keeps_address_stack() {
    let mut vm = boot(&cells![Call, -3]);
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 0);
    assert!(vm.address_stack().is_empty());
}

#[test]
fn fall_through_past_image_end_faults() {
    let mut vm = boot_with(&cells![Nop], 1, ScriptedPorts::new([]));
    let fault = vm.run().unwrap_err();
    assert_eq!(
        fault,
        Fault {
            ip: 0,
            error: VMError::OutOfBounds {
                addr: 1,
                capacity: 1
            }
        }
    );
    assert_eq!(vm.ip(), 0);
    assert_eq!(vm.steps(), 0);
}

#[test]
fn lit_operand_past_image_end_faults() {
    let mut vm = boot_with(&cells![Nop, Lit], 2, ScriptedPorts::new([]));
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 1);
    assert!(vm.data_stack().is_empty());
}

#[test]
fn underflow_leaves_stack_untouched() {
    for instr in [Add, Swap, Store, DivMod, GtJump] {
        let mut image = cells![Lit, 5, instr];
        if instr.operand_cells() == 1 {
            image.push(0);
        }
        let mut vm = boot(&image);
        let fault = vm.run().unwrap_err();
        assert_eq!(fault.ip, 2, "{}", instr.mnemonic());
        assert_eq!(
            fault.error,
            VMError::StackUnderflow {
                stack: StackKind::Data
            },
            "{}",
            instr.mnemonic()
        );
        assert_eq!(vm.data_stack().as_slice(), &[5], "{}", instr.mnemonic());
    }
}

#[test]
fn return_with_empty_address_stack_underflows() {
    let fault = run_expect_fault(boot(&cells![Return]));
    assert_eq!(
        fault.error,
        VMError::StackUnderflow {
            stack: StackKind::Address
        }
    );
}

#[test]
fn push_onto_full_address_stack_keeps_data() {
    let image = cells![Lit, 1, Push];
    let mut vm = VM::with_depths(
        Image::load(&image, 8).unwrap(),
        ScriptedPorts::new([]),
        4,
        0,
    );
    let fault = vm.run().unwrap_err();
    assert_eq!(
        fault.error,
        VMError::StackOverflow {
            stack: StackKind::Address,
            capacity: 0
        }
    );
    assert_eq!(vm.data_stack().as_slice(), &[1]);
}

#[test]
fn dup_on_full_data_stack_overflows() {
    let image = cells![Lit, 1, Dup];
    let mut vm = VM::with_depths(
        Image::load(&image, 8).unwrap(),
        ScriptedPorts::new([]),
        1,
        4,
    );
    let fault = vm.run().unwrap_err();
    assert_eq!(fault.ip, 2);
    assert_eq!(vm.data_stack().as_slice(), &[1]);
}
