// End-to-end: assemble a patch from source, run it frame by frame, and
// check the DAC output against hand-computed expectations. Complements the
// per-module unit tests, which cover the VM's and assembler's pieces in
// isolation.

use fv1::Vm;

#[test]
fn gain_patch_halves_the_input() {
    let mut vm = Vm::from_source(
        "RDAX ADCL, 0.5\n\
         WRAX DACL, 0\n\
         RDAX ADCR, 0.5\n\
         WRAX DACR, 0\n",
    )
    .unwrap();
    let (l, r) = vm.process(0.8, -0.4, 0.0, 0.0, 0.0);
    assert!((l - 0.4).abs() < 1e-3);
    assert!((r + 0.2).abs() < 1e-3);
}

#[test]
fn delay_patch_echoes_a_sample_one_frame_later() {
    let mut vm = Vm::from_source(
        "RDAX ADCL, 1.0\n\
         WRA 0, 0\n\
         RDA 1, 1.0\n\
         WRAX DACL, 0\n",
    )
    .unwrap();
    let (first, _) = vm.process(0.5, 0.0, 0.0, 0.0, 0.0);
    assert_eq!(first, 0.0);
    let (second, _) = vm.process(0.0, 0.0, 0.0, 0.0, 0.0);
    assert!((second - 0.5).abs() < 1e-2);
}

#[test]
fn skp_run_flag_only_skips_the_setup_block_after_the_first_frame() {
    // On frame 1, RUN isn't taken: the SOF block runs and DACL gets 1.0.
    // On every later frame it skips straight past the SOF, leaving ACC (and
    // so DACL, written with scale 0) at whatever it carried over — zero,
    // since frame 1's own WRAX already reset it.
    let mut vm = Vm::from_source(
        "SKP RUN, skip\n\
         SOF 0, 1.0\n\
         skip: WRAX DACL, 0\n",
    )
    .unwrap();
    let (first, _) = vm.process(0.0, 0.0, 0.0, 0.0, 0.0);
    assert!((first - 1.0).abs() < 1e-3);
    let (second, _) = vm.process(0.0, 0.0, 0.0, 0.0, 0.0);
    assert_eq!(second, 0.0);
}

#[test]
fn an_unknown_mnemonic_is_rejected_before_anything_runs() {
    assert!(Vm::from_source("FROBNICATE 1, 2\n").is_err());
}

#[test]
fn a_program_with_pot_labels_surfaces_them_after_assembly() {
    let vm = Vm::from_source(
        "RDAX POT0, 1.0 ; POT0: drive\n\
         WRAX DACL, 0\n",
    )
    .unwrap();
    assert_eq!(vm.pot_labels(), &["POT0: drive".to_string()]);
}

#[test]
fn rom_round_trip_through_disassembly_is_readable() {
    let patch = fv1::Patch::assemble("MULX 7\nWRAX DACL, 0\n").unwrap();
    let mut rom = Vec::new();
    for instr in &patch.instructions {
        rom.extend_from_slice(&fv1::opcode::encode(instr).to_be_bytes());
    }
    let lines = fv1::disasm::disassemble_rom(&rom);
    assert_eq!(lines[0], "MULX 7");
}
