use std::rc::Rc;

use berylc_bc::{Irep, OpCode, PoolValue};
use berylc_util::{Diagnostics, SymbolTable};

use crate::generate;

fn compile(source: &str) -> (Rc<Irep>, SymbolTable) {
    let mut diags = Diagnostics::new();
    let outcome = berylc_par::parse_program(source, &mut diags);
    assert!(
        !diags.has_errors(),
        "parse errors for {source:?}: {:?}",
        diags.iter().collect::<Vec<_>>()
    );
    let mut symtab = SymbolTable::new();
    let irep = generate(&outcome.program, &mut symtab, Some("test.rb"))
        .unwrap_or_else(|e| panic!("codegen failed for {source:?}: {e}"));
    (irep, symtab)
}

fn opcodes(irep: &Irep) -> Vec<OpCode> {
    irep.iseq.iter().map(|i| i.opcode()).collect()
}

fn all_opcodes(irep: &Irep) -> Vec<OpCode> {
    let mut ops = opcodes(irep);
    for child in &irep.reps {
        ops.extend(all_opcodes(child));
    }
    ops
}

#[test]
fn test_empty_program_stops() {
    let (irep, _) = compile("");
    assert_eq!(opcodes(&irep), vec![OpCode::Loadnil, OpCode::Stop]);
}

#[test]
fn test_top_level_ends_with_stop() {
    let (irep, _) = compile("1 + 2");
    assert_eq!(irep.iseq.last().unwrap().opcode(), OpCode::Stop);
}

#[test]
fn test_local_assignment_folds_move() {
    // in statement position the peephole retargets LOADI into the local
    let (irep, _) = compile("a = 1\nnil");
    let loadi = irep.iseq[0];
    assert_eq!(loadi.opcode(), OpCode::Loadi);
    assert_eq!(loadi.arg_a(), 1, "value should land in the local register");
}

#[test]
fn test_assignment_in_value_position_keeps_copy() {
    // as the program's value, the assigned temp must stay live
    let (irep, _) = compile("a = 1");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Move), "got: {ops:?}");
}

#[test]
fn test_addi_peephole() {
    let (irep, _) = compile("x = 1\ny = x + 2");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Addi), "got: {ops:?}");
    assert!(!ops.contains(&OpCode::Add), "got: {ops:?}");
}

#[test]
fn test_subi_peephole() {
    let (irep, _) = compile("x = 9\ny = x - 3");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Subi), "got: {ops:?}");
}

#[test]
fn test_send_argc() {
    let (irep, symtab) = compile("foo(1, 2)");
    let send = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Send)
        .expect("no SEND emitted");
    assert_eq!(send.arg_c(), 2);
    assert_eq!(symtab.name(irep.syms[send.arg_b()]), "foo");
}

#[test]
fn test_splat_call_bundles_arguments() {
    let (irep, _) = compile("a = []\nfoo(1, *a)");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Arycat), "got: {ops:?}");
    let send = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Send)
        .expect("no SEND emitted");
    assert_eq!(send.arg_c() as u16, berylc_bc::CALL_MAXARGS);
}

#[test]
fn test_enter_jump_table_invariant() {
    // k optionals produce exactly k+1 JMP slots after ENTER
    for (src, k) in [
        ("def f(a, b = 1) end", 1usize),
        ("def f(a, b = 1, c = 2) end", 2),
        ("def f(a, b = 1, c = 2, d = 3) end", 3),
    ] {
        let (irep, _) = compile(src);
        let method = &irep.reps[0];
        assert_eq!(method.iseq[0].opcode(), OpCode::Enter, "in {src}");
        let jumps = method.iseq[1..]
            .iter()
            .take_while(|i| i.opcode() == OpCode::Jmp)
            .count();
        assert_eq!(jumps, k + 1, "in {src}");
    }
}

#[test]
fn test_def_emits_tclass_lambda_method() {
    let (irep, _) = compile("def m; 1; end");
    let ops = opcodes(&irep);
    let tclass = ops.iter().position(|o| *o == OpCode::Tclass).unwrap();
    let lambda = ops.iter().position(|o| *o == OpCode::Lambda).unwrap();
    let method = ops.iter().position(|o| *o == OpCode::Method).unwrap();
    assert!(tclass < lambda && lambda < method);
    assert_eq!(irep.reps.len(), 1);
}

#[test]
fn test_method_body_returns() {
    let (irep, _) = compile("def m; 42; end");
    let body = &irep.reps[0];
    let last = body.iseq.last().unwrap();
    assert_eq!(last.opcode(), OpCode::Return);
    assert_eq!(last.arg_b() as u16, berylc_bc::RETURN_NORMAL);
}

#[test]
fn test_class_emits_class_and_exec() {
    let (irep, _) = compile("class A < B\ndef m; end\nend");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Class));
    assert!(ops.contains(&OpCode::Exec));
}

#[test]
fn test_while_jumps_backward() {
    let (irep, _) = compile("i = 0\nwhile i < 10\ni += 1\nend");
    let back = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Jmpif && i.arg_sbx() < 0);
    assert!(back.is_some(), "no backward JMPIF: {:?}", opcodes(&irep));
}

#[test]
fn test_block_call_uses_sendb() {
    let (irep, _) = compile("3.times { |i| i }");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Sendb), "got: {ops:?}");
    assert!(ops.contains(&OpCode::Lambda));
    let block = &irep.reps[0];
    assert_eq!(block.iseq[0].opcode(), OpCode::Enter);
}

#[test]
fn test_block_writes_outer_local_through_env() {
    let (irep, _) = compile("a = []\n3.times { |i| a << i }");
    let block = &irep.reps[0];
    let ops = opcodes(block);
    assert!(ops.contains(&OpCode::Getupvar), "got: {ops:?}");
}

#[test]
fn test_for_body_assigns_upvar() {
    let (irep, _) = compile("for i in 1..3\ni\nend");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Range));
    assert!(ops.contains(&OpCode::Sendb));
    let body = &irep.reps[0];
    let body_ops = opcodes(body);
    assert_eq!(body.iseq[0].opcode(), OpCode::Enter);
    assert!(body_ops.contains(&OpCode::Setupvar), "got: {body_ops:?}");
    // `for` reuses the enclosing scope's locals
    assert_eq!(body.nlocals, 1);
    assert_eq!(irep.nlocals, 2);
}

#[test]
fn test_rescue_scaffolding() {
    let (irep, _) = compile("begin\n1\nrescue TypeError => e\n2\nend");
    let ops = opcodes(&irep);
    for expected in [
        OpCode::Onerr,
        OpCode::Poperr,
        OpCode::Rescue,
        OpCode::Raise,
    ] {
        assert!(ops.contains(&expected), "missing {expected}: {ops:?}");
    }
}

#[test]
fn test_ensure_scaffolding() {
    let (irep, _) = compile("begin\n1\nensure\n2\nend");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Epush), "got: {ops:?}");
    assert!(ops.contains(&OpCode::Epop), "got: {ops:?}");
    assert_eq!(irep.reps.len(), 1, "ensure clause compiles to a child");
}

#[test]
fn test_literal_pooling_shares_duplicates() {
    let (irep, _) = compile("a = \"dup\"\nb = \"dup\"\nc = \"other\"");
    let strings = irep
        .pool
        .iter()
        .filter(|p| matches!(p, PoolValue::Str(_)))
        .count();
    assert_eq!(strings, 2, "pool: {:?}", irep.pool);
}

#[test]
fn test_zsuper_uses_argary() {
    let (irep, _) = compile("def m\nsuper\nend");
    let body = &irep.reps[0];
    let ops = opcodes(body);
    assert!(ops.contains(&OpCode::Argary), "got: {ops:?}");
    assert!(ops.contains(&OpCode::Super));
}

#[test]
fn test_yield_uses_blkpush() {
    let (irep, _) = compile("def m\nyield 1\nend");
    let body = &irep.reps[0];
    let ops = opcodes(body);
    assert!(ops.contains(&OpCode::Blkpush), "got: {ops:?}");
}

#[test]
fn test_masgn_scatter() {
    let (irep, _) = compile("a, b, *c = [1, 2, 3, 4]");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Aref), "got: {ops:?}");
    assert!(ops.contains(&OpCode::Apost), "got: {ops:?}");
}

#[test]
fn test_string_interpolation_concats() {
    let (irep, _) = compile("x = 1\n\"a#{x}b\"");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::String));
    assert!(ops.contains(&OpCode::Strcat), "got: {ops:?}");
}

#[test]
fn test_hash_literal() {
    let (irep, _) = compile("{1 => 2, 3 => 4}");
    let hash = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Hash)
        .expect("no HASH emitted");
    assert_eq!(hash.arg_c(), 2);
}

#[test]
fn test_and_or_short_circuit() {
    let (irep, _) = compile("a = 1\na && foo\na || bar");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Jmpnot));
    assert!(ops.contains(&OpCode::Jmpif));
}

#[test]
fn test_case_uses_case_eq() {
    let (irep, symtab) = compile("case x\nwhen 1 then 2\nend");
    let send = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Send && i.arg_c() == 1)
        .expect("no === send");
    assert_eq!(symtab.name(irep.syms[send.arg_b()]), "===");
}

#[test]
fn test_tailcall_peephole() {
    let (irep, _) = compile("def m(n)\nother(n)\nend");
    let body = &irep.reps[0];
    let ops = opcodes(body);
    assert!(ops.contains(&OpCode::Tailcall), "got: {ops:?}");
}

#[test]
fn test_lambda_is_strict_capture() {
    let (irep, _) = compile("f = ->(x) { x }");
    let lambda = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Lambda)
        .expect("no LAMBDA");
    assert_eq!(
        lambda.arg_cz(),
        berylc_bc::LAMBDA_CAPTURE | berylc_bc::LAMBDA_STRICT
    );
}

#[test]
fn test_block_is_capture_only() {
    let (irep, _) = compile("each { 1 }");
    let lambda = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Lambda)
        .expect("no LAMBDA");
    assert_eq!(lambda.arg_cz(), berylc_bc::LAMBDA_CAPTURE);
}

#[test]
fn test_line_info_tracks_source() {
    let (irep, _) = compile("1\n2\n3");
    assert_eq!(irep.lines.len(), irep.iseq.len());
    assert!(irep.lines.contains(&2));
    assert_eq!(irep.filename.as_deref(), Some("test.rb"));
}

#[test]
fn test_large_int_goes_to_pool() {
    let (irep, _) = compile("10_000_000_000");
    assert!(matches!(irep.pool[0], PoolValue::Int(10_000_000_000)));
    assert!(opcodes(&irep).contains(&OpCode::Loadl));
}

#[test]
fn test_alias_lowers_to_alias_method() {
    let (irep, symtab) = compile("alias b a");
    let ops = opcodes(&irep);
    assert!(ops.contains(&OpCode::Tclass));
    let send = irep
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Send)
        .expect("no SEND");
    assert_eq!(symtab.name(irep.syms[send.arg_b()]), "alias_method");
}

#[test]
fn test_nested_blocks_compile() {
    let (irep, _) = compile("a = 0\nouter { inner { a = a + 1 } }");
    let outer = &irep.reps[0];
    let inner = &outer.reps[0];
    let ops = opcodes(inner);
    assert!(ops.contains(&OpCode::Setupvar), "got: {ops:?}");
    // two hops out to the method scope
    let setup = inner
        .iseq
        .iter()
        .find(|i| i.opcode() == OpCode::Setupvar)
        .unwrap();
    assert_eq!(setup.arg_c(), 1);
}

#[test]
fn test_deep_expression_overflows_registers() {
    // a pathological expression must fail cleanly, not wrap registers
    let mut source = String::from("x = 1");
    for _ in 0..600 {
        source.push_str(" + (1");
    }
    for _ in 0..600 {
        source.push(')');
    }
    let mut diags = Diagnostics::new();
    let outcome = berylc_par::parse_program(&source, &mut diags);
    let mut symtab = SymbolTable::new();
    let result = generate(&outcome.program, &mut symtab, None);
    assert!(matches!(
        result,
        Err(crate::CodegenError::RegisterOverflow { .. })
    ));
}

#[test]
fn test_all_emitted_opcodes_decode() {
    let (irep, _) = compile(
        "class A\ndef m(a, b = 1, *r)\nbegin\nyield a\nrescue => e\nreturn e\nensure\nb\nend\nend\nend\nA.new.m(1) { |x| x }",
    );
    for op in all_opcodes(&irep) {
        let _ = op.name();
    }
}
