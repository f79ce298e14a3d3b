use berylc_util::Diagnostics;

use crate::ast::{Node, NodeKind, StrSeg};
use crate::{parse_program, Program};

fn parse(source: &str) -> Program {
    let mut diags = Diagnostics::new();
    let outcome = parse_program(source, &mut diags);
    assert!(
        !diags.has_errors(),
        "parse errors for {source:?}: {:?}",
        diags.iter().collect::<Vec<_>>()
    );
    outcome.program
}

fn parse_incomplete(source: &str) -> bool {
    let mut diags = Diagnostics::new();
    parse_program(source, &mut diags).incomplete
}

fn first(program: &Program) -> &Node {
    &program.body[0]
}

#[test]
fn test_arithmetic_precedence() {
    let program = parse("1 + 2 * 3");
    // 1 + (2 * 3)
    match &first(&program).kind {
        NodeKind::Call { recv, name, args, .. } => {
            assert_eq!(name, "+");
            assert!(matches!(
                recv.as_deref().unwrap().kind,
                NodeKind::Int { value: 1, .. }
            ));
            assert!(matches!(
                &args[0].kind,
                NodeKind::Call { name, .. } if name == "*"
            ));
        }
        other => panic!("expected call, got {other:?}"),
    }
}

#[test]
fn test_assignment_declares_local() {
    let program = parse("a = 1\na");
    assert!(matches!(
        &first(&program).kind,
        NodeKind::Assign { lhs, .. } if matches!(lhs.kind, NodeKind::LVar(_))
    ));
    // the second statement reads the local, not a method
    assert!(matches!(&program.body[1].kind, NodeKind::LVar(name) if name == "a"));
    assert_eq!(program.locals, vec!["a".to_string()]);
}

#[test]
fn test_bare_name_is_self_call() {
    let program = parse("foo");
    assert!(matches!(
        &first(&program).kind,
        NodeKind::Call { recv: None, name, .. } if name == "foo"
    ));
}

#[test]
fn test_command_call() {
    let program = parse("puts 1 + 2");
    match &first(&program).kind {
        NodeKind::Call { recv: None, name, args, .. } => {
            assert_eq!(name, "puts");
            assert_eq!(args.len(), 1);
            assert!(matches!(&args[0].kind, NodeKind::Call { name, .. } if name == "+"));
        }
        other => panic!("expected command call, got {other:?}"),
    }
}

#[test]
fn test_method_call_chain() {
    let program = parse("a.b.c(1)");
    match &first(&program).kind {
        NodeKind::Call { recv, name, args, .. } => {
            assert_eq!(name, "c");
            assert_eq!(args.len(), 1);
            assert!(matches!(
                &recv.as_deref().unwrap().kind,
                NodeKind::Call { name, .. } if name == "b"
            ));
        }
        other => panic!("expected chained call, got {other:?}"),
    }
}

#[test]
fn test_index_and_attr_assignment() {
    let program = parse("a = []\na[0] = 1\nx = a\nx.size = 2");
    assert!(matches!(
        &program.body[1].kind,
        NodeKind::Assign { lhs, .. }
            if matches!(&lhs.kind, NodeKind::Call { name, .. } if name == "[]")
    ));
    assert!(matches!(
        &program.body[3].kind,
        NodeKind::Assign { lhs, .. }
            if matches!(&lhs.kind, NodeKind::Call { name, .. } if name == "size")
    ));
}

#[test]
fn test_multiple_assignment() {
    let program = parse("a, b, *rest = 1, 2, 3, 4");
    match &first(&program).kind {
        NodeKind::MAssign { pre, splat, post, rhs } => {
            assert_eq!(pre.len(), 2);
            assert!(splat.as_ref().unwrap().is_some());
            assert!(post.is_empty());
            assert!(matches!(rhs.kind, NodeKind::Array(_)));
        }
        other => panic!("expected masgn, got {other:?}"),
    }
    assert_eq!(program.locals, vec!["a", "b", "rest"]);
}

#[test]
fn test_op_assign() {
    let program = parse("a = 1\na += 2\na ||= 3");
    assert!(matches!(
        &program.body[1].kind,
        NodeKind::OpAssign { op, .. } if op == "+"
    ));
    assert!(matches!(
        &program.body[2].kind,
        NodeKind::OpAssign { op, .. } if op == "||"
    ));
}

#[test]
fn test_if_elsif_else() {
    let program = parse("if a\n1\nelsif b\n2\nelse\n3\nend");
    match &first(&program).kind {
        NodeKind::If { then_body, else_body, .. } => {
            assert_eq!(then_body.len(), 1);
            assert_eq!(else_body.len(), 1);
            assert!(matches!(&else_body[0].kind, NodeKind::If { .. }));
        }
        other => panic!("expected if, got {other:?}"),
    }
}

#[test]
fn test_unless_swaps_branches() {
    let program = parse("unless a then 1 else 2 end");
    match &first(&program).kind {
        NodeKind::If { then_body, else_body, .. } => {
            assert!(matches!(else_body[0].kind, NodeKind::Int { value: 1, .. }));
            assert!(matches!(then_body[0].kind, NodeKind::Int { value: 2, .. }));
        }
        other => panic!("expected if, got {other:?}"),
    }
}

#[test]
fn test_modifier_if() {
    let program = parse("x = 1 if y");
    assert!(matches!(&first(&program).kind, NodeKind::If { .. }));
}

#[test]
fn test_ternary() {
    let program = parse("x ? 1 : 2");
    assert!(matches!(&first(&program).kind, NodeKind::If { .. }));
}

#[test]
fn test_while_and_until() {
    assert!(matches!(
        &first(&parse("while x\ny\nend")).kind,
        NodeKind::While { until: false, .. }
    ));
    assert!(matches!(
        &first(&parse("until x\ny\nend")).kind,
        NodeKind::While { until: true, .. }
    ));
    assert!(matches!(
        &first(&parse("y while x")).kind,
        NodeKind::While { until: false, .. }
    ));
}

#[test]
fn test_for_leaks_variable_to_enclosing_scope() {
    let program = parse("for i in 1..3\nend\ni");
    assert!(matches!(&first(&program).kind, NodeKind::For { .. }));
    assert!(matches!(&program.body[1].kind, NodeKind::LVar(name) if name == "i"));
    assert!(program.locals.contains(&"i".to_string()));
}

#[test]
fn test_case_when() {
    let program = parse("case x\nwhen 1, 2 then :a\nwhen 3\n:b\nelse\n:c\nend");
    match &first(&program).kind {
        NodeKind::Case { subject, whens, else_body } => {
            assert!(subject.is_some());
            assert_eq!(whens.len(), 2);
            assert_eq!(whens[0].0.len(), 2);
            assert_eq!(else_body.len(), 1);
        }
        other => panic!("expected case, got {other:?}"),
    }
}

#[test]
fn test_def_with_params() {
    let program = parse("def f(a, b = 1, *rest, c, &blk)\na\nend");
    match &first(&program).kind {
        NodeKind::Def { name, params, locals, .. } => {
            assert_eq!(name, "f");
            assert_eq!(params.required, vec!["a"]);
            assert_eq!(params.optional.len(), 1);
            assert_eq!(params.rest, Some(Some("rest".into())));
            assert_eq!(params.post, vec!["c"]);
            assert_eq!(params.block, Some("blk".into()));
            assert_eq!(locals, &["a", "b", "rest", "c", "blk"]);
        }
        other => panic!("expected def, got {other:?}"),
    }
}

#[test]
fn test_def_self() {
    let program = parse("def self.create\nnew\nend");
    assert!(matches!(&first(&program).kind, NodeKind::SDef { .. }));
}

#[test]
fn test_def_operator_name() {
    let program = parse("def +(other)\nother\nend");
    assert!(matches!(
        &first(&program).kind,
        NodeKind::Def { name, .. } if name == "+"
    ));
}

#[test]
fn test_def_with_rescue_ensure() {
    let program = parse("def f\nbody\nrescue => e\nhandled\nensure\ncleanup\nend");
    match &first(&program).kind {
        NodeKind::Def { rescues, ensure_body, .. } => {
            assert_eq!(rescues.len(), 1);
            assert!(rescues[0].var.is_some());
            assert!(ensure_body.is_some());
        }
        other => panic!("expected def, got {other:?}"),
    }
}

#[test]
fn test_class_definition() {
    let program = parse("class B < A\ndef m\nsuper + 1\nend\nend");
    match &first(&program).kind {
        NodeKind::ClassDef { name, superclass, body, .. } => {
            assert_eq!(name, "B");
            assert!(superclass.is_some());
            assert_eq!(body.len(), 1);
        }
        other => panic!("expected class, got {other:?}"),
    }
}

#[test]
fn test_zsuper_vs_super_with_args() {
    let program = parse("def m\nsuper\nend\ndef n\nsuper(1)\nend");
    let get_super = |node: &Node| match &node.kind {
        NodeKind::Def { body, .. } => body[0].clone(),
        _ => panic!("expected def"),
    };
    let zsuper = get_super(&program.body[0]);
    assert!(matches!(&zsuper.kind, NodeKind::Super { args: None, .. }));
    let with_args = get_super(&program.body[1]);
    assert!(matches!(
        &with_args.kind,
        NodeKind::Super { args: Some(args), .. } if args.len() == 1
    ));
}

#[test]
fn test_super_plus_operand() {
    // `super + 1` is `(super) + 1`
    let program = parse("def m\nsuper + 1\nend");
    match &first(&program).kind {
        NodeKind::Def { body, .. } => match &body[0].kind {
            NodeKind::Call { recv, name, .. } => {
                assert_eq!(name, "+");
                assert!(matches!(
                    recv.as_deref().unwrap().kind,
                    NodeKind::Super { .. }
                ));
            }
            other => panic!("expected call, got {other:?}"),
        },
        other => panic!("expected def, got {other:?}"),
    }
}

#[test]
fn test_nested_class_path() {
    let program = parse("class A::B\nend");
    match &first(&program).kind {
        NodeKind::ClassDef { base, name, .. } => {
            assert_eq!(name, "B");
            assert!(matches!(
                &base.as_deref().unwrap().kind,
                NodeKind::Const(base_name) if base_name == "A"
            ));
        }
        other => panic!("expected class, got {other:?}"),
    }
}

#[test]
fn test_singleton_class() {
    let program = parse("class << self\ndef hidden\nend\nend");
    assert!(matches!(&first(&program).kind, NodeKind::SClassDef { .. }));
}

#[test]
fn test_module_definition() {
    let program = parse("module M\ndef helper\nend\nend");
    assert!(matches!(
        &first(&program).kind,
        NodeKind::ModuleDef { name, .. } if name == "M"
    ));
}

#[test]
fn test_block_with_params() {
    let program = parse("a = []\n3.times{|i| a << i*i }");
    match &program.body[1].kind {
        NodeKind::Call { name, block, .. } => {
            assert_eq!(name, "times");
            let block = block.as_deref().unwrap();
            assert_eq!(block.params.required, vec!["i"]);
            assert_eq!(block.locals, vec!["i"]);
            // `a` resolves through the transparent scope, not as a block local
            assert!(matches!(
                &block.body[0].kind,
                NodeKind::Call { recv, name, .. }
                    if name == "<<" && matches!(recv.as_deref().unwrap().kind, NodeKind::LVar(_))
            ));
        }
        other => panic!("expected call with block, got {other:?}"),
    }
}

#[test]
fn test_do_end_block() {
    let program = parse("each do |x|\nputs x\nend");
    assert!(matches!(
        &first(&program).kind,
        NodeKind::Call { block: Some(_), .. }
    ));
}

#[test]
fn test_lambda_literal() {
    let program = parse("fib = ->(n){ n < 2 ? n : fib.call(n-1) + fib.call(n-2) }");
    match &first(&program).kind {
        NodeKind::Assign { rhs, .. } => match &rhs.kind {
            NodeKind::Lambda(block) => {
                assert_eq!(block.params.required, vec!["n"]);
                // inner `fib` resolves to the outer local being assigned
                assert!(matches!(&block.body[0].kind, NodeKind::If { .. }));
            }
            other => panic!("expected lambda, got {other:?}"),
        },
        other => panic!("expected assign, got {other:?}"),
    }
}

#[test]
fn test_begin_rescue_ensure() {
    let program = parse(
        "begin\nraise \"x\"\nrescue => e\ne.message\nensure\n$z = 1\nend",
    );
    match &first(&program).kind {
        NodeKind::Begin { body, rescues, ensure_body, .. } => {
            assert_eq!(body.len(), 1);
            assert_eq!(rescues.len(), 1);
            assert!(rescues[0].classes.is_empty());
            assert!(rescues[0].var.is_some());
            assert!(ensure_body.is_some());
        }
        other => panic!("expected begin, got {other:?}"),
    }
}

#[test]
fn test_rescue_with_class_list() {
    let program = parse("begin\nrescue TypeError, ArgumentError => e\nend");
    match &first(&program).kind {
        NodeKind::Begin { rescues, .. } => {
            assert_eq!(rescues[0].classes.len(), 2);
        }
        other => panic!("expected begin, got {other:?}"),
    }
}

#[test]
fn test_modifier_rescue() {
    let program = parse("risky rescue fallback");
    assert!(matches!(&first(&program).kind, NodeKind::Begin { .. }));
}

#[test]
fn test_string_interpolation() {
    let program = parse("x = 1\n\"a#{x}b\"");
    match &program.body[1].kind {
        NodeKind::Str(segs) => {
            assert_eq!(segs.len(), 3);
            assert!(matches!(&segs[0], StrSeg::Lit(text) if text == "a"));
            assert!(matches!(
                &segs[1],
                StrSeg::Node(node) if matches!(node.kind, NodeKind::LVar(_))
            ));
        }
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn test_fiber_scenario_parses() {
    let program = parse("f = Fiber.new{ Fiber.yield 1; 2 }\n[f.resume, f.resume, f.alive?]");
    assert_eq!(program.body.len(), 2);
    assert!(matches!(&program.body[1].kind, NodeKind::Array(items) if items.len() == 3));
}

#[test]
fn test_hash_and_array_literals() {
    let program = parse("{1 => 2, :a => \"b\"}");
    assert!(matches!(&first(&program).kind, NodeKind::Hash(pairs) if pairs.len() == 2));
    let program = parse("[1, *rest, 3]");
    match &first(&program).kind {
        NodeKind::Array(items) => {
            assert!(matches!(items[1].kind, NodeKind::Splat(_)));
        }
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn test_ranges() {
    assert!(matches!(&first(&parse("1..5")).kind, NodeKind::Dot2(_, _)));
    assert!(matches!(&first(&parse("1...5")).kind, NodeKind::Dot3(_, _)));
}

#[test]
fn test_and_or_not() {
    assert!(matches!(&first(&parse("a and b")).kind, NodeKind::And(_, _)));
    assert!(matches!(&first(&parse("a or b")).kind, NodeKind::Or(_, _)));
    assert!(matches!(&first(&parse("not a")).kind, NodeKind::Not(_)));
    assert!(matches!(&first(&parse("a && b")).kind, NodeKind::And(_, _)));
    assert!(matches!(&first(&parse("!a")).kind, NodeKind::Not(_)));
}

#[test]
fn test_yield_forms() {
    let program = parse("def f\nyield\nyield 1, 2\nend");
    match &first(&program).kind {
        NodeKind::Def { body, .. } => {
            assert!(matches!(&body[0].kind, NodeKind::Yield(args) if args.is_empty()));
            assert!(matches!(&body[1].kind, NodeKind::Yield(args) if args.len() == 2));
        }
        other => panic!("expected def, got {other:?}"),
    }
}

#[test]
fn test_alias_and_undef() {
    let program = parse("alias new_name old_name\nundef gone, :also_gone");
    assert!(matches!(&program.body[0].kind, NodeKind::Alias { .. }));
    assert!(matches!(
        &program.body[1].kind,
        NodeKind::Undef(names) if names.len() == 2
    ));
}

#[test]
fn test_constants_and_paths() {
    assert!(matches!(&first(&parse("Foo")).kind, NodeKind::Const(_)));
    assert!(matches!(&first(&parse("::Foo")).kind, NodeKind::Colon3(_)));
    assert!(matches!(
        &first(&parse("Foo::Bar")).kind,
        NodeKind::Colon2 { .. }
    ));
}

#[test]
fn test_global_and_special_vars() {
    let program = parse("$x = 1\n$1\n$&");
    assert!(matches!(&program.body[1].kind, NodeKind::NthRef(1)));
    assert!(matches!(&program.body[2].kind, NodeKind::BackRef('&')));
}

#[test]
fn test_break_next_with_values() {
    let program = parse("while x\nbreak 1\nend\nwhile y\nnext\nend");
    match &program.body[0].kind {
        NodeKind::While { body, .. } => {
            assert!(matches!(&body[0].kind, NodeKind::Break(Some(_))));
        }
        other => panic!("expected while, got {other:?}"),
    }
}

#[test]
fn test_end_block() {
    let program = parse("END { cleanup }");
    assert!(matches!(&first(&program).kind, NodeKind::PostExe(_)));
}

#[test]
fn test_incomplete_inputs() {
    assert!(parse_incomplete("def foo"));
    assert!(parse_incomplete("if x"));
    assert!(parse_incomplete("class A"));
    assert!(parse_incomplete("begin"));
    assert!(parse_incomplete("[1,"));
    assert!(parse_incomplete("a = ("));
    assert!(!parse_incomplete("a = 1"));
    assert!(!parse_incomplete("def foo; end"));
}

#[test]
fn test_error_recovery_continues() {
    let mut diags = Diagnostics::new();
    let outcome = parse_program("^^^\nx = 1", &mut diags);
    assert!(diags.has_errors());
    // the parser recovered and still saw the assignment
    assert!(outcome
        .program
        .body
        .iter()
        .any(|n| matches!(n.kind, NodeKind::Assign { .. })));
}

#[test]
fn test_heredoc_in_expression() {
    let program = parse("s = <<EOS\nbody line\nEOS\ns");
    assert!(matches!(&first(&program).kind, NodeKind::Assign { .. }));
}

#[test]
fn test_parenthesized_sequence() {
    let program = parse("(a; b)");
    assert!(matches!(&first(&program).kind, NodeKind::Begin { .. }));
}
