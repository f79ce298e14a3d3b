//! End-to-end scenarios: source text through the parser, code
//! generator and VM, checked against literal values and side effects.

use bvm::{BerylError, Output, State, Value};

fn fresh_state() -> State {
    let mut state = State::new();
    state.output = Output::Buffer(String::new());
    state
}

fn eval(source: &str) -> (State, Result<Value, BerylError>) {
    let mut state = fresh_state();
    let result = state.load_string(source, "test");
    (state, result)
}

/// Evaluate and render the result with `inspect`.
fn eval_inspect(source: &str) -> String {
    let (mut state, result) = eval(source);
    let value = result.unwrap_or_else(|e| panic!("eval failed for {source:?}: {e}"));
    state.render_inspect(value)
}

fn eval_stdout(source: &str) -> String {
    let (state, result) = eval(source);
    result.unwrap_or_else(|e| panic!("eval failed for {source:?}: {e}"));
    match state.output {
        Output::Buffer(buf) => buf,
        Output::Stdout => unreachable!("test states buffer their output"),
    }
}

fn eval_error(source: &str) -> BerylError {
    let (_, result) = eval(source);
    match result {
        Ok(v) => panic!("expected an error for {source:?}, got {v:?}"),
        Err(e) => e,
    }
}

// -----------------------------------------------------------------
// the literal end-to-end scenarios
// -----------------------------------------------------------------

#[test]
fn test_puts_arithmetic() {
    let mut state = fresh_state();
    let value = state.load_string("puts 1 + 2", "t").unwrap();
    assert_eq!(value, Value::Nil);
    match state.output {
        Output::Buffer(buf) => assert_eq!(buf, "3\n"),
        Output::Stdout => unreachable!(),
    }
}

#[test]
fn test_fib_lambda() {
    let src = "fib = ->(n){ n < 2 ? n : fib.call(n-1) + fib.call(n-2) }\nfib.call(10)";
    let (_, result) = eval(src);
    assert_eq!(result.unwrap(), Value::Int(55));
}

#[test]
fn test_block_accumulates_squares() {
    let src = "a = []\n3.times{|i| a << i*i }\na";
    assert_eq!(eval_inspect(src), "[0, 1, 4]");
}

#[test]
fn test_rescue_ensure_scenario() {
    let src = "begin\n  raise \"x\"\nrescue => e\n  e.message\nensure\n  $z = 1\nend";
    let (mut state, result) = eval(src);
    let value = result.unwrap();
    assert_eq!(state.render_inspect(value), "\"x\"");
    assert_eq!(state.global_get("z"), Value::Int(1));
}

#[test]
fn test_fiber_scenario() {
    let src = "f = Fiber.new{ Fiber.yield 1; 2 }\n[f.resume, f.resume, f.alive?]";
    assert_eq!(eval_inspect(src), "[1, 2, false]");
}

#[test]
fn test_resuming_dead_fiber_raises() {
    let src = "f = Fiber.new{ 1 }\nf.resume\nf.resume";
    match eval_error(src) {
        BerylError::Exception { class, message } => {
            assert_eq!(class, "RuntimeError");
            assert!(message.contains("dead fiber"), "got: {message}");
        }
        other => panic!("expected exception, got {other:?}"),
    }
}

#[test]
fn test_super_scenario() {
    let src = "class A; def m; 1; end; end\nclass B < A; def m; super + 1; end; end\nB.new.m";
    let (_, result) = eval(src);
    assert_eq!(result.unwrap(), Value::Int(2));
}

// -----------------------------------------------------------------
// boundary behaviors
// -----------------------------------------------------------------

#[test]
fn test_integer_overflow_promotes_to_float() {
    let src = format!("{} + 1", i64::MAX);
    let (_, result) = eval(&src);
    match result.unwrap() {
        Value::Float(f) => assert!(f > i64::MAX as f64 * 0.99),
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn test_division_by_zero_promotes_to_float() {
    let (_, result) = eval("x = 0\n7 / x");
    assert!(matches!(result.unwrap(), Value::Float(f) if f.is_infinite()));
    let src = format!("x = -1\n({}) / x", i64::MIN);
    let (_, result) = eval(&src);
    assert!(matches!(result.unwrap(), Value::Float(_)));
}

#[test]
fn test_string_times_negative_raises() {
    match eval_error("\"ab\" * (0 - 1)") {
        BerylError::Exception { class, .. } => assert_eq!(class, "ArgumentError"),
        other => panic!("expected ArgumentError, got {other:?}"),
    }
}

#[test]
fn test_missing_arguments_name_the_method() {
    match eval_error("def need2(a, b); a; end\nneed2(1)") {
        BerylError::Exception { class, message } => {
            assert_eq!(class, "ArgumentError");
            assert!(message.contains("need2"), "got: {message}");
        }
        other => panic!("expected ArgumentError, got {other:?}"),
    }
}

#[test]
fn test_deep_recursion_raises_runtime_error() {
    match eval_error("def deep(n); deep(n + 1) + 1; end\ndeep(0)") {
        BerylError::Exception { class, message } => {
            assert_eq!(class, "RuntimeError");
            assert!(message.contains("stack level too deep"), "got: {message}");
        }
        other => panic!("expected RuntimeError, got {other:?}"),
    }
}

// -----------------------------------------------------------------
// language behavior
// -----------------------------------------------------------------

#[test]
fn test_literals_render() {
    assert_eq!(eval_inspect("42"), "42");
    assert_eq!(eval_inspect("-3"), "-3");
    assert_eq!(eval_inspect("2.5"), "2.5");
    assert_eq!(eval_inspect("\"hi\""), "\"hi\"");
    assert_eq!(eval_inspect(":sym"), ":sym");
    assert_eq!(eval_inspect("nil"), "nil");
    assert_eq!(eval_inspect("true"), "true");
    assert_eq!(eval_inspect("[1, [2, 3]]"), "[1, [2, 3]]");
    assert_eq!(eval_inspect("{1 => 2}"), "{1 => 2}");
    assert_eq!(eval_inspect("1..4"), "1..4");
    assert_eq!(eval_inspect("1...4"), "1...4");
}

#[test]
fn test_string_interpolation() {
    assert_eq!(eval_inspect("x = 6\n\"got #{x * 7}!\""), "\"got 42!\"");
}

#[test]
fn test_heredoc() {
    assert_eq!(
        eval_inspect("s = <<EOS\nline 1\nline 2\nEOS\ns"),
        "\"line 1\\nline 2\\n\""
    );
}

#[test]
fn test_conditionals_and_loops() {
    assert_eq!(eval_inspect("if false then 1 else 2 end"), "2");
    assert_eq!(eval_inspect("x = 0\nx = 5 unless true\nx"), "0");
    assert_eq!(
        eval_inspect("i = 0\nwhile i < 5\ni += 1\nend\ni"),
        "5"
    );
    assert_eq!(
        eval_inspect("i = 10\nuntil i <= 3\ni -= 1\nend\ni"),
        "3"
    );
}

#[test]
fn test_case_when() {
    let src = "def kind(x)\ncase x\nwhen Integer then :int\nwhen String then :str\nelse :other\nend\nend\n[kind(1), kind(\"s\"), kind(:z)]";
    assert_eq!(eval_inspect(src), "[:int, :str, :other]");
}

#[test]
fn test_case_with_ranges() {
    let src = "case 7\nwhen 1..5 then :low\nwhen 6..10 then :mid\nelse :high\nend";
    assert_eq!(eval_inspect(src), ":mid");
}

#[test]
fn test_for_loop_leaks_variable() {
    assert_eq!(eval_inspect("t = 0\nfor i in 1..4\nt += i\nend\n[t, i]"), "[10, 4]");
}

#[test]
fn test_break_value_from_block() {
    assert_eq!(
        eval_inspect("r = 10.times { |i| break i * 100 if i == 3 }\nr"),
        "300"
    );
}

#[test]
fn test_next_skips_iteration() {
    assert_eq!(
        eval_inspect("a = []\n5.times { |i| next if i == 2\na << i }\na"),
        "[0, 1, 3, 4]"
    );
}

#[test]
fn test_while_break() {
    assert_eq!(
        eval_inspect("i = 0\nwhile true\nbreak if i > 4\ni += 1\nend\ni"),
        "5"
    );
}

#[test]
fn test_method_definition_and_defaults() {
    let src = "def greet(name, greeting = \"hi\")\ngreeting + \" \" + name\nend\n[greet(\"a\"), greet(\"b\", \"yo\")]";
    assert_eq!(eval_inspect(src), "[\"hi a\", \"yo b\"]");
}

#[test]
fn test_rest_arguments() {
    let src = "def tally(first, *rest)\n[first, rest.size]\nend\ntally(1, 2, 3, 4)";
    assert_eq!(eval_inspect(src), "[1, 3]");
}

#[test]
fn test_splat_call() {
    let src = "def add3(a, b, c); a + b + c; end\nargs = [1, 2, 3]\nadd3(*args)";
    assert_eq!(eval_inspect(src), "6");
}

#[test]
fn test_multiple_assignment() {
    assert_eq!(
        eval_inspect("a, b, *c = 1, 2, 3, 4\n[a, b, c]"),
        "[1, 2, [3, 4]]"
    );
    assert_eq!(eval_inspect("x, y = [7, 8]\n[y, x]"), "[8, 7]");
}

#[test]
fn test_op_assign() {
    assert_eq!(eval_inspect("a = 1\na += 4\na *= 2\na"), "10");
    assert_eq!(eval_inspect("h = nil\nh ||= 9\nh ||= 11\nh"), "9");
    assert_eq!(eval_inspect("b = 2\nb &&= b + 1\nb"), "3");
}

#[test]
fn test_instance_variables_and_attr() {
    let src = "class Point\nattr_accessor :x, :y\ndef initialize(x, y)\n@x = x\n@y = y\nend\ndef sum\n@x + @y\nend\nend\np1 = Point.new(3, 4)\np1.x = 10\n[p1.sum, p1.x, p1.y]";
    assert_eq!(eval_inspect(src), "[14, 10, 4]");
}

#[test]
fn test_class_variables_and_constants() {
    let src = "class Counter\n@@count = 0\nLIMIT = 3\ndef self.bump\n@@count += 1\nend\ndef self.count\n@@count\nend\nend\nCounter.bump\nCounter.bump\n[Counter.count, Counter::LIMIT]";
    assert_eq!(eval_inspect(src), "[2, 3]");
}

#[test]
fn test_module_inclusion() {
    let src = "module Greeter\ndef hello\n\"hello from \" + name\nend\nend\nclass Robot\ninclude Greeter\ndef name\n\"robot\"\nend\nend\nRobot.new.hello";
    assert_eq!(eval_inspect(src), "\"hello from robot\"");
}

#[test]
fn test_singleton_method() {
    let src = "o = Object.new\ndef o.special\n:very\nend\no.special";
    assert_eq!(eval_inspect(src), ":very");
}

#[test]
fn test_class_reopening() {
    let src = "class Widget\ndef a; 1; end\nend\nclass Widget\ndef b; 2; end\nend\nw = Widget.new\nw.a + w.b";
    assert_eq!(eval_inspect(src), "3");
}

#[test]
fn test_method_missing() {
    let src = "class Ghost\ndef method_missing(name, *args)\n[name, args.size]\nend\nend\nGhost.new.whatever(1, 2)";
    assert_eq!(eval_inspect(src), "[:whatever, 2]");
}

#[test]
fn test_undefined_method_raises_no_method_error() {
    match eval_error("nil.frobnicate") {
        BerylError::Exception { class, message } => {
            assert_eq!(class, "NoMethodError");
            assert!(message.contains("frobnicate"), "got: {message}");
        }
        other => panic!("expected NoMethodError, got {other:?}"),
    }
}

#[test]
fn test_const_missing_raises_name_error() {
    match eval_error("NoSuchConst") {
        BerylError::Exception { class, message } => {
            assert_eq!(class, "NameError");
            assert!(message.contains("NoSuchConst"), "got: {message}");
        }
        other => panic!("expected NameError, got {other:?}"),
    }
}

#[test]
fn test_rescue_class_matching() {
    let src = "begin\nraise TypeError, \"bad type\"\nrescue ArgumentError\n:arg\nrescue TypeError => e\ne.message\nend";
    assert_eq!(eval_inspect(src), "\"bad type\"");
}

#[test]
fn test_unmatched_rescue_propagates() {
    let src = "begin\nraise TypeError, \"t\"\nrescue ArgumentError\n:wrong\nend";
    match eval_error(src) {
        BerylError::Exception { class, .. } => assert_eq!(class, "TypeError"),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

#[test]
fn test_ensure_runs_on_all_paths() {
    // normal path
    assert_eq!(
        eval_inspect("$t = []\nbegin\n$t << 1\nensure\n$t << 2\nend\n$t"),
        "[1, 2]"
    );
    // raise path, rescued outside
    let src = "$t = []\nbegin\nbegin\nraise \"x\"\nensure\n$t << 1\nend\nrescue\n$t << 2\nend\n$t";
    assert_eq!(eval_inspect(src), "[1, 2]");
    // return path
    let src = "$t = []\ndef leave\nbegin\nreturn :gone\nensure\n$t << 1\nend\nend\n[leave, $t]";
    assert_eq!(eval_inspect(src), "[:gone, [1]]");
}

#[test]
fn test_retry_rearms_the_rescue() {
    let src = "i = 0\nbegin\ni += 1\nraise \"again\" if i < 3\nrescue\nretry\nend\ni";
    assert_eq!(eval_inspect(src), "3");
}

#[test]
fn test_else_after_rescue() {
    let src = "begin\n1\nrescue\n:rescued\nelse\n:clean\nend";
    assert_eq!(eval_inspect(src), ":clean");
}

#[test]
fn test_zsuper_forwards_arguments() {
    let src = "class P\ndef m(a, b)\na + b\nend\nend\nclass C < P\ndef m(a, b)\nsuper * 10\nend\nend\nC.new.m(2, 3)";
    assert_eq!(eval_inspect(src), "50");
}

#[test]
fn test_yield_and_block_given() {
    let src = "def twice\nif block_given?\nyield\nyield\nelse\n:noblock\nend\nend\n[twice { 1 }, twice]";
    assert_eq!(eval_inspect(src), "[1, :noblock]");
}

#[test]
fn test_closure_counter() {
    let src = "def make_counter\nn = 0\n-> { n += 1 }\nend\nc = make_counter\nc.call\nc.call\nc.call";
    assert_eq!(eval_inspect(src), "3");
}

#[test]
fn test_detached_env_survives_frame_pop() {
    // the defining frame returns before the proc runs: the env must
    // carry a private copy of the locals
    let src = "def maker\nx = 41\n-> { x + 1 }\nend\nf = maker\nf.call";
    assert_eq!(eval_inspect(src), "42");
}

#[test]
fn test_nested_blocks_share_upvars() {
    let src = "total = 0\n[1, 2].each { |a| [10, 20].each { |b| total += a * b } }\ntotal";
    assert_eq!(eval_inspect(src), "90");
}

#[test]
fn test_iteration_protocol() {
    assert_eq!(eval_inspect("(1..4).map { |x| x * x }"), "[1, 4, 9, 16]");
    assert_eq!(eval_inspect("[3, 1, 2].select { |x| x > 1 }"), "[3, 2]");
    assert_eq!(
        eval_inspect("[1, 2, 3].inject(10) { |acc, x| acc + x }"),
        "16"
    );
    assert_eq!(eval_inspect("(1..3).to_a"), "[1, 2, 3]");
}

#[test]
fn test_hash_operations() {
    let src = "h = {:a => 1}\nh[:b] = 2\nh[\"s\"] = 3\n[h.size, h[:a], h[\"s\"], h.has_key?(:b), h[:zzz]]";
    assert_eq!(eval_inspect(src), "[3, 1, 3, true, nil]");
}

#[test]
fn test_hash_keys_preserve_eql_semantics() {
    // immediates round-trip through hash keys and back
    let src = "h = {}\nh[1] = :int\nh[1.5] = :float\nh[:s] = :sym\nh[true] = :t\nh[nil] = :n\nh[\"k\"] = :str\n[h[1], h[1.5], h[:s], h[true], h[nil], h[\"k\"]]";
    assert_eq!(
        eval_inspect(src),
        "[:int, :float, :sym, :t, :n, :str]"
    );
}

#[test]
fn test_string_methods() {
    assert_eq!(eval_inspect("\"abc\".size"), "3");
    assert_eq!(eval_inspect("\"ab\" * 3"), "\"ababab\"");
    assert_eq!(eval_inspect("\"a-b-c\".split(\"-\")"), "[\"a\", \"b\", \"c\"]");
    assert_eq!(eval_inspect("\"xyz\".reverse"), "\"zyx\"");
    assert_eq!(eval_inspect("\"a\" == \"a\""), "true");
    assert_eq!(eval_inspect("\"12abc\".to_i"), "12");
}

#[test]
fn test_array_methods() {
    assert_eq!(eval_inspect("[1, 2, 3].join(\"-\")"), "\"1-2-3\"");
    assert_eq!(eval_inspect("[1, 2, 3][-1]"), "3");
    assert_eq!(eval_inspect("[1, 2] + [3]"), "[1, 2, 3]");
    assert_eq!(eval_inspect("a = [1, 2, 3]\na.shift\na"), "[2, 3]");
    assert_eq!(eval_inspect("[1, 2, 3].include?(2)"), "true");
    assert_eq!(eval_inspect("[1, 2, 3, 4][1..2]"), "[2, 3]");
}

#[test]
fn test_operator_overriding() {
    let src = "class Vec\nattr_reader :x\ndef initialize(x)\n@x = x\nend\ndef +(other)\nVec.new(@x + other.x)\nend\nend\n(Vec.new(2) + Vec.new(3)).x";
    assert_eq!(eval_inspect(src), "5");
}

#[test]
fn test_alias_and_undef() {
    let src = "class W\ndef real; 9; end\nalias fake real\nend\nW.new.fake";
    assert_eq!(eval_inspect(src), "9");
    match eval_error("class V\ndef gone; end\nundef gone\nend\nV.new.gone") {
        BerylError::Exception { class, .. } => assert_eq!(class, "NoMethodError"),
        other => panic!("expected NoMethodError, got {other:?}"),
    }
}

#[test]
fn test_comparison_chain() {
    assert_eq!(eval_inspect("[1 < 2, 2 <= 2, 3 > 4, 5 >= 5]"), "[true, true, false, true]");
    assert_eq!(eval_inspect("1 == 1.0"), "true");
    assert_eq!(eval_inspect("(2 <=> 3)"), "-1");
}

#[test]
fn test_large_integer_comparison_is_exact() {
    // 2^53 and 2^53 + 1 collapse to the same f64; they must not here
    assert_eq!(
        eval_inspect("a = 9007199254740992\nb = 9007199254740993\n[a < b, a == b, b > a]"),
        "[true, false, true]"
    );
    assert_eq!(
        eval_inspect("(9007199254740992 <=> 9007199254740993)"),
        "-1"
    );
}

#[test]
fn test_modulo_is_floored() {
    // the result takes the divisor's sign
    assert_eq!(
        eval_inspect("x = -3\ny = -7\n[7 % x, y % 3, 7 % 3, y % x]"),
        "[-2, 2, 1, -1]"
    );
    assert_eq!(eval_inspect("7 % 0"), "NaN");
}

#[test]
fn test_and_or_not() {
    assert_eq!(eval_inspect("nil || :fallback"), ":fallback");
    assert_eq!(eval_inspect("1 && :second"), ":second");
    assert_eq!(eval_inspect("!nil"), "true");
    assert_eq!(eval_inspect("false or 7"), "7");
    assert_eq!(eval_inspect("not true"), "false");
}

#[test]
fn test_gc_start_twice_is_idempotent() {
    let src = "a = [1, 2, 3]\nGC.start\nb = a.dup\nGC.start\nGC.start\n[a, b]";
    assert_eq!(eval_inspect(src), "[[1, 2, 3], [1, 2, 3]]");
}

#[test]
fn test_gc_survives_heavy_allocation() {
    let src = "keep = []\n2000.times { |i| keep << \"s\" + i.to_s if i % 100 == 0 }\n3000.times { |i| [i, i, i] }\nGC.start\nkeep.size";
    assert_eq!(eval_inspect(src), "20");
}

#[test]
fn test_gc_controls() {
    let src = "GC.disable\nGC.enable\nGC.interval_ratio = 150\n[GC.interval_ratio, GC.generational_mode]";
    assert_eq!(eval_inspect(src), "[150, true]");
}

#[test]
fn test_fibers_interleave() {
    let src = "log = []\nf = Fiber.new do\nlog << :a\nFiber.yield\nlog << :c\nend\nlog << :start\nf.resume\nlog << :b\nf.resume\nlog";
    assert_eq!(eval_inspect(src), "[:start, :a, :b, :c]");
}

#[test]
fn test_fiber_arguments_flow() {
    let src = "f = Fiber.new { |x| y = Fiber.yield(x + 1)\ny * 2 }\na = f.resume(10)\nb = f.resume(100)\n[a, b]";
    assert_eq!(eval_inspect(src), "[11, 200]");
}

#[test]
fn test_yield_from_root_fiber_raises() {
    match eval_error("Fiber.yield") {
        BerylError::Exception { class, .. } => assert_eq!(class, "ArgumentError"),
        other => panic!("expected ArgumentError, got {other:?}"),
    }
}

#[test]
fn test_image_round_trip_executes() {
    let mut state = fresh_state();
    let image = state
        .compile_to_image("def dbl(x); x * 2; end\ndbl(21)", "img", true)
        .unwrap();
    let mut fresh = fresh_state();
    let value = fresh.load_image(&image).unwrap();
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_image_round_trip_is_bytecode_equal() {
    let mut state = fresh_state();
    let irep = state.compile("a = 1\nb = a + 2\nputs b", "rt").unwrap();
    let image = berylc_bc::image::dump_irep(&irep, &state.symbols, true).unwrap();
    let loaded = berylc_bc::image::load_irep(&image, &mut state.symbols).unwrap();
    assert!(irep.bytecode_eq(&loaded));
}

#[test]
fn test_corrupt_image_is_rejected() {
    let mut state = fresh_state();
    let mut image = state.compile_to_image("1", "bad", false).unwrap();
    let mid = image.len() / 2;
    image[mid] ^= 0xff;
    assert!(matches!(
        state.load_image(&image),
        Err(BerylError::Image(_))
    ));
}

#[test]
fn test_parse_error_reported_not_raised() {
    let (_, result) = eval("def broken(");
    assert!(matches!(result, Err(BerylError::Parse { .. })));
}

#[test]
fn test_exception_value_reaches_host() {
    let (state, result) = eval("raise TypeError, \"for the host\"");
    assert!(result.is_err());
    let exc = state.last_exception().expect("exception value retained");
    assert!(matches!(exc, Value::Obj(_)));
}

#[test]
fn test_toplevel_return_is_local_jump_error() {
    match eval_error("return 5") {
        BerylError::Exception { class, .. } => assert_eq!(class, "LocalJumpError"),
        other => panic!("expected LocalJumpError, got {other:?}"),
    }
}

#[test]
fn test_separate_states_are_disjoint() {
    let mut a = fresh_state();
    let mut b = fresh_state();
    a.load_string("$shared = 1\nclass OnlyInA; end", "a").unwrap();
    assert_eq!(b.global_get("shared"), Value::Nil);
    assert!(matches!(
        b.load_string("OnlyInA", "b"),
        Err(BerylError::Exception { .. })
    ));
}

#[test]
fn test_output_of_p_and_print() {
    assert_eq!(eval_stdout("p [1, :two]"), "[1, :two]\n");
    assert_eq!(eval_stdout("print \"a\", 1"), "a1");
    assert_eq!(eval_stdout("puts [1, 2]"), "1\n2\n");
}
