use bvm::{Output, State};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_fib(c: &mut Criterion) {
    c.bench_function("vm_fib_15", |b| {
        let mut state = State::new();
        state.output = Output::Buffer(String::new());
        let src = "def fib(n)\nn < 2 ? n : fib(n - 1) + fib(n - 2)\nend";
        state.load_string(src, "bench").expect("bench source compiles");
        b.iter(|| {
            let v = state.load_string("fib(15)", "bench").expect("fib runs");
            black_box(v)
        })
    });
}

fn bench_block_iteration(c: &mut Criterion) {
    c.bench_function("vm_block_sum_1000", |b| {
        let mut state = State::new();
        state.output = Output::Buffer(String::new());
        b.iter(|| {
            let v = state
                .load_string("t = 0\n1000.times { |i| t += i }\nt", "bench")
                .expect("loop runs");
            black_box(v)
        })
    });
}

fn bench_gc_churn(c: &mut Criterion) {
    c.bench_function("vm_gc_churn", |b| {
        let mut state = State::new();
        state.output = Output::Buffer(String::new());
        b.iter(|| {
            let v = state
                .load_string("500.times { |i| [i, \"x\" + i.to_s] }\nnil", "bench")
                .expect("churn runs");
            black_box(v)
        })
    });
}

criterion_group!(benches, bench_fib, bench_block_iteration, bench_gc_churn);
criterion_main!(benches);
