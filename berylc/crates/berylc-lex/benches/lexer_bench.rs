use berylc_util::Diagnostics;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_source() -> String {
    let unit = r#"
class Shape
  attr_accessor :width, :height

  def initialize(width, height)
    @width = width
    @height = height
  end

  def area
    @width * @height
  end
end

shapes = []
10.times { |i| shapes << Shape.new(i, i + 1) }
total = 0
shapes.each { |s| total += s.area }
puts "total area: #{total}"
"#;
    unit.repeat(40)
}

fn bench_tokenize(c: &mut Criterion) {
    let source = sample_source();
    c.bench_function("tokenize_repeated_class", |b| {
        b.iter(|| {
            let mut diags = Diagnostics::new();
            let tokens = berylc_lex::tokenize(black_box(&source), &mut diags);
            black_box(tokens.len())
        })
    });
}

fn bench_tokenize_heredocs(c: &mut Criterion) {
    let source = "s = <<EOS\nsome body text with #{interp}\nEOS\n".repeat(200);
    c.bench_function("tokenize_heredocs", |b| {
        b.iter(|| {
            let mut diags = Diagnostics::new();
            let tokens = berylc_lex::tokenize(black_box(&source), &mut diags);
            black_box(tokens.len())
        })
    });
}

criterion_group!(benches, bench_tokenize, bench_tokenize_heredocs);
criterion_main!(benches);
