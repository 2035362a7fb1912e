//! Benchmarks for template evaluation over synthetic call graphs.
//!
//! - Reverse call-graph tracing through a layered graph
//! - Call-site search with subclass widening
//! - Full template evaluation (search followed by trace)

extern crate bugscope;

use bugscope::prelude::*;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

/// Builds `layers` layers of `width` methods each; every method calls every method of the
/// next layer, and the last layer calls `Lcom/sink/Net;->send()V`.
fn layered_graph(layers: usize, width: usize) -> MemoryIndex {
    let method = |layer: usize, slot: usize| format!("Lcom/app/L{layer}C{slot};->run()V");

    let mut builder = MemoryIndex::builder();
    for layer in 0..layers {
        for slot in 0..width {
            let caller = method(layer, slot);
            if layer + 1 == layers {
                builder = builder.call(&caller, "Lcom/sink/Net;->send()V");
            } else {
                for next in 0..width {
                    builder = builder.call(&caller, &method(layer + 1, next));
                }
            }
        }
    }
    builder.build().unwrap()
}

/// Builds a base class with `count` subclasses, each called from its own activity.
fn wide_hierarchy(count: usize) -> MemoryIndex {
    let mut builder = MemoryIndex::builder().class("Lcom/app/Base;", None);
    for i in 0..count {
        let class = format!("Lcom/app/Impl{i};");
        builder = builder.class(&class, Some("Lcom/app/Base;")).call(
            &format!("Lcom/app/Screen{i};->onCreate(Landroid/os/Bundle;)V"),
            &format!("{class}->work()V"),
        );
    }
    builder.build().unwrap()
}

fn template(code: &str) -> BugTemplate {
    TemplateParser::new()
        .parse_str(&format!(
            r#"{{"METADATA": {{"NAME": "Bench"}}, "CODEPARAMS": {code}}}"#
        ))
        .unwrap()
}

/// Benchmark reverse tracing from the sink to the first layer.
fn bench_reverse_trace(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_trace");
    let template = template(
        r#"{"TRACE": {
            "TRACEFROM": "Lcom/sink/Net;->send()V",
            "TRACETO": "<class>:Lcom/app/L0C*",
            "RETURN": "<tracepath> AS @tracepath_sink"
        }}"#,
    );

    for width in [2, 4, 8] {
        let index = layered_graph(6, width);
        let config = EngineConfig::default();
        let evaluator = BugEvaluator::new(config.clone());

        group.bench_with_input(BenchmarkId::from_parameter(width), &index, |b, index| {
            b.iter(|| {
                let adapter = IndexAdapter::new(index, &config);
                let evaluation = evaluator.evaluate(black_box(&template), &adapter).unwrap();
                black_box(evaluation)
            });
        });
    }
    group.finish();
}

/// Benchmark a call-site search that widens over many subclasses.
fn bench_call_site_search(c: &mut Criterion) {
    let index = wide_hierarchy(200);
    let config = EngineConfig::default();
    let evaluator = BugEvaluator::new(config.clone());
    let template = template(
        r#"{"SEARCH": {"SEARCHFORCALLTOMETHOD": {
            "METHOD": "Lcom/app/Base;->work()V",
            "RETURN": "<class> AS @screens"
        }}}"#,
    );

    c.bench_function("call_site_search_200_subclasses", |b| {
        b.iter(|| {
            let adapter = IndexAdapter::new(&index, &config);
            let evaluation = evaluator.evaluate(black_box(&template), &adapter).unwrap();
            black_box(evaluation)
        });
    });
}

/// Benchmark a search whose bindings seed a forward trace.
fn bench_search_then_trace(c: &mut Criterion) {
    let index = layered_graph(5, 4);
    let config = EngineConfig::default();
    let evaluator = BugEvaluator::new(config.clone());
    let template = template(
        r#"{
            "SEARCH": {"SEARCHFORCALLTOMETHOD": {
                "METHOD": "Lcom/app/L1C0;->run()V",
                "RETURN": "<method> AS @entry"
            }},
            "TRACE": {
                "TRACEFROM": "@entry",
                "TRACETO": "Lcom/sink/Net;->send()V",
                "TRACEDIRECTION": "FORWARD",
                "RETURN": "<tracepath> AS @tracepath_entry"
            }
        }"#,
    );

    c.bench_function("search_then_forward_trace", |b| {
        b.iter(|| {
            let adapter = IndexAdapter::new(&index, &config);
            let evaluation = evaluator.evaluate(black_box(&template), &adapter).unwrap();
            black_box(evaluation)
        });
    });
}

criterion_group!(
    benches,
    bench_reverse_trace,
    bench_call_site_search,
    bench_search_then_trace
);
criterion_main!(benches);
