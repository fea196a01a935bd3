//! Benchmarks for moving values across the host/runtime boundary.
//!
//! - Globals: push and pull of scalars and strings
//! - Calls: host to script and script to host
//! - Userdata: method dispatch on bound types
//!
//! ```bash
//! cargo bench --bench marshalling_benchmarks
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use luaw::{Function, Lua, UserType};
use std::hint::black_box;

#[derive(Clone, UserType)]
struct Particle {
    x: f64,
    vx: f64,
}

fn lua() -> Lua {
    let lua = Lua::new().expect("create instance");
    lua.register_function("add", |a: f64, b: f64| a + b)
        .expect("register add");
    lua.bind::<Particle>()
        .and_then(|binder| binder.add_constructor(|x: f64, vx: f64| Particle { x, vx }))
        .and_then(|binder| {
            binder.add_method_mut("step", |p: &mut Particle, dt: f64| {
                p.x += p.vx * dt;
                p.x
            })
        })
        .expect("bind Particle");
    lua.exec(
        r#"
        function script_add(a, b) return a + b end
        function call_host(n)
            local total = 0
            for i = 1, n do total = add(total, i) end
            return total
        end
        function step_particle(n)
            local p = Particle(0, 1)
            for _ = 1, n do p:step(0.5) end
            return p:step(0)
        end
        "#,
    )
    .expect("load benchmark script");
    lua
}

fn bench_globals(c: &mut Criterion) {
    let lua = lua();
    let mut group = c.benchmark_group("globals");

    group.bench_function("number_round_trip", |b| {
        b.iter(|| {
            lua.set_global("n", black_box(42)).unwrap();
            black_box(lua.get_global::<i32>("n").unwrap())
        })
    });

    group.bench_function("string_round_trip", |b| {
        b.iter(|| {
            lua.set_global("s", black_box("marshalled text")).unwrap();
            black_box(lua.get_global::<String>("s").unwrap())
        })
    });

    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let lua = lua();
    let script_add: Function = lua.get_global("script_add").unwrap();
    let call_host: Function = lua.get_global("call_host").unwrap();
    let mut group = c.benchmark_group("calls");

    group.bench_function("host_to_script", |b| {
        b.iter(|| black_box(script_add.call::<f64>((black_box(1.0), black_box(2.0))).unwrap()))
    });

    group.bench_function("script_to_host_x100", |b| {
        b.iter(|| black_box(call_host.call::<f64>(black_box(100)).unwrap()))
    });

    group.finish();
}

fn bench_userdata(c: &mut Criterion) {
    let lua = lua();
    let step_particle: Function = lua.get_global("step_particle").unwrap();

    c.bench_function("userdata/method_x100", |b| {
        b.iter(|| black_box(step_particle.call::<f64>(black_box(100)).unwrap()))
    });
}

criterion_group!(benches, bench_globals, bench_calls, bench_userdata);
criterion_main!(benches);
