//! End-to-end: foreign-backed hybrid models driven by a miniature
//! fixed-step integrator standing in for the external solver engine.
//!
//! The driver exercises the full callback protocol: time events clamp
//! the step, continuous events are located by bisection on the indicator
//! sign change, discrete conditions are checked at step points, and
//! step-completion commands (including output flushing and links) run
//! after event resolution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hb_compose::{
    Callback, CallbackFamily, ComposeResult, Dynamics, LinkCallback, address_map, create_models,
    dynamics, link_models_named,
};
use hb_core::{TimeSpan, Tolerances, nearly_equal};
use hb_foreign::mock::{MockLoader, MockRuntime};
use hb_foreign::{ModelRuntime, ValueKind};
use hb_model::ModelSpec;

const GRAVITY: f64 = 9.81;

/// 2D ballistic ball with four named states and no io: [dx, dy, x, y].
fn ball_2d_runtime() -> MockRuntime {
    MockRuntime::new(&[], &[], &["dx", "dy", "x", "y"])
        .with_parameter("eps", 1e-2)
        .with_derivative(|dx, x, _u, _t| {
            dx[0] = 0.0;
            dx[1] = -GRAVITY;
            dx[2] = x[0];
            dx[3] = x[1];
        })
}

/// 1D bouncing ball: states [h, v], indicator h, bounce with restitution.
fn bouncing_ball_runtime() -> MockRuntime {
    MockRuntime::new(&[], &[], &["h", "v"])
        .with_derivative(|dx, x, _u, _t| {
            dx[0] = x[1];
            dx[1] = -GRAVITY;
        })
        .with_indicators(1, |out, x, _u, _t| out[0] = x[0])
        .with_event_handler(|_trigger, x, _u, _t| {
            if x[1] < 0.0 {
                x[1] = -0.9 * x[1];
            }
            x[0] = x[0].max(0.0);
        })
}

mod driver {
    use super::*;

    /// One RK4 stage over the state buffer; io is constant within a step.
    fn rk4(
        system: &mut Dynamics,
        state: &[f64],
        io: &[f64],
        t: f64,
        h: f64,
    ) -> ComposeResult<Vec<f64>> {
        let n = state.len();
        let stage = |sys: &mut Dynamics, x: &[f64], tk: f64| -> ComposeResult<Vec<f64>> {
            let mut k = vec![0.0; n];
            sys.eval(&mut k, x, io, tk)?;
            Ok(k)
        };
        let k1 = stage(system, state, t)?;
        let x2: Vec<f64> = state.iter().zip(&k1).map(|(x, k)| x + 0.5 * h * k).collect();
        let k2 = stage(system, &x2, t + 0.5 * h)?;
        let x3: Vec<f64> = state.iter().zip(&k2).map(|(x, k)| x + 0.5 * h * k).collect();
        let k3 = stage(system, &x3, t + 0.5 * h)?;
        let x4: Vec<f64> = state.iter().zip(&k3).map(|(x, k)| x + h * k).collect();
        let k4 = stage(system, &x4, t + h)?;
        Ok(state
            .iter()
            .enumerate()
            .map(|(i, x)| x + (h / 6.0) * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
            .collect())
    }

    fn sign_change(before: f64, after: f64) -> bool {
        (before > 0.0 && after <= 0.0) || (before < 0.0 && after >= 0.0)
    }

    /// Bisect the step size until the indicator crossing is bracketed
    /// tightly, returning the sub-step and the state just past it.
    fn locate_crossing(
        system: &mut Dynamics,
        cb: &Callback,
        index: usize,
        g_before: f64,
        state: &[f64],
        io: &[f64],
        t: f64,
        h: f64,
    ) -> ComposeResult<(f64, Vec<f64>)> {
        let mut lo = 0.0_f64;
        let mut hi = h;
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            let x_mid = rk4(system, state, io, t, mid)?;
            let mut g = vec![0.0; cb.indicators];
            system.eval_indicators(cb, &mut g, &x_mid, io, t + mid)?;
            if sign_change(g_before, g[index]) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let x = rk4(system, state, io, t, hi)?;
        Ok((hi, x))
    }

    /// Fixed-step simulation loop playing the external integrator's role.
    pub fn simulate(
        system: &mut Dynamics,
        links: &mut [LinkCallback],
        state: &mut [f64],
        io: &mut [f64],
        span: TimeSpan,
        dt: f64,
    ) -> ComposeResult<Vec<(f64, Vec<f64>)>> {
        let all = system.callbacks();
        let by_family = |family: CallbackFamily| -> Vec<Callback> {
            all.iter().copied().filter(|cb| cb.family == family).collect()
        };
        let time_cbs = by_family(CallbackFamily::Time);
        let cont_cbs = by_family(CallbackFamily::Continuous);
        let disc_cbs = by_family(CallbackFamily::Discrete);
        let step_cbs = by_family(CallbackFamily::Step);

        let mut t = span.start;
        let mut record = vec![(t, state.to_vec())];

        while t < span.stop - 1e-12 {
            // Clamp the step to the earliest scheduled time event.
            let mut h = dt.min(span.stop - t);
            let mut due: Option<(Callback, f64)> = None;
            for cb in &time_cbs {
                if let Some(te) = system.next_event_time(cb, t)? {
                    if te - t <= h + 1e-12 {
                        h = (te - t).min(h).max(0.0);
                        due = Some((*cb, te));
                    }
                }
            }

            // Indicator values entering the step.
            let mut g_before: Vec<Vec<f64>> = Vec::with_capacity(cont_cbs.len());
            for cb in &cont_cbs {
                let mut g = vec![0.0; cb.indicators];
                system.eval_indicators(cb, &mut g, state, io, t)?;
                g_before.push(g);
            }

            let candidate = rk4(system, state, io, t, h)?;

            // Zero-crossing detection over the candidate step.
            let mut crossing: Option<(Callback, usize, f64)> = None;
            for (cb, g0) in cont_cbs.iter().zip(&g_before) {
                let mut g1 = vec![0.0; cb.indicators];
                system.eval_indicators(cb, &mut g1, &candidate, io, t + h)?;
                for (i, (&b, &a)) in g0.iter().zip(&g1).enumerate() {
                    if sign_change(b, a) {
                        crossing = Some((*cb, i, b));
                        break;
                    }
                }
                if crossing.is_some() {
                    break;
                }
            }

            if let Some((cb, index, g0)) = crossing {
                let (tau, at_event) = locate_crossing(system, &cb, index, g0, state, io, t, h)?;
                state.copy_from_slice(&at_event);
                t += tau;
                let _ = system.apply_event(&cb, index, state, io, t)?;
            } else {
                state.copy_from_slice(&candidate);
                t += h;
                if let Some((cb, te)) = due {
                    // Land exactly on the scheduled instant.
                    t = te;
                    let _ = system.apply_event(&cb, 0, state, io, t)?;
                }
            }

            // Step completion runs after event resolution.
            for cb in &step_cbs {
                let _ = system.run_step(cb, state, io, t)?;
            }
            system.write_outputs(state, io, t)?;
            for link in links.iter_mut() {
                link.execute(io)?;
            }

            // Discrete conditions are checked last, once links have
            // refreshed the io buffer, so input-driven discontinuities
            // produced within this step are resolved before the next one.
            for cb in &disc_cbs {
                if system.check_discrete(cb, state, io, t)? {
                    let _ = system.apply_event(cb, 0, state, io, t)?;
                }
            }

            record.push((t, state.to_vec()));
        }
        Ok(record)
    }
}

#[test]
fn foreign_adapter_matches_direct_runtime_evaluation() {
    let initial = [1.0, 0.0, 0.5, 1.0];
    let span = TimeSpan::new(0.0, 10.0).unwrap();

    let mut params = BTreeMap::new();
    params.insert("eps".to_string(), 1e-2);
    let spec = ModelSpec::foreign(&[], &[], &["dx", "dy", "x", "y"], "deps/ball2d", Some(params))
        .unwrap();
    let loader = MockLoader::new(|_, _| Ok(ball_2d_runtime()));
    let models = create_models(vec![spec], &loader, 0, 0, span).unwrap();
    let mut system = dynamics(models);

    let mut through_bridge = vec![0.0; 4];
    system.eval(&mut through_bridge, &initial, &[], 0.0).unwrap();

    // Same evaluation directly against the runtime, bypassing the bridge.
    let mut direct_runtime = ball_2d_runtime();
    let refs: Vec<_> = ["dx", "dy", "x", "y"]
        .iter()
        .map(|n| direct_runtime.resolve(ValueKind::State, n).unwrap())
        .collect();
    direct_runtime
        .write(ValueKind::State, &refs, &initial)
        .unwrap();
    let mut direct = vec![0.0; 4];
    direct_runtime.derivatives(0.0, &mut direct).unwrap();

    assert_eq!(through_bridge, direct);
    assert_eq!(through_bridge, vec![0.0, -GRAVITY, 1.0, 0.0]);
}

#[test]
fn continuous_event_flips_only_the_velocity_index() {
    // Event response restricted to one state index: h untouched.
    let runtime = MockRuntime::new(&[], &[], &["h", "v"])
        .with_derivative(|dx, x, _u, _t| {
            dx[0] = x[1];
            dx[1] = -GRAVITY;
        })
        .with_indicators(1, |out, x, _u, _t| out[0] = x[0])
        .with_event_handler(|_trigger, x, _u, _t| x[1] = -0.9 * x[1]);
    let loader = MockLoader::new(move |_, _| Ok(runtime.clone_config()));

    let spec = ModelSpec::foreign(&[], &[], &["h", "v"], "deps/ball1d", None).unwrap();
    let models = create_models(vec![spec], &loader, 0, 0, TimeSpan::default()).unwrap();
    let mut system = dynamics(models);

    let cbs = system.callbacks();
    let cont = cbs
        .iter()
        .find(|cb| cb.family == CallbackFamily::Continuous)
        .unwrap();
    assert_eq!(cont.indicators, 1);

    let mut g = [0.0];
    system
        .eval_indicators(cont, &mut g, &[0.25, -3.0], &[], 0.0)
        .unwrap();
    assert_eq!(g, [0.25]);

    let mut state = [0.25, -3.0];
    let mut io = [];
    let outcome = system.apply_event(cont, 0, &mut state, &mut io, 1.0).unwrap();
    assert!(outcome.state_changed());
    assert_eq!(state[0], 0.25);
    assert_eq!(state[1], 2.7);
}

#[test]
fn bouncing_ball_stays_above_floor_across_events() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let loader = MockLoader::new(|_, _| Ok(bouncing_ball_runtime()));
    let spec = ModelSpec::foreign(&[], &[], &["h", "v"], "deps/ball1d", None).unwrap();
    let span = TimeSpan::new(0.0, 3.0).unwrap();
    let models = create_models(vec![spec], &loader, 0, 0, span).unwrap();
    let mut system = dynamics(models);

    let mut state = vec![1.0, 0.0];
    let mut io = Vec::new();
    let record = driver::simulate(&mut system, &mut [], &mut state, &mut io, span, 1e-3).unwrap();

    let mut bounces = 0;
    let mut prev_v = record[0].1[1];
    for (_t, x) in &record {
        assert!(x[0] >= -1e-6, "ball fell through the floor: h = {}", x[0]);
        if prev_v < 0.0 && x[1] > 0.0 {
            bounces += 1;
        }
        prev_v = x[1];
    }
    assert!(bounces >= 2, "expected repeated bounces, saw {bounces}");

    // Restitution < 1: the ball never regains its drop height.
    let apex_after_first_bounce = record
        .iter()
        .skip_while(|(t, _)| *t < 0.5)
        .map(|(_, x)| x[0])
        .fold(0.0_f64, f64::max);
    assert!(apex_after_first_bounce < 1.0);
}

#[test]
fn scheduled_time_event_fires_at_exact_instant() {
    let fired_at = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired_at);
    let runtime = MockRuntime::new(&[], &[], &["x"])
        .with_derivative(|dx, _x, _u, _t| dx[0] = 1.0)
        .with_schedule(&[0.5])
        .with_event_handler(move |_trigger, x, _u, t| {
            // 1e6 * t records the firing instant for the assertion below.
            seen.store((1e6 * t) as usize, Ordering::SeqCst);
            x[0] = 0.0;
        });
    let loader = MockLoader::new(move |_, _| Ok(runtime.clone_config()));

    let spec = ModelSpec::foreign(&[], &[], &["x"], "deps/ramp", None).unwrap();
    let span = TimeSpan::new(0.0, 1.0).unwrap();
    let models = create_models(vec![spec], &loader, 0, 0, span).unwrap();
    let mut system = dynamics(models);

    let mut state = vec![0.0];
    let mut io = Vec::new();
    // dt does not divide the event time; the driver must clamp to it.
    driver::simulate(&mut system, &mut [], &mut state, &mut io, span, 0.03).unwrap();

    assert_eq!(fired_at.load(Ordering::SeqCst), 500_000);
    assert!((state[0] - 0.5).abs() < 1e-9, "x = {}", state[0]);
}

#[test]
fn linked_source_drives_foreign_consumer_with_one_step_lag() {
    let input_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&input_events);
    let consumer_runtime = MockRuntime::new(&["u"], &[], &["z"])
        .with_derivative(|dx, _x, u, _t| dx[0] = u[0])
        .with_event_handler(move |trigger, _x, _u, _t| {
            if trigger == hb_foreign::EventTrigger::InputChange {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
    let loader = MockLoader::new(move |_, _| Ok(consumer_runtime.clone_config()));

    // Native ramp source: state s with ds = 1, output y = s.
    let source = ModelSpec::analytic(
        &[],
        &["y"],
        &["s"],
        Box::new(|dx, _x, _u, _t| {
            dx[0] = 1.0;
            Ok(())
        }),
        Box::new(|y, x, _u, _t| {
            y[0] = x[0];
            Ok(())
        }),
    )
    .unwrap();
    let consumer = ModelSpec::foreign(&["u"], &[], &["z"], "deps/integrator", None).unwrap();

    let specs = vec![source, consumer];
    let (io_map, state_map) = address_map(&specs, 0, 0);
    let span = TimeSpan::new(0.0, 1.0).unwrap();
    let models = create_models(specs, &loader, 0, 0, span).unwrap();
    let mut system = dynamics(models);

    let mut link = vec![link_models_named(&["y"], &["u"], &io_map).unwrap()];

    let mut state = vec![0.0; system.state_len()];
    let mut io = vec![0.0; system.io_len()];
    let dt = 1e-3;
    driver::simulate(&mut system, &mut link, &mut state, &mut io, span, dt).unwrap();

    // z ≈ ∫ s dt = t²/2, off by the documented one-step link lag.
    let z = state[state_map.index("z").unwrap()];
    let tol = Tolerances {
        abs: 5.0 * dt,
        rel: 0.0,
    };
    assert!(nearly_equal(z, 0.5, tol), "z = {z}");
    assert!(input_events.load(Ordering::SeqCst) > 0);
}

#[test]
fn step_completion_can_demand_an_event_update() {
    // Sawtooth: the runtime demands an event whenever x exceeds 1 at a
    // step boundary, and the event resets x.
    let runtime = MockRuntime::new(&[], &[], &["x"])
        .with_derivative(|dx, _x, _u, _t| dx[0] = 2.0)
        .with_step_check(|x, _t| x[0] > 1.0)
        .with_event_handler(|trigger, x, _u, _t| {
            if trigger == hb_foreign::EventTrigger::StepCompleted {
                x[0] = 0.0;
            }
        });
    let loader = MockLoader::new(move |_, _| Ok(runtime.clone_config()));

    let spec = ModelSpec::foreign(&[], &[], &["x"], "deps/sawtooth", None).unwrap();
    let span = TimeSpan::new(0.0, 2.0).unwrap();
    let models = create_models(vec![spec], &loader, 0, 0, span).unwrap();
    let mut system = dynamics(models);

    let mut state = vec![0.0];
    let mut io = Vec::new();
    let record = driver::simulate(&mut system, &mut [], &mut state, &mut io, span, 0.01).unwrap();

    // x grows at rate 2 but is reset at every step that ends above 1.
    for (_t, x) in &record {
        assert!(x[0] <= 1.0 + 0.03, "x escaped the sawtooth: {}", x[0]);
    }
    assert!(record.iter().any(|(_t, x)| x[0] == 0.0));
}
