//! Concurrency Tests
//!
//! Parameter changes from control threads racing the processing thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use iqchain::dsp::stage::lock;
use iqchain::dsp::{NotchFilter, PeakDesign, PeakFilter, Stage, StageChain};
use iqchain::engine::{magnitudes, BufferPool, StageBuffers};
use iqchain::{Result, StageError};
use serde_json::{json, Value};

/// Coefficient set whose members must always agree
#[derive(Debug)]
struct MockState {
    run: bool,
    buffers: StageBuffers,
    coefs: [f64; 8],
    checksum: f64,
}

impl MockState {
    fn recompute(&mut self, k: f64) {
        for (n, c) in self.coefs.iter_mut().enumerate() {
            *c = k * (n + 1) as f64;
            std::hint::spin_loop();
        }
        self.checksum = 36.0 * k;
    }

    fn consistent(&self) -> bool {
        let k = self.coefs[0];
        self.coefs
            .iter()
            .enumerate()
            .all(|(n, &c)| c == k * (n + 1) as f64)
            && self.checksum == 36.0 * k
    }
}

/// Stage that counts executes seeing a torn coefficient set
#[derive(Debug)]
struct MockStage {
    state: Mutex<MockState>,
    torn: AtomicUsize,
    executed: AtomicUsize,
}

impl MockStage {
    fn new(buffers: StageBuffers) -> Self {
        let mut state = MockState {
            run: true,
            buffers,
            coefs: [0.0; 8],
            checksum: 0.0,
        };
        state.recompute(1.0);
        Self {
            state: Mutex::new(state),
            torn: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
        }
    }
}

impl Stage for MockStage {
    iqchain::impl_stage_common!("mock");

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        let st = lock(&self.state);
        let first = st.consistent();
        let size = st.buffers.size.min(available);
        let io = pool.stage_block(&st.buffers);
        let k = st.coefs[0] as f32;
        io.map_iq(size, |i, q| (k * i, k * q));
        if !first || !st.consistent() {
            self.torn.fetch_add(1, Ordering::Relaxed);
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        size
    }

    fn flush(&self) {}

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({ "enabled": st.run, "k": st.coefs[0], "checksum": st.checksum })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "k" => {
                let k = value.as_f64().ok_or_else(|| StageError::InvalidParameter {
                    param: name.to_string(),
                    value: value.to_string(),
                    expected: "number".to_string(),
                })?;
                lock(&self.state).recompute(k);
                Ok(())
            }
            _ => Err(StageError::UnknownParameter {
                stage: "mock".to_string(),
                param: name.to_string(),
            }),
        }
    }
}

#[test]
fn test_execute_never_sees_mixed_coefficients() {
    let mut pool = BufferPool::new();
    let buf = pool.allocate_complex(64);
    let mock = Arc::new(MockStage::new(StageBuffers::in_place(64, buf)));
    let chain = StageChain::new();
    chain.push("mock", mock.clone()).unwrap();

    let control = chain.control();
    let done = Arc::new(AtomicBool::new(false));
    let setters: Vec<_> = (0..2)
        .map(|t| {
            let control = control.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut n = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let k = (t * 1_000_000 + n) as f64;
                    control.set_param("mock", "k", &json!(k)).unwrap();
                    n += 1;
                }
                n
            })
        })
        .collect();

    for _ in 0..20_000 {
        chain.execute(&mut pool);
    }
    done.store(true, Ordering::Relaxed);
    let updates: u64 = setters.into_iter().map(|h| h.join().unwrap()).sum();

    assert!(updates > 0);
    assert_eq!(mock.executed.load(Ordering::Relaxed), 20_000);
    assert_eq!(mock.torn.load(Ordering::Relaxed), 0);
}

#[test]
fn test_retune_peak_while_running() {
    let size = 256;
    let mut pool = BufferPool::new();
    let buf = pool.allocate_complex(size);
    let chain = StageChain::new();
    let peak = PeakFilter::new(true, StageBuffers::in_place(size, buf), 48000.0, 600.0, 100.0, 1.0, 4, PeakDesign::Matched);
    chain.push("peak", Arc::new(peak)).unwrap();

    let control = chain.control();
    let setter = thread::spawn(move || {
        for step in 0..500 {
            let freq = 300.0 + (step % 50) as f64 * 40.0;
            control.set_param("peak", "freq", &json!(freq)).unwrap();
            control.set_param("peak", "bandwidth", &json!(50.0 + step as f64)).unwrap();
        }
        control.set_param("peak", "freq", &json!(1234.0)).unwrap();
    });

    let input: Vec<f32> = (0..2 * size).map(|k| ((k * 7919) % 13) as f32 / 13.0 - 0.5).collect();
    for _ in 0..500 {
        pool.write(buf, &input);
        chain.execute(&mut pool);
        assert!(pool.get(buf).unwrap().iter().all(|x| x.is_finite()));
    }
    setter.join().unwrap();

    assert_eq!(chain.params()["stages"][0]["params"]["freq"], 1234.0);
}

#[test]
fn test_control_handle_is_send() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<iqchain::dsp::ChainControl>();
    assert_send_sync::<Arc<dyn Stage>>();
}

#[test]
fn test_notch_settles_after_concurrent_retune() {
    let n = 4096;
    let mut pool = BufferPool::new();
    let buf = pool.allocate_complex(n);
    let notch = Arc::new(NotchFilter::new(true, StageBuffers::in_place(n, buf), 48000.0, 1000.0, 0.005));

    let handle = notch.clone();
    thread::spawn(move || {
        for f in [1500.0, 2000.0, 2500.0] {
            handle.set_freq(f);
        }
    })
    .join()
    .unwrap();

    let tone: Vec<f32> = (0..n)
        .flat_map(|t| {
            let arg = std::f64::consts::TAU * 2500.0 * t as f64 / 48000.0;
            [arg.cos() as f32, arg.sin() as f32]
        })
        .collect();
    notch.flush();
    pool.write(buf, &tone);
    notch.execute(&mut pool);
    assert!(magnitudes(&pool.get(buf).unwrap()[2 * 3072..]).iter().all(|&m| m < 1e-3));
}
