#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use uregex::{Pool, PoolConfig, RegexFlags, Session};
use uregex_engine::EngineLoader;

fn pool() -> &'static Arc<Pool> {
    static POOL: OnceLock<Arc<Pool>> = OnceLock::new();
    POOL.get_or_init(|| {
        Pool::new(
            Arc::new(EngineLoader::default()),
            PoolConfig {
                fetch_max: 16,
                panic_on_leak: true,
            },
        )
    })
}

fn small(b: u8) -> i32 {
    i32::from(b % 8) - 1
}

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 4 * 1024 {
        &data[..4 * 1024]
    } else {
        data
    };
    let text = String::from_utf8_lossy(data);
    let mut parts = text.splitn(3, '\u{0}');
    let pattern = parts.next().unwrap_or_default();
    let subject = parts.next().unwrap_or_default();
    let replacement = parts.next().unwrap_or_default();
    let knobs = data.get(..4).unwrap_or(&[0, 0, 0, 0]);

    let mut s = Session::with_pool(pool()).expect("session");
    let flags = RegexFlags::from_bits(u32::from(knobs[0]) & 0x1ff);
    if s.set_regex_string(pattern, flags).is_ok() && s.set_match_string(subject).is_ok() {
        let start = small(knobs[1]);
        let occurrence = small(knobs[2]);
        let _ = s.matches(start, occurrence);
        if let Ok(pos) = s.index_of(start, occurrence, knobs[3] & 1 == 1) {
            assert!(pos >= 0);
        }
        let _ = s.substring(start, occurrence);
        if let Ok(out) = s.replace(replacement, start, occurrence) {
            if occurrence < 0 {
                assert_eq!(out, subject);
            }
        }
    }
    s.close().expect("close");
    assert_eq!(pool().stats().lent_contexts, 0);
});
