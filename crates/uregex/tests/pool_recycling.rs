use std::sync::Arc;
use std::thread;

use uregex::{Pool, PoolConfig, RegexFlags, Session};
use uregex_engine::EngineLoader;

const PATTERN: &str = "^[aA]bcd[eE]$";

fn check_once(pool: &Arc<Pool>, text: &str) -> bool {
    let mut s = Session::with_pool(pool).expect("open session");
    s.set_regex_string(PATTERN, RegexFlags::NONE)
        .expect("set pattern");
    s.set_match_string(text).expect("set text");
    let ok = s.matches(1, 1).expect("matches");
    s.close().expect("close");
    ok
}

#[test]
fn concurrent_sessions_share_the_pool() {
    let loader = EngineLoader::default();
    let engine_stats = loader.stats();
    let pool = Pool::new(Arc::new(loader), PoolConfig::default());

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..2048 {
                    let text = ["abcde", "Abcde", "AbcdE"][i % 3];
                    assert!(check_once(&pool, text), "{text} should match");
                }
                assert!(!check_once(&pool, "abcdf"));
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker panicked");
    }

    let stats = pool.stats();
    assert_eq!(stats.lent_contexts, 0);
    assert_eq!(stats.leaks, 0);
    assert_eq!(stats.poisoned_discards, 0);
    assert_eq!(stats.fetches, 16 * 2049);
    assert!(stats.groups_retired > 0);
    assert!(stats.live_groups <= 2, "{stats:?}");

    // everything not idle in a live group has been torn down
    let snap = engine_stats.snapshot();
    assert_eq!(snap.live_instances(), stats.idle_contexts);
    assert_eq!(snap.live_programs(), stats.live_groups);
}

#[test]
fn sequential_sessions_retire_drained_groups() {
    let loader = EngineLoader::default();
    let engine_stats = loader.stats();
    let pool = Pool::new(
        Arc::new(loader),
        PoolConfig {
            fetch_max: 2,
            panic_on_leak: true,
        },
    );

    for _ in 0..10 {
        assert!(check_once(&pool, "abcde"));
    }

    let stats = pool.stats();
    assert_eq!(stats.groups_created, 5);
    assert_eq!(stats.groups_retired, 5);
    assert_eq!(stats.live_groups, 0);
    assert_eq!(stats.contexts_created, 5);
    assert_eq!(stats.contexts_destroyed, 5);

    let snap = engine_stats.snapshot();
    assert_eq!(snap.programs_compiled, 5);
    assert_eq!(snap.live_programs(), 0);
    assert_eq!(snap.live_instances(), 0);
}

#[test]
fn retire_all_starts_a_fresh_group() {
    let pool = Pool::new(Arc::new(EngineLoader::default()), PoolConfig::default());
    assert!(check_once(&pool, "abcde"));
    assert_eq!(pool.stats().live_groups, 1);
    pool.retire_all();
    assert_eq!(pool.stats().live_groups, 0);
    assert!(check_once(&pool, "AbcdE"));
    assert_eq!(pool.stats().groups_created, 2);
}
