use std::sync::Arc;

use uregex::{Pool, PoolConfig, RegexFlags, Session};
use uregex_engine::EngineLoader;

fn pool(fetch_max: u64, panic_on_leak: bool) -> Arc<Pool> {
    Pool::new(
        Arc::new(EngineLoader::default()),
        PoolConfig {
            fetch_max,
            panic_on_leak,
        },
    )
}

#[test]
#[should_panic(expected = "never closed")]
fn dropping_an_open_session_panics() {
    let pool = pool(128, true);
    let mut s = Session::with_pool(&pool).expect("open session");
    s.set_regex_string("a", RegexFlags::NONE).expect("set pattern");
    drop(s);
}

#[test]
fn leaked_session_is_reclaimed_when_not_fatal() {
    let pool = pool(1, false);
    let mut s = Session::with_pool(&pool).expect("open session");
    s.set_regex_string("a", RegexFlags::NONE).expect("set pattern");
    s.set_match_string("banana").expect("set text");
    drop(s);

    let stats = pool.stats();
    assert_eq!(stats.leaks, 1);
    assert_eq!(stats.lent_contexts, 0);
    assert_eq!(stats.contexts_destroyed, 1);
    // the only context was reclaimed, so the spent group could retire
    assert_eq!(stats.live_groups, 0);
    assert_eq!(stats.groups_retired, 1);

    let mut s = Session::with_pool(&pool).expect("open session after leak");
    s.set_regex_string("n", RegexFlags::NONE).expect("set pattern");
    s.set_match_string("banana").expect("set text");
    assert_eq!(s.index_of(1, 2, false).expect("index_of"), 5);
    s.close().expect("close");
}

#[test]
fn closed_session_drops_quietly() {
    let pool = pool(128, true);
    let mut s = Session::with_pool(&pool).expect("open session");
    s.close().expect("close");
    drop(s);
    assert_eq!(pool.stats().leaks, 0);
}
