use uregex::{create_session, set_pool_fetch_max, Pool, RegexFlags};

#[test]
fn convenience_api_uses_the_global_pool() {
    set_pool_fetch_max(4);
    assert_eq!(Pool::global().fetch_max(), 4);

    for _ in 0..9 {
        let mut s = create_session().expect("open session");
        s.set_regex_string("^[aA]bcd[eE]$", RegexFlags::NONE)
            .expect("set pattern");
        s.set_match_string("AbcdE").expect("set text");
        assert!(s.matches(1, 1).expect("matches"));
        s.close().expect("close");
    }

    let stats = Pool::global().stats();
    assert_eq!(stats.lent_contexts, 0);
    assert_eq!(stats.groups_created, 3);
    assert_eq!(stats.groups_retired, 2);
}
