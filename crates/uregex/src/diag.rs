//! stderr diagnostics.

use std::fmt;
use std::sync::OnceLock;

pub const ENV_DEBUG: &str = "UREGEX_DEBUG";

fn debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        matches!(
            std::env::var(ENV_DEBUG).as_deref().map(str::trim),
            Ok("1" | "true" | "yes")
        )
    })
}

pub(crate) fn debug(args: fmt::Arguments<'_>) {
    if debug_enabled() {
        eprintln!("uregex: {args}");
    }
}

pub(crate) fn warn(args: fmt::Arguments<'_>) {
    eprintln!("uregex: warning: {args}");
}
