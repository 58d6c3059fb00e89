use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use regex_automata::meta::Regex;
use uregex_contracts::{
    CompiledProgram, ForeignError, ForeignInstance, ProgramLoader, UErrorCode,
};

use crate::instance::EngineInstance;
use crate::matcher::{self, CompileError};
use crate::memory::{NULL_GUARD, PAGE_SIZE};

pub const LOADER_NAME: &str = "uregex-engine";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Linear memory pages available at instantiation.
    pub initial_pages: u32,
    /// Hard ceiling for memory growth; `malloc` returns 0 beyond it.
    pub max_pages: u32,
    /// Bytes reserved below the initial stack cursor.
    pub stack_bytes: u32,
    /// Whether the composite `replace` export is offered.
    pub export_composite_replace: bool,
    /// Compiled patterns shared across instances of one program. 0 disables the cache.
    pub pattern_cache_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_pages: 2,
            max_pages: 16_384,
            stack_bytes: 16 * 1024,
            export_composite_replace: true,
            pattern_cache_entries: 256,
        }
    }
}

impl EngineConfig {
    pub(crate) fn stack_top(&self) -> u32 {
        NULL_GUARD + self.stack_bytes
    }

    fn validate(&self) -> Result<(), ForeignError> {
        if self.initial_pages == 0 {
            return Err(ForeignError::compile("initial_pages must be >= 1"));
        }
        let fits = u64::from(self.stack_top()) < u64::from(self.initial_pages) * u64::from(PAGE_SIZE);
        if self.stack_bytes < 64 || !fits {
            return Err(ForeignError::compile(format!(
                "stack of {} bytes does not fit in {} initial pages",
                self.stack_bytes, self.initial_pages
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct EngineStats {
    programs_compiled: AtomicU64,
    programs_dropped: AtomicU64,
    instances_created: AtomicU64,
    instances_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    pub programs_compiled: u64,
    pub programs_dropped: u64,
    pub instances_created: u64,
    pub instances_dropped: u64,
}

impl EngineStatsSnapshot {
    pub fn live_programs(&self) -> u64 {
        self.programs_compiled - self.programs_dropped
    }

    pub fn live_instances(&self) -> u64 {
        self.instances_created - self.instances_dropped
    }
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            programs_compiled: self.programs_compiled.load(Ordering::Acquire),
            programs_dropped: self.programs_dropped.load(Ordering::Acquire),
            instances_created: self.instances_created.load(Ordering::Acquire),
            instances_dropped: self.instances_dropped.load(Ordering::Acquire),
        }
    }

    pub(crate) fn instance_dropped(&self) {
        self.instances_dropped.fetch_add(1, Ordering::AcqRel);
    }
}

type CacheKey = (Vec<u16>, u32);

struct PatternCache {
    capacity: usize,
    entries: HashMap<CacheKey, Regex>,
}

impl PatternCache {
    fn get(&self, key: &CacheKey) -> Option<Regex> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, regex: Regex) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(key, regex);
    }
}

/// State shared by a program and every instance created from it.
pub(crate) struct ProgramShared {
    pub(crate) config: EngineConfig,
    pub(crate) stats: Arc<EngineStats>,
    cache: Arc<Mutex<PatternCache>>,
}

impl ProgramShared {
    fn lock_cache(&self) -> MutexGuard<'_, PatternCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn compile_pattern(&self, units: &[u16], flags: u32) -> Result<Regex, CompileError> {
        let key = (units.to_vec(), flags);
        if let Some(hit) = self.lock_cache().get(&key) {
            return Ok(hit);
        }
        let pattern = String::from_utf16(units).map_err(|_| CompileError {
            status: UErrorCode::REGEX_RULE_SYNTAX,
            offset: 0,
        })?;
        let regex = matcher::compile(&pattern, flags)?;
        self.lock_cache().insert(key, regex.clone());
        Ok(regex)
    }
}

/// Loader for the in-process engine program. Each `compile` yields an independent
/// program; the compiled-pattern cache is shared between them.
pub struct EngineLoader {
    config: EngineConfig,
    stats: Arc<EngineStats>,
    cache: Arc<Mutex<PatternCache>>,
}

impl EngineLoader {
    pub fn new(config: EngineConfig) -> Self {
        let cache = PatternCache {
            capacity: config.pattern_cache_entries,
            entries: HashMap::new(),
        };
        Self {
            config,
            stats: Arc::new(EngineStats::default()),
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for EngineLoader {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ProgramLoader for EngineLoader {
    fn name(&self) -> &str {
        LOADER_NAME
    }

    fn compile(&self) -> Result<Arc<dyn CompiledProgram>, ForeignError> {
        self.config.validate()?;
        self.stats.programs_compiled.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(EngineProgram {
            shared: Arc::new(ProgramShared {
                config: self.config.clone(),
                stats: Arc::clone(&self.stats),
                cache: Arc::clone(&self.cache),
            }),
        }))
    }
}

pub struct EngineProgram {
    shared: Arc<ProgramShared>,
}

impl CompiledProgram for EngineProgram {
    fn instantiate(&self) -> Result<Box<dyn ForeignInstance>, ForeignError> {
        let instance = EngineInstance::new(Arc::clone(&self.shared));
        self.shared
            .stats
            .instances_created
            .fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(instance))
    }
}

impl Drop for EngineProgram {
    fn drop(&mut self) {
        self.shared
            .stats
            .programs_dropped
            .fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_programs_and_instances() {
        let loader = EngineLoader::default();
        let stats = loader.stats();
        let program = loader.compile().unwrap();
        let a = program.instantiate().unwrap();
        let b = program.instantiate().unwrap();
        assert_eq!(stats.snapshot().live_instances(), 2);
        drop(a);
        drop(b);
        drop(program);
        let snap = stats.snapshot();
        assert_eq!(snap.programs_compiled, 1);
        assert_eq!(snap.live_programs(), 0);
        assert_eq!(snap.instances_created, 2);
        assert_eq!(snap.live_instances(), 0);
    }

    #[test]
    fn rejects_stack_that_does_not_fit() {
        let loader = EngineLoader::new(EngineConfig {
            initial_pages: 1,
            stack_bytes: PAGE_SIZE,
            ..EngineConfig::default()
        });
        let err = loader.compile().err().unwrap();
        assert!(err.message.contains("does not fit"), "{err}");
        assert_eq!(loader.stats().snapshot().programs_compiled, 0);
    }

    #[test]
    fn pattern_cache_is_bounded() {
        let loader = EngineLoader::new(EngineConfig {
            pattern_cache_entries: 2,
            ..EngineConfig::default()
        });
        let shared = ProgramShared {
            config: loader.config.clone(),
            stats: loader.stats(),
            cache: Arc::clone(&loader.cache),
        };
        for p in ["a", "b", "c"] {
            let units: Vec<u16> = p.encode_utf16().collect();
            shared.compile_pattern(&units, 0).unwrap();
        }
        assert_eq!(shared.lock_cache().entries.len(), 1);
        let bad: Vec<u16> = "(".encode_utf16().collect();
        assert!(shared.compile_pattern(&bad, 0).is_err());
        assert_eq!(shared.lock_cache().entries.len(), 1);
    }
}
