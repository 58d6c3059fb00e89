//! Pool of execution contexts grouped by compiled program.
//!
//! Acquisitions always come from the newest group. Once a group has served
//! `fetch_max` acquisitions a new group (with a freshly compiled program) takes over,
//! and the old one is torn down as soon as every context it created is back. This
//! bounds whatever the runtime accumulates per program over time.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};
use uregex_contracts::{CompiledProgram, ForeignError, ProgramLoader};
use uregex_engine::EngineLoader;

use crate::call::ForeignCalls;
use crate::config::PoolConfig;
use crate::diag;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupId(u64);

pub struct ExecutionContext {
    id: ContextId,
    calls: ForeignCalls,
}

impl ExecutionContext {
    pub fn id(&self) -> ContextId {
        self.id
    }
}

struct RuntimeGroup {
    id: GroupId,
    idle: Vec<ExecutionContext>,
    program: Arc<dyn CompiledProgram>,
    /// Contexts created and not yet destroyed (high-water mark).
    created: u64,
    fetches: u64,
    exhausted: bool,
}

impl RuntimeGroup {
    fn is_draining(&self, fetch_max: u64) -> bool {
        self.exhausted || self.fetches >= fetch_max
    }

    fn can_retire(&self, fetch_max: u64) -> bool {
        self.is_draining(fetch_max) && self.idle.len() as u64 >= self.created
    }

    fn close(self) {
        diag::debug(format_args!(
            "retiring group {} ({} contexts, {} fetches)",
            self.id.0,
            self.idle.len(),
            self.fetches
        ));
        let RuntimeGroup { idle, program, .. } = self;
        drop(idle);
        drop(program);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub fetch_max: u64,
    pub live_groups: u64,
    pub idle_contexts: u64,
    pub lent_contexts: u64,
    pub groups_created: u64,
    pub groups_retired: u64,
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub fetches: u64,
    pub leaks: u64,
    pub poisoned_discards: u64,
}

#[derive(Default)]
struct PoolState {
    groups: Vec<RuntimeGroup>,
    lent: HashMap<ContextId, GroupId>,
    next_group: u64,
    next_context: u64,
    fetch_max: u64,
    stats: PoolStats,
}

impl PoolState {
    fn group_mut(&mut self, id: GroupId) -> Option<&mut RuntimeGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    fn push_group(&mut self, program: Arc<dyn CompiledProgram>) {
        self.next_group += 1;
        let id = GroupId(self.next_group);
        self.groups.push(RuntimeGroup {
            id,
            idle: Vec::new(),
            program,
            created: 0,
            fetches: 0,
            exhausted: false,
        });
        self.stats.groups_created += 1;
        diag::debug(format_args!("created group {}", id.0));
    }

    fn take_retired(&mut self) -> Vec<RuntimeGroup> {
        let fetch_max = self.fetch_max;
        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.groups)
            .into_iter()
            .partition(|g| g.can_retire(fetch_max));
        self.groups = kept;
        self.stats.groups_retired += retired.len() as u64;
        self.stats.contexts_destroyed += retired.iter().map(|g| g.idle.len() as u64).sum::<u64>();
        retired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Return {
    Normal,
    Leaked,
}

pub struct Pool {
    loader: Arc<dyn ProgramLoader>,
    panic_on_leak: bool,
    state: Mutex<PoolState>,
}

impl Pool {
    pub fn new(loader: Arc<dyn ProgramLoader>, config: PoolConfig) -> Arc<Pool> {
        diag::debug(format_args!(
            "pool for {} (fetch_max={}, panic_on_leak={})",
            loader.name(),
            config.fetch_max,
            config.panic_on_leak
        ));
        Arc::new(Pool {
            loader,
            panic_on_leak: config.panic_on_leak,
            state: Mutex::new(PoolState {
                fetch_max: config.fetch_max.max(1),
                ..PoolState::default()
            }),
        })
    }

    /// Process-wide pool running the built-in engine, configured from the environment.
    pub fn global() -> &'static Arc<Pool> {
        static GLOBAL: OnceLock<Arc<Pool>> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = PoolConfig::from_env().unwrap_or_else(|err| {
                diag::warn(format_args!("{err:#}; using default pool config"));
                PoolConfig::default()
            });
            Pool::new(Arc::new(EngineLoader::default()), config)
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fetch_max(&self) -> u64 {
        self.lock().fetch_max
    }

    pub fn set_fetch_max(&self, fetch_max: u64) {
        let retired = {
            let mut st = self.lock();
            st.fetch_max = fetch_max.max(1);
            st.take_retired()
        };
        retired.into_iter().for_each(RuntimeGroup::close);
    }

    /// Marks every existing group as spent. They retire once drained, and the next
    /// acquisition starts a new group.
    pub fn retire_all(&self) {
        let retired = {
            let mut st = self.lock();
            for g in &mut st.groups {
                g.exhausted = true;
            }
            st.take_retired()
        };
        retired.into_iter().for_each(RuntimeGroup::close);
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.lock();
        PoolStats {
            fetch_max: st.fetch_max,
            live_groups: st.groups.len() as u64,
            idle_contexts: st.groups.iter().map(|g| g.idle.len() as u64).sum(),
            lent_contexts: st.lent.len() as u64,
            ..st.stats
        }
    }

    pub fn acquire(self: &Arc<Self>) -> Result<PooledContext> {
        // Compiled outside the lock; a group installed by another thread meanwhile wins.
        let mut compiled: Option<Arc<dyn CompiledProgram>> = None;
        let (group_id, program) = loop {
            let mut guard = self.lock();
            let st = &mut *guard;
            let fetch_max = st.fetch_max;
            if st.groups.last().map_or(true, |g| g.is_draining(fetch_max)) {
                let Some(program) = compiled.take() else {
                    drop(guard);
                    compiled = Some(self.loader.compile()?);
                    continue;
                };
                st.push_group(program);
            }
            st.stats.fetches += 1;
            let Some(group) = st.groups.last_mut() else {
                return Err(Error::Unavailable(ForeignError::instantiate("no active group")));
            };
            group.fetches += 1;
            let group_id = group.id;
            if let Some(ctx) = group.idle.pop() {
                st.lent.insert(ctx.id, group_id);
                return Ok(PooledContext::new(Arc::clone(self), ctx));
            }
            // Counted before instantiating so the group cannot retire underneath us.
            group.created += 1;
            break (group_id, Arc::clone(&group.program));
        };
        drop(compiled);

        let made = program
            .instantiate()
            .map_err(Error::Unavailable)
            .and_then(ForeignCalls::new);
        drop(program);

        let mut st = self.lock();
        match made {
            Ok(calls) => {
                st.next_context += 1;
                let id = ContextId(st.next_context);
                st.lent.insert(id, group_id);
                st.stats.contexts_created += 1;
                drop(st);
                diag::debug(format_args!("instantiated {id} in group {}", group_id.0));
                Ok(PooledContext::new(
                    Arc::clone(self),
                    ExecutionContext { id, calls },
                ))
            }
            Err(err) => {
                if let Some(g) = st.group_mut(group_id) {
                    g.created -= 1;
                }
                let retired = st.take_retired();
                drop(st);
                retired.into_iter().for_each(RuntimeGroup::close);
                Err(err)
            }
        }
    }

    fn release(&self, ctx: ExecutionContext, how: Return) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let Some(group_id) = st.lent.remove(&ctx.id) else {
            drop(guard);
            panic!("uregex pool: orphaned context {} returned", ctx.id);
        };
        let poisoned = ctx.calls.is_poisoned();
        let mut doomed = None;
        match st.group_mut(group_id) {
            Some(group) if how == Return::Normal && !poisoned => group.idle.push(ctx),
            Some(group) => {
                group.created -= 1;
                doomed = Some(ctx);
            }
            None => doomed = Some(ctx),
        }
        if doomed.is_some() {
            st.stats.contexts_destroyed += 1;
            match how {
                Return::Leaked => st.stats.leaks += 1,
                Return::Normal => st.stats.poisoned_discards += 1,
            }
        }
        let retired = st.take_retired();
        drop(guard);

        if let Some(ctx) = doomed {
            if how == Return::Normal {
                diag::debug(format_args!("discarding poisoned {}", ctx.id));
            }
            drop(ctx);
        }
        retired.into_iter().for_each(RuntimeGroup::close);
    }

    /// Raises the leak diagnostic: a panic when configured, otherwise a warning.
    pub(crate) fn report_leak(&self, what: fmt::Arguments<'_>) {
        if self.panic_on_leak && !std::thread::panicking() {
            panic!("uregex: {what}");
        }
        diag::warn(what);
    }
}

/// A context on loan from a [`Pool`]. Return it with [`PooledContext::release`];
/// dropping it instead goes through the pool's leak path.
pub struct PooledContext {
    pool: Arc<Pool>,
    ctx: Option<ExecutionContext>,
}

impl PooledContext {
    fn new(pool: Arc<Pool>, ctx: ExecutionContext) -> Self {
        PooledContext {
            pool,
            ctx: Some(ctx),
        }
    }

    fn inner(&self) -> &ExecutionContext {
        match &self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context used after return"),
        }
    }

    fn inner_mut(&mut self) -> &mut ExecutionContext {
        match &mut self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context used after return"),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner().id
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx, Return::Normal);
        }
    }

    /// Hands the context back through the leak path without raising the diagnostic.
    /// The owner is expected to report the leak itself.
    pub(crate) fn reclaim_leaked(mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx, Return::Leaked);
        }
    }
}

impl Deref for PooledContext {
    type Target = ForeignCalls;

    fn deref(&self) -> &ForeignCalls {
        &self.inner().calls
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut ForeignCalls {
        &mut self.inner_mut().calls
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let id = ctx.id;
            self.pool.release(ctx, Return::Leaked);
            self.pool
                .report_leak(format_args!("execution context {id} was never returned to the pool"));
        }
    }
}
