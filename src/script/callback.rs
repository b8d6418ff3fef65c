//! Calling back into Lua from native code.
//!
//! Iteration bodies, managed transaction functions and commit hooks all
//! re-enter the interpreter while a native operation is in progress. Each
//! such call passes through the state's [`CallbackGate`], a re-entrant lock
//! since callbacks nest (a `for_each` body inside an `update` function).

use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua};
use parking_lot::ReentrantMutex;
use std::sync::Arc;

/// Serializes entry into one Lua state from native callbacks.
#[derive(Clone, Default)]
pub(crate) struct CallbackGate {
    lock: Arc<ReentrantMutex<()>>,
}

impl CallbackGate {
    /// Calls `func` with `args` while holding the gate.
    pub(crate) fn call<R: FromLuaMulti>(
        &self,
        func: &Function,
        args: impl IntoLuaMulti,
    ) -> mlua::Result<R> {
        let _entered = self.lock.lock();
        func.call(args)
    }
}

/// Attaches a gate to `lua` unless it already has one.
pub(crate) fn install(lua: &Lua) {
    if lua.app_data_ref::<CallbackGate>().is_none() {
        lua.set_app_data(CallbackGate::default());
    }
}

/// The gate of `lua`.
pub(crate) fn gate(lua: &Lua) -> CallbackGate {
    install(lua);
    lua.app_data_ref::<CallbackGate>()
        .map(|gate| gate.clone())
        .unwrap_or_default()
}
