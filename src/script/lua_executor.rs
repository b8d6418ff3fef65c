//! LuaExecutor runs Lua scripts against a database.
//!
//! Each run gets a fresh Lua state with the `bolt` module registered and the
//! database bound to the global `db`. Scripts manage their own transactions
//! (`db.update`, `db.view`, `db.begin`); a transaction left open when the
//! script ends is rolled back when the state is dropped.

use crate::bolt::Db;
use crate::script;
use crate::{Error, Result};
use mlua::Lua;
use std::time::{Duration, Instant};

/// LuaExecutor manages the execution of Lua scripts with database access.
///
/// # Example
///
/// ```rust,no_run
/// use luabolt::Db;
/// use luabolt::script::LuaExecutor;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), luabolt::Error> {
/// let db = Db::open("./my.db", 0o600, None)?;
/// let executor = LuaExecutor::new(db, Some(Duration::from_secs(5)));
///
/// let script = r#"
///     db.update(function(tx)
///         local users = tx.create_bucket_if_not_exists("users")
///         users.put("1", "Alice")
///         users.put("2", "Bob")
///     end)
/// "#;
///
/// executor.execute(script)?;
/// # Ok(())
/// # }
/// ```
pub struct LuaExecutor {
    /// Database bound to the global `db`
    db: Db,

    /// Maximum script execution time
    timeout: Option<Duration>,
}

impl LuaExecutor {
    /// Creates a new LuaExecutor.
    ///
    /// # Arguments
    ///
    /// * `db` - The database scripts operate on
    /// * `timeout` - Optional maximum execution time for scripts
    pub fn new(db: Db, timeout: Option<Duration>) -> Self {
        Self { db, timeout }
    }

    /// Executes a Lua script.
    ///
    /// # Errors
    ///
    /// Returns `Error::Script` if:
    /// - The script has syntax errors
    /// - The script raises a runtime error, including failed database operations
    /// - The script exceeds the timeout limit
    pub fn execute(&self, script: &str) -> Result<()> {
        let start_time = Instant::now();
        let lua = self.prepare(start_time)?;

        match lua.load(script).exec() {
            Ok(()) => {
                log::info!("Lua script executed successfully in {:?}", start_time.elapsed());
                Ok(())
            }
            Err(e) => {
                log::warn!("Lua script failed: {}", e);
                Err(Error::script(format!("Lua script failed: {}", e)))
            }
        }
    }

    /// Executes a Lua script and returns its result value.
    ///
    /// - `Ok(Some(String))` if the script returned a value, converted with
    ///   the same rules as Lua's `tostring` for strings and numbers
    /// - `Ok(None)` if the script returned nil or nothing
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use luabolt::Db;
    /// use luabolt::script::LuaExecutor;
    ///
    /// # fn main() -> Result<(), luabolt::Error> {
    /// # let db = Db::open("./my.db", 0o600, None)?;
    /// let executor = LuaExecutor::new(db, None);
    ///
    /// let result = executor.execute_with_result(r#"
    ///     local n = 0
    ///     db.view(function(tx)
    ///         tx.for_each(function(name, b) n = n + 1 end)
    ///     end)
    ///     return n
    /// "#)?;
    ///
    /// assert_eq!(result, Some("0".to_string()));
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute_with_result(&self, script: &str) -> Result<Option<String>> {
        let start_time = Instant::now();
        let lua = self.prepare(start_time)?;

        let result = lua.load(script).eval::<mlua::Value>().and_then(|value| match value {
            mlua::Value::Nil => Ok(None),
            mlua::Value::String(s) => Ok(Some(s.to_str()?.to_string())),
            mlua::Value::Integer(n) => Ok(Some(n.to_string())),
            mlua::Value::Number(n) => Ok(Some(n.to_string())),
            mlua::Value::Boolean(b) => Ok(Some(b.to_string())),
            other => Ok(Some(format!("{:?}", other))),
        });

        match result {
            Ok(value) => {
                log::info!("Lua script executed successfully in {:?}", start_time.elapsed());
                Ok(value)
            }
            Err(e) => {
                log::warn!("Lua script failed: {}", e);
                Err(Error::script(format!("Lua script failed: {}", e)))
            }
        }
    }

    /// Sets the timeout for script execution.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum execution time, or None for no limit
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Gets the current timeout setting.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn prepare(&self, start_time: Instant) -> Result<Lua> {
        let lua = Lua::new();

        if let Some(timeout) = self.timeout {
            lua.set_hook(
                mlua::HookTriggers {
                    every_nth_instruction: Some(1000),
                    ..Default::default()
                },
                move |_lua, _debug| {
                    if start_time.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(mlua::VmState::Continue)
                    }
                },
            );
        }

        script::open(&lua)
            .and_then(|_| script::push_db(&lua, self.db.clone(), "db"))
            .map_err(|e| Error::script(format!("failed to set up Lua state: {}", e)))?;
        Ok(lua)
    }
}
