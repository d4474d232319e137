//! Host for the embedded Lua VM.
//!
//! Lifecycle, strictly forward:
//!
//!   Uninitialized -> Bootstrapped -> EntryLoaded -> HandlesResolved -> Running -> Stopped
//!
//! Any failure jumps straight to `Stopped(Failure)`, including a step called out
//! of order. A host that has already stopped keeps its first outcome. The
//! bootstrap chunk and the entry script are each executed as one unit; an error
//! in either aborts startup.
//!
//! After loading, the `Game` and `AudioEngine_internal` classes and their per-frame
//! methods are resolved **once** into call handles. Every call afterwards goes
//! through `invoke`, which passes the owning class as the receiver (`self`) and
//! maps any Lua error into a `ScriptError::Call`.
//!
//! The `EngineContext` is bound to the VM as app data for the whole run so the
//! engine API can reach it from inside script calls.

use mlua::prelude::*;
use mlua::{AppDataRef, AppDataRefMut};
use thiserror::Error;

use crate::bindings;
use crate::context::EngineContext;

const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.lua");
const BOOTSTRAP_CHUNK: &str = "=bootstrap";

pub const GAME_CLASS: &str = "Game";
pub const AUDIO_CLASS: &str = "AudioEngine_internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    Bootstrapped,
    EntryLoaded,
    HandlesResolved,
    Running,
    Stopped(Outcome),
}

/// Class that receives a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Game,
    AudioEngine,
}

impl Receiver {
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Game => GAME_CLASS,
            Self::AudioEngine => AUDIO_CLASS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    Update,
    Draw,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Update => "update",
            Self::Draw => "draw",
        }
    }

    pub fn signature(self) -> &'static str {
        match self {
            Self::Init => "init()",
            Self::Update => "update()",
            Self::Draw => "draw(fraction)",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to bind engine API: {0}")]
    Bind(#[source] LuaError),
    #[error("failed to load {chunk}: {source}")]
    Load {
        chunk: String,
        #[source]
        source: LuaError,
    },
    #[error("required class '{0}' is not defined")]
    MissingClass(&'static str),
    #[error("class '{class}' does not define method {method}")]
    MissingMethod {
        class: &'static str,
        method: &'static str,
    },
    #[error("{class}.{method} failed: {source}")]
    Call {
        class: &'static str,
        method: &'static str,
        #[source]
        source: LuaError,
    },
    #[error("script host is {state:?}; cannot {action}")]
    InvalidState {
        state: HostState,
        action: &'static str,
    },
    #[error("engine context is not bound to the VM")]
    ContextUnavailable,
}

/// Pre-resolved classes and methods.
///
/// Acquired in field order; released in reverse by `ScriptHost::release_handles`.
struct CallHandles {
    game_class: LuaTable,
    audio_class: LuaTable,
    game_init: LuaFunction,
    game_update: LuaFunction,
    game_draw: LuaFunction,
    audio_update: LuaFunction,
}

impl CallHandles {
    fn lookup(&self, receiver: Receiver, method: Method) -> Option<(&LuaTable, &LuaFunction)> {
        match (receiver, method) {
            (Receiver::Game, Method::Init) => Some((&self.game_class, &self.game_init)),
            (Receiver::Game, Method::Update) => Some((&self.game_class, &self.game_update)),
            (Receiver::Game, Method::Draw) => Some((&self.game_class, &self.game_draw)),
            (Receiver::AudioEngine, Method::Update) => {
                Some((&self.audio_class, &self.audio_update))
            }
            (Receiver::AudioEngine, _) => None,
        }
    }
}

pub struct ScriptHost {
    handles: Option<CallHandles>,
    lua: Lua,
    state: HostState,
}

impl ScriptHost {
    /// Create the VM, bind `ctx` to it and install the engine API.
    pub fn new(ctx: EngineContext) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        lua.set_app_data(ctx);
        bindings::install(&lua).map_err(ScriptError::Bind)?;
        log::debug!("Script VM created");
        Ok(Self {
            handles: None,
            lua,
            state: HostState::Uninitialized,
        })
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    fn expect_state(
        &mut self,
        expected: HostState,
        action: &'static str,
    ) -> Result<(), ScriptError> {
        if self.state == expected {
            return Ok(());
        }
        let err = ScriptError::InvalidState {
            state: self.state,
            action,
        };
        Err(self.fail(err))
    }

    fn fail(&mut self, err: ScriptError) -> ScriptError {
        if !matches!(self.state, HostState::Stopped(_)) {
            log::error!("Script host stopping: {err}");
            self.state = HostState::Stopped(Outcome::Failure);
        }
        err
    }

    fn exec_chunk(&self, chunk: &str, source: &str) -> Result<(), ScriptError> {
        self.lua
            .load(source)
            .set_name(chunk)
            .exec()
            .map_err(|source| ScriptError::Load {
                chunk: chunk.trim_start_matches(['=', '@']).to_string(),
                source,
            })
    }

    pub fn load_bootstrap(&mut self) -> Result<(), ScriptError> {
        self.expect_state(HostState::Uninitialized, "run the bootstrap")?;
        match self.exec_chunk(BOOTSTRAP_CHUNK, BOOTSTRAP_SOURCE) {
            Ok(()) => {
                self.state = HostState::Bootstrapped;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Execute the user's entry script. `name` labels the chunk in error messages.
    pub fn load_entry(&mut self, name: &str, source: &str) -> Result<(), ScriptError> {
        self.expect_state(HostState::Bootstrapped, "load the entry script")?;
        match self.exec_chunk(&format!("@{name}"), source) {
            Ok(()) => {
                log::info!("Entry script loaded: {name}");
                self.state = HostState::EntryLoaded;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn resolve_class(&self, name: &'static str) -> Result<LuaTable, ScriptError> {
        match self.lua.globals().get::<LuaValue>(name) {
            Ok(LuaValue::Table(class)) => Ok(class),
            _ => Err(ScriptError::MissingClass(name)),
        }
    }

    fn resolve_method(
        class: &LuaTable,
        class_name: &'static str,
        method: Method,
    ) -> Result<LuaFunction, ScriptError> {
        match class.get::<LuaValue>(method.name()) {
            Ok(LuaValue::Function(function)) => Ok(function),
            _ => Err(ScriptError::MissingMethod {
                class: class_name,
                method: method.signature(),
            }),
        }
    }

    fn build_handles(&self) -> Result<CallHandles, ScriptError> {
        let game_class = self.resolve_class(GAME_CLASS)?;
        let audio_class = self.resolve_class(AUDIO_CLASS)?;
        let game_init = Self::resolve_method(&game_class, GAME_CLASS, Method::Init)?;
        let game_update = Self::resolve_method(&game_class, GAME_CLASS, Method::Update)?;
        let game_draw = Self::resolve_method(&game_class, GAME_CLASS, Method::Draw)?;
        let audio_update = Self::resolve_method(&audio_class, AUDIO_CLASS, Method::Update)?;
        Ok(CallHandles {
            game_class,
            audio_class,
            game_init,
            game_update,
            game_draw,
            audio_update,
        })
    }

    /// Resolve the class and method handles. Runs exactly once per host.
    pub fn resolve_handles(&mut self) -> Result<(), ScriptError> {
        self.expect_state(HostState::EntryLoaded, "resolve call handles")?;
        match self.build_handles() {
            Ok(handles) => {
                self.handles = Some(handles);
                self.state = HostState::HandlesResolved;
                log::debug!("Call handles resolved");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Enter the running state; per-frame calls are accepted from here on.
    pub fn start(&mut self) -> Result<(), ScriptError> {
        self.expect_state(HostState::HandlesResolved, "start running")?;
        self.state = HostState::Running;
        Ok(())
    }

    /// Call `method` on `receiver`, passing the class itself as `self`.
    ///
    /// A failed call stops the host; later calls are rejected.
    pub fn invoke(
        &mut self,
        receiver: Receiver,
        method: Method,
        arg: Option<f64>,
    ) -> Result<(), ScriptError> {
        self.expect_state(HostState::Running, "invoke a method")?;
        let Some(handles) = self.handles.as_ref() else {
            let err = ScriptError::InvalidState {
                state: self.state,
                action: "invoke without call handles",
            };
            return Err(self.fail(err));
        };
        let Some((class, function)) = handles.lookup(receiver, method) else {
            return Err(ScriptError::MissingMethod {
                class: receiver.class_name(),
                method: method.signature(),
            });
        };

        let result = match arg {
            Some(value) => function.call::<()>((class.clone(), value)),
            None => function.call::<()>(class.clone()),
        };
        result.map_err(|source| {
            self.fail(ScriptError::Call {
                class: receiver.class_name(),
                method: method.name(),
                source,
            })
        })
    }

    /// Record how the run ended. Only the first stop is kept.
    pub fn stop(&mut self, outcome: Outcome) {
        if !matches!(self.state, HostState::Stopped(_)) {
            log::info!("Script host stopped: {:?}", outcome);
            self.state = HostState::Stopped(outcome);
        }
    }

    pub fn context(&self) -> Result<AppDataRef<'_, EngineContext>, ScriptError> {
        self.lua
            .app_data_ref::<EngineContext>()
            .ok_or(ScriptError::ContextUnavailable)
    }

    pub fn context_mut(&self) -> Result<AppDataRefMut<'_, EngineContext>, ScriptError> {
        self.lua
            .app_data_mut::<EngineContext>()
            .ok_or(ScriptError::ContextUnavailable)
    }

    /// Release call handles in reverse acquisition order. Idempotent.
    fn release_handles(&mut self) {
        let Some(handles) = self.handles.take() else {
            return;
        };
        let CallHandles {
            game_class,
            audio_class,
            game_init,
            game_update,
            game_draw,
            audio_update,
        } = handles;
        drop(audio_update);
        drop(game_draw);
        drop(game_update);
        drop(game_init);
        drop(audio_class);
        drop(game_class);
        log::debug!("Call handles released");
    }

    /// Tear down: handles first, then the VM. Returns the engine context so the
    /// caller can release it after its own resources.
    pub fn shutdown(mut self) -> Option<EngineContext> {
        self.release_handles();
        self.lua.remove_app_data::<EngineContext>()
    }

    #[cfg(test)]
    pub(crate) fn global<T: FromLua>(&self, name: &str) -> LuaResult<T> {
        self.lua.globals().get(name)
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.release_handles();
        log::debug!("Script VM closed");
    }
}
