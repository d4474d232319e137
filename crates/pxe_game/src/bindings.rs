//! Engine API exposed to scripts.
//!
//! Layout:
//!   canvas.width / canvas.height      -- logical resolution
//!   canvas.cls([color])               -- fill the framebuffer (default opaque black)
//!   canvas.pset(x, y, color)          -- out-of-range writes are ignored
//!   canvas.pget(x, y) -> color        -- 0 outside the framebuffer
//!   canvas.rectfill(x, y, w, h, color)
//!   canvas.draw(image, x, y)          -- blit, skipping fully transparent pixels
//!   keyboard.isKeyDown(name)          -- level-triggered
//!   keyboard.justPressed(name)        -- edge-triggered, cleared after each update tick
//!   image.load(path) -> image         -- image.width / image.height
//!   file.readAsync(path) -> id
//!   file.poll(id) -> nil | { ok = true, data = s } | { ok = false, error = msg }
//!   log.info(msg) / log.warn(msg)
//!
//! Colors are ARGB integers (`0xAARRGGBB`). Every function reaches engine state
//! through the `EngineContext` bound as app data, so nothing here holds a
//! reference across calls.

use std::path::PathBuf;

use mlua::prelude::*;
use pxe_core::input::Key;

use crate::context::EngineContext;
use crate::files::LoadStatus;
use crate::images::{load_image_from_path, ImageData};

fn with_context<R>(lua: &Lua, f: impl FnOnce(&mut EngineContext) -> R) -> LuaResult<R> {
    let mut ctx = lua
        .app_data_mut::<EngineContext>()
        .ok_or_else(|| LuaError::runtime("engine context is not bound"))?;
    Ok(f(&mut ctx))
}

fn parse_key(name: &str) -> LuaResult<Key> {
    Key::from_name(name).ok_or_else(|| LuaError::runtime(format!("unknown key name '{name}'")))
}

/// Colors arrive as Lua integers; only the low 32 bits are meaningful.
fn to_color(value: i64) -> u32 {
    value as u32
}

pub fn install(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    globals.set("canvas", canvas_table(lua)?)?;
    globals.set("keyboard", keyboard_table(lua)?)?;
    globals.set("image", image_table(lua)?)?;
    globals.set("file", file_table(lua)?)?;
    globals.set("log", log_table(lua)?)?;
    Ok(())
}

fn canvas_table(lua: &Lua) -> LuaResult<LuaTable> {
    let canvas = lua.create_table()?;
    let (width, height) = with_context(lua, |ctx| (ctx.width(), ctx.height()))?;
    canvas.set("width", width)?;
    canvas.set("height", height)?;

    let cls = lua.create_function(|lua, color: Option<i64>| {
        let color = color.map_or(pxe_core::framebuffer::OPAQUE_BLACK, to_color);
        with_context(lua, |ctx| ctx.framebuffer.clear(color))
    })?;
    canvas.set("cls", cls)?;

    let pset = lua.create_function(|lua, (x, y, color): (i32, i32, i64)| {
        with_context(lua, |ctx| ctx.framebuffer.set_pixel(x, y, to_color(color)))
    })?;
    canvas.set("pset", pset)?;

    let pget = lua.create_function(|lua, (x, y): (i32, i32)| {
        with_context(lua, |ctx| ctx.framebuffer.pixel(x, y).unwrap_or(0))
    })?;
    canvas.set("pget", pget)?;

    let rectfill = lua.create_function(|lua, (x, y, w, h, color): (i32, i32, i32, i32, i64)| {
        with_context(lua, |ctx| ctx.framebuffer.fill_rect(x, y, w, h, to_color(color)))
    })?;
    canvas.set("rectfill", rectfill)?;

    let draw = lua.create_function(
        |lua, (image, x, y): (LuaUserDataRef<ImageData>, i32, i32)| {
            with_context(lua, |ctx| {
                ctx.framebuffer
                    .blit_masked(&image.pixels, image.width, x, y)
            })
        },
    )?;
    canvas.set("draw", draw)?;

    Ok(canvas)
}

fn keyboard_table(lua: &Lua) -> LuaResult<LuaTable> {
    let keyboard = lua.create_table()?;

    let is_key_down = lua.create_function(|lua, name: String| {
        let key = parse_key(&name)?;
        with_context(lua, |ctx| ctx.input.is_held(key))
    })?;
    keyboard.set("isKeyDown", is_key_down)?;

    let just_pressed = lua.create_function(|lua, name: String| {
        let key = parse_key(&name)?;
        with_context(lua, |ctx| ctx.input.is_just_pressed(key))
    })?;
    keyboard.set("justPressed", just_pressed)?;

    Ok(keyboard)
}

fn image_table(lua: &Lua) -> LuaResult<LuaTable> {
    let image = lua.create_table()?;
    let load = lua.create_function(|_, path: String| {
        load_image_from_path(&PathBuf::from(path)).map_err(LuaError::runtime)
    })?;
    image.set("load", load)?;
    Ok(image)
}

fn file_table(lua: &Lua) -> LuaResult<LuaTable> {
    let file = lua.create_table()?;

    let read_async = lua.create_function(|lua, path: String| {
        with_context(lua, |ctx| ctx.files.request(PathBuf::from(path)))
    })?;
    file.set("readAsync", read_async)?;

    let poll = lua.create_function(|lua, id: u64| {
        let status = with_context(lua, |ctx| ctx.files.poll(id))?;
        match status {
            LoadStatus::Pending => Ok(LuaValue::Nil),
            LoadStatus::Unknown => Err(LuaError::runtime(format!(
                "unknown file request {id}"
            ))),
            LoadStatus::Ready(result) => {
                let outcome = lua.create_table()?;
                match result {
                    Ok(bytes) => {
                        outcome.set("ok", true)?;
                        outcome.set("data", lua.create_string(&bytes)?)?;
                    }
                    Err(message) => {
                        outcome.set("ok", false)?;
                        outcome.set("error", message)?;
                    }
                }
                Ok(LuaValue::Table(outcome))
            }
        }
    })?;
    file.set("poll", poll)?;

    Ok(file)
}

fn log_table(lua: &Lua) -> LuaResult<LuaTable> {
    let log_api = lua.create_table()?;
    let info = lua.create_function(|_, msg: String| {
        log::info!(target: "script", "{msg}");
        Ok(())
    })?;
    log_api.set("info", info)?;
    let warn = lua.create_function(|_, msg: String| {
        log::warn!(target: "script", "{msg}");
        Ok(())
    })?;
    log_api.set("warn", warn)?;
    Ok(log_api)
}
