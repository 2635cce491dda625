//! RenderNext: priority override, expiry cleanup, rotation, draw, cursors.

use alloc::vec::Vec;

use crate::env::JobEnv;
use crate::name::{Collection, ImageName, is_valid_image_name, storage_path};
use crate::select::{Chosen, SelectMode, choose, split_expired};
use crate::state::{SelectionState, StateStore};
use crate::store::MediaStore;

/// Rotate to the next image and draw it. Returns the rendered name, or the
/// job message on failure.
pub(super) fn render_next<E: JobEnv>(
    env: &mut E,
    mode: SelectMode,
) -> Result<ImageName, &'static str> {
    let mut state = env.state().load();

    // The override is consumed up front: a bad name must not wedge the
    // rotation on every subsequent render.
    let priority = state.priority_image_name.clone();
    if !priority.is_empty() {
        state.priority_image_name.clear();
        env.state().save(&state);

        if is_valid_image_name(&priority) {
            let path = storage_path(&priority);
            if env.media().exists(path.as_str()).unwrap_or(false) {
                draw(env, path.as_str())?;
                apply_cursors(env, &mut state, &priority, mode);
                return Ok(priority);
            }
            log::warn!("priority image missing name={}", priority.as_str());
        }
    }

    let mut permanent = Vec::new();
    let mut temporary = Vec::new();
    if env.media().list(Collection::Permanent, &mut permanent).is_err()
        || env.media().list(Collection::Temporary, &mut temporary).is_err()
    {
        return Err("SD unavailable");
    }
    permanent.sort_unstable();
    temporary.sort_unstable();

    // Expiry pruning needs a trustworthy clock; a frame that never got SNTP
    // keeps temporary images forever rather than deleting blindly.
    if env.epoch_is_valid() {
        let now_epoch = env.now_epoch();
        let mut expired = Vec::new();
        split_expired(&mut temporary, now_epoch, &mut expired);
        for name in &expired {
            let path = storage_path(name);
            let _ = env.media().remove(path.as_str());
            log::info!("expired image removed name={}", name.as_str());
        }
    }

    let Some(Chosen { name, .. }) = choose(&permanent, &temporary, &state, mode, &mut |bound| {
        env.random(bound)
    }) else {
        log::warn!("no images in either collection");
        return Err("Render failed");
    };

    let path = storage_path(&name);
    draw(env, path.as_str())?;

    apply_cursors(env, &mut state, &name, mode);
    Ok(name)
}

/// Shared draw path for Display and RenderNext. A live provisioning portal
/// is shut down before the panel is driven.
pub(super) fn draw<E: JobEnv>(env: &mut E, path: &str) -> Result<(), &'static str> {
    if env.portal_is_active() {
        env.portal_stop();
    }
    if !env.render_init() {
        return Err("Render init failed");
    }
    if !env.render_image(path) {
        return Err("Render failed");
    }
    Ok(())
}

// The legacy numeric cursor rides along in the record untouched; the
// per-collection names carry the rotation.
fn apply_cursors<E: JobEnv>(
    env: &mut E,
    state: &mut SelectionState,
    name: &ImageName,
    mode: SelectMode,
) {
    if mode == SelectMode::Sequential {
        state.last_image_name = name.clone();
    }
    let is_temporary = Collection::of(name) == Some(Collection::Temporary);
    if is_temporary {
        state.last_temporary_name = name.clone();
    } else {
        state.last_permanent_name = name.clone();
    }
    state.last_was_temporary = is_temporary;
    env.state().save(state);
}
