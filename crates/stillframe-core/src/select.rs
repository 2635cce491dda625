//! Pure image rotation logic: expiry pruning, collection alternation and
//! the per-collection cursor step.
//!
//! Everything here is side-effect free so the rotation is testable without a
//! medium; the worker applies the resulting choice and cursor updates.

use alloc::vec::Vec;

use crate::name::{Collection, ImageName, temporary_expiry};
use crate::state::SelectionState;

/// How the cursor steps inside a collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectMode {
    Random,
    Sequential,
}

/// Outcome of one rotation step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chosen {
    pub name: ImageName,
    pub collection: Collection,
}

/// Move expired temporary names out of `names` into `expired`.
///
/// A name with no parseable expiry never expires. Callers must skip this
/// entirely while the wall clock is unsynced.
pub fn split_expired(names: &mut Vec<ImageName>, now_epoch: u64, expired: &mut Vec<ImageName>) {
    let mut i = 0;
    while i < names.len() {
        match temporary_expiry(&names[i]) {
            Some(expiry) if expiry <= now_epoch => expired.push(names.swap_remove(i)),
            _ => i += 1,
        }
    }
}

/// Pick the next image, alternating collections against the previous render.
///
/// The collection opposite `last_was_temporary` is preferred; when it is
/// empty the other one serves every cycle until content appears. Returns
/// `None` only when both collections are empty.
pub fn choose(
    permanent: &[ImageName],
    temporary: &[ImageName],
    state: &SelectionState,
    mode: SelectMode,
    rng: &mut impl FnMut(u32) -> u32,
) -> Option<Chosen> {
    let preferred = if state.last_was_temporary {
        Collection::Permanent
    } else {
        Collection::Temporary
    };

    let (collection, names) = match preferred {
        Collection::Permanent if !permanent.is_empty() => (Collection::Permanent, permanent),
        Collection::Temporary if !temporary.is_empty() => (Collection::Temporary, temporary),
        _ if !permanent.is_empty() => (Collection::Permanent, permanent),
        _ if !temporary.is_empty() => (Collection::Temporary, temporary),
        _ => return None,
    };

    let last_name = match collection {
        Collection::Permanent => &state.last_permanent_name,
        Collection::Temporary => &state.last_temporary_name,
    };
    let index = pick_from(names, last_name, mode, rng);

    Some(Chosen {
        name: names[index as usize].clone(),
        collection,
    })
}

/// Index of the next image within one collection.
///
/// Sequential steps one past the previous name and restarts from the front
/// when that name is gone. Random takes the draw as-is; a repeat of the
/// previous image is a legitimate outcome.
pub fn pick_from(
    names: &[ImageName],
    last_name: &ImageName,
    mode: SelectMode,
    rng: &mut impl FnMut(u32) -> u32,
) -> u32 {
    let n = names.len() as u32;
    debug_assert!(n > 0);

    match mode {
        SelectMode::Sequential => match names.iter().position(|name| name == last_name) {
            Some(i) => (i as u32 + 1) % n,
            None => 0,
        },
        SelectMode::Random => rng(n) % n,
    }
}
