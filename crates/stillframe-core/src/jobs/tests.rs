use alloc::vec::Vec;

use embassy_futures::block_on;

use super::*;
use crate::store::MediaStore;
use crate::testenv::TestEnv;

fn mounted_env() -> TestEnv {
    let mut env = TestEnv::new();
    env.media.ensure_mounted().unwrap();
    env
}

#[test]
fn ids_start_at_one_and_increase() {
    let engine = JobEngine::new();
    let a = engine.enqueue_list(0).unwrap();
    let b = engine.enqueue_list(0).unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, 2);
    assert_eq!(engine.job(a).unwrap().state, JobState::Queued);
    assert!(engine.job(0).is_none());
    assert!(engine.job(99).is_none());
}

#[test]
fn ninth_enqueue_overflows_the_queue() {
    let engine = JobEngine::new();
    for _ in 0..QUEUE_DEPTH {
        engine.enqueue_list(0).unwrap();
    }

    let id = engine.enqueue_list(0).unwrap();
    let info = engine.job(id).unwrap();
    assert_eq!(info.state, JobState::Error);
    assert_eq!(info.message.as_str(), "Queue full");

    // The queued eight still run.
    let mut env = mounted_env();
    for expected in 1..=QUEUE_DEPTH as u32 {
        block_on(engine.service_one(&mut env));
        assert_eq!(engine.job(expected).unwrap().state, JobState::Done);
    }
}

#[test]
fn unmountable_medium_fails_every_job() {
    let engine = JobEngine::new();
    let mut env = TestEnv::new();
    env.media.fail_mount = true;

    let id = engine.enqueue_list(0).unwrap();
    block_on(engine.service_one(&mut env));
    let info = engine.job(id).unwrap();
    assert_eq!(info.state, JobState::Error);
    assert_eq!(info.message.as_str(), "SD init failed");
}

#[test]
fn list_merges_both_collections_sorted() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-temporary/20991231T235959Z__z.g4", b"z");
    env.media.insert("/queue-permanent/b.g4", b"b");
    env.media.insert("/queue-permanent/a.g4", b"a");

    let id = engine.enqueue_list(0).unwrap();

    // Names are unreadable until the job is done.
    let mut names = Vec::new();
    assert!(!engine.job_names(id, &mut names));

    block_on(engine.service_one(&mut env));
    assert!(engine.job_names(id, &mut names));
    let got: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
    assert_eq!(
        got,
        [
            "queue-permanent/a.g4",
            "queue-permanent/b.g4",
            "queue-temporary/20991231T235959Z__z.g4",
        ]
    );
}

#[test]
fn delete_validates_then_removes() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");

    let bad = engine.enqueue_delete("../a.g4", 0).unwrap();
    let missing = engine.enqueue_delete("queue-permanent/b.g4", 0).unwrap();
    let good = engine.enqueue_delete("queue-permanent/a.g4", 0).unwrap();
    for _ in 0..3 {
        block_on(engine.service_one(&mut env));
    }

    assert_eq!(engine.job(bad).unwrap().message.as_str(), "Invalid name");
    assert_eq!(engine.job(missing).unwrap().message.as_str(), "Not found");
    assert_eq!(engine.job(good).unwrap().state, JobState::Done);
    assert!(!env.media.contains("/queue-permanent/a.g4"));

    // Names are only attached to listing and sync jobs.
    let mut names = Vec::new();
    assert!(!engine.job_names(good, &mut names));
}

#[test]
fn upload_commits_and_reports_bytes() {
    let engine = JobEngine::new();
    let mut env = mounted_env();

    let id = engine
        .enqueue_upload("queue-permanent/new.g4", Vec::from(&b"image-bytes"[..]), 0)
        .unwrap();
    block_on(engine.service_one(&mut env));

    let info = engine.job(id).unwrap();
    assert_eq!(info.state, JobState::Done);
    assert_eq!(info.bytes, 11);
    assert_eq!(
        env.media.file("/queue-permanent/new.g4"),
        Some(&b"image-bytes"[..])
    );
    assert!(!env.media.contains("/queue-permanent/new.g4.tmp"));
}

#[test]
fn upload_rejects_bad_input() {
    let engine = JobEngine::new();
    let mut env = mounted_env();

    let empty = engine
        .enqueue_upload("queue-permanent/a.g4", Vec::new(), 0)
        .unwrap();
    let bad_name = engine
        .enqueue_upload("nested/dir.g4", Vec::from(&b"x"[..]), 0)
        .unwrap();
    for _ in 0..2 {
        block_on(engine.service_one(&mut env));
    }

    assert_eq!(
        engine.job(empty).unwrap().message.as_str(),
        "Invalid filename"
    );
    assert_eq!(
        engine.job(bad_name).unwrap().message.as_str(),
        "Invalid filename"
    );
    assert_eq!(env.media.file_count(), 0);
}

#[test]
fn display_renders_an_existing_image() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");

    let missing = engine.enqueue_display("queue-permanent/b.g4", 0).unwrap();
    let good = engine.enqueue_display("queue-permanent/a.g4", 0).unwrap();
    for _ in 0..2 {
        block_on(engine.service_one(&mut env));
    }

    assert_eq!(engine.job(missing).unwrap().message.as_str(), "Not found");
    assert_eq!(engine.job(good).unwrap().state, JobState::Done);
    assert_eq!(env.rendered, ["/queue-permanent/a.g4"]);
}

#[test]
fn display_surfaces_renderer_failures() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");

    env.render_init_ok = false;
    let init = engine.enqueue_display("queue-permanent/a.g4", 0).unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(
        engine.job(init).unwrap().message.as_str(),
        "Render init failed"
    );

    env.render_init_ok = true;
    env.render_ok = false;
    let draw = engine.enqueue_display("queue-permanent/a.g4", 0).unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(engine.job(draw).unwrap().message.as_str(), "Render failed");
}

#[test]
fn drawing_stops_an_active_portal() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");

    env.portal_active = true;
    let display = engine.enqueue_display("queue-permanent/a.g4", 0).unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(engine.job(display).unwrap().state, JobState::Done);
    assert_eq!(env.portal_stops, 1);
    assert!(!env.portal_active);

    env.portal_active = true;
    let rotate = engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(engine.job(rotate).unwrap().state, JobState::Done);
    assert_eq!(env.portal_stops, 2);
    assert!(!env.portal_active);
}

#[test]
fn render_next_alternates_collections() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");
    env.media.insert("/queue-permanent/b.g4", b"b");
    env.media
        .insert("/queue-temporary/20991231T235959Z__t.g4", b"t");

    for _ in 0..4 {
        engine
            .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
            .unwrap();
        block_on(engine.service_one(&mut env));
    }

    assert_eq!(
        env.rendered,
        [
            "/queue-temporary/20991231T235959Z__t.g4",
            "/queue-permanent/a.g4",
            "/queue-temporary/20991231T235959Z__t.g4",
            "/queue-permanent/b.g4",
        ]
    );
}

#[test]
fn render_next_consumes_the_priority_override_once() {
    use crate::state::StateStore;

    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");
    env.media.insert("/queue-permanent/special.g4", b"s");
    env.state.set_priority_image("queue-permanent/special.g4");

    engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(env.rendered, ["/queue-permanent/special.g4"]);
    assert!(env.state.load().priority_image_name.is_empty());

    // The next render is back on rotation.
    engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(env.rendered.len(), 2);
    assert_ne!(env.rendered[1], "/queue-permanent/special.g4");
}

#[test]
fn render_next_skips_a_stale_override() {
    use crate::state::StateStore;

    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media.insert("/queue-permanent/a.g4", b"a");
    env.state.set_priority_image("queue-permanent/gone.g4");

    let id = engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));

    assert_eq!(engine.job(id).unwrap().state, JobState::Done);
    assert_eq!(env.rendered, ["/queue-permanent/a.g4"]);
    assert!(env.state.load().priority_image_name.is_empty());
}

#[test]
fn render_next_prunes_expired_temporaries_when_clock_is_valid() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.epoch = 1_700_000_000;
    env.media.insert("/queue-permanent/a.g4", b"a");
    env.media
        .insert("/queue-temporary/20210101T000000Z__old.g4", b"old");

    engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));

    assert!(!env.media.contains("/queue-temporary/20210101T000000Z__old.g4"));
    assert_eq!(env.rendered, ["/queue-permanent/a.g4"]);
}

#[test]
fn render_next_keeps_temporaries_while_clock_is_unset() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.media
        .insert("/queue-temporary/20210101T000000Z__old.g4", b"old");

    engine
        .enqueue_render_next(crate::select::SelectMode::Sequential, 0)
        .unwrap();
    block_on(engine.service_one(&mut env));

    assert!(env.media.contains("/queue-temporary/20210101T000000Z__old.g4"));
    assert_eq!(env.rendered, ["/queue-temporary/20210101T000000Z__old.g4"]);
}

#[test]
fn full_table_evicts_the_oldest_terminal_job() {
    let engine = JobEngine::new();
    let mut env = mounted_env();

    for _ in 0..MAX_JOBS {
        engine.enqueue_list(0).unwrap();
        block_on(engine.service_one(&mut env));
    }
    assert!(engine.job(1).is_some());

    let id = engine.enqueue_list(0).unwrap();
    assert_eq!(id, MAX_JOBS as u32 + 1);
    assert!(engine.job(1).is_none());
    assert!(engine.job(2).is_some());
    block_on(engine.service_one(&mut env));
    assert_eq!(engine.job(id).unwrap().state, JobState::Done);
}

#[test]
fn purge_collects_only_aged_terminal_jobs() {
    let engine = JobEngine::new();
    let mut env = mounted_env();

    let id = engine.enqueue_list(0).unwrap();
    block_on(engine.service_one(&mut env));

    engine.purge(GC_MIN_AGE_MS - 1);
    assert!(engine.job(id).is_some());
    engine.purge(GC_MIN_AGE_MS);
    assert!(engine.job(id).is_none());
}

#[test]
fn sync_job_stops_the_portal_and_releases_the_gate() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.connected = true;
    env.epoch = 1_700_000_000;
    env.portal_active = true;
    env.blob.insert("all/permanent/a.g4", b"bytes");

    let id = engine
        .enqueue_sync(
            "https://frames.blob.example.net/photos?sv=2024-05-04&sig=abc123",
            0,
        )
        .unwrap();
    block_on(engine.service_one(&mut env));

    let info = engine.job(id).unwrap();
    assert_eq!(info.state, JobState::Done);
    assert_eq!(info.bytes, 5);
    assert_eq!(env.portal_stops, 1);
    assert!(!env.gate.is_suspended());
    assert!(env.media.contains("/queue-permanent/a.g4"));
}

#[test]
fn sync_leaves_an_already_suspended_gate_closed() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.connected = true;
    env.epoch = 1_700_000_000;
    env.blob.insert("all/permanent/a.g4", b"bytes");

    env.gate.suspend();
    let id = engine
        .enqueue_sync(
            "https://frames.blob.example.net/photos?sv=2024-05-04&sig=abc123",
            0,
        )
        .unwrap();
    block_on(engine.service_one(&mut env));

    assert_eq!(engine.job(id).unwrap().state, JobState::Done);
    assert!(env.gate.is_suspended());
}

#[test]
fn failed_sync_names_are_readable() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.connected = true;
    env.epoch = 1_700_000_000;
    env.blob.insert("all/permanent/a.g4", b"bytes");
    env.blob.fail_downloads = 99;

    let id = engine
        .enqueue_sync(
            "https://frames.blob.example.net/photos?sv=2024-05-04&sig=abc123",
            0,
        )
        .unwrap();
    block_on(engine.service_one(&mut env));

    let info = engine.job(id).unwrap();
    assert_eq!(info.state, JobState::Error);
    assert_eq!(info.message.as_str(), "1 downloads failed");

    let mut names = Vec::new();
    assert!(engine.job_names(id, &mut names));
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].as_str(), "queue-permanent/a.g4");
}

#[test]
fn disconnected_sync_fails_fast() {
    let engine = JobEngine::new();
    let mut env = mounted_env();
    env.epoch = 1_700_000_000;

    let id = engine
        .enqueue_sync(
            "https://frames.blob.example.net/photos?sv=2024-05-04&sig=abc123",
            0,
        )
        .unwrap();
    block_on(engine.service_one(&mut env));
    assert_eq!(engine.job(id).unwrap().message.as_str(), "Network down");
}
