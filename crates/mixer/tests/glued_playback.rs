use gluewave_common::config::GlueConfig;
use gluewave_mixer::{wrap_position, GlueSynchronizer, MediaTrack, StillTrack, TrackRole};
use image::RgbaImage;

fn looping(duration: f64, at: f64) -> StillTrack {
    let mut track = StillTrack::new("loop", RgbaImage::new(8, 8), duration);
    track.seek(at);
    track.play();
    track
}

/// Drives both tracks the way a host does: advance, then report positions.
fn run(big: &mut StillTrack, small: &mut StillTrack, glue: &mut GlueSynchronizer, secs: f64) -> usize {
    let dt = 1.0 / 30.0;
    let mut corrections = 0;
    for _ in 0..(secs / dt) as usize {
        big.advance(dt);
        small.advance(dt);
        if glue.on_big_time_update(big, Some(&mut *small), false).is_some() {
            corrections += 1;
        }
        if glue.on_small_time_update(small, big, false).is_some() {
            corrections += 1;
        }
    }
    corrections
}

#[test]
fn glue_holds_offset_through_many_loops() {
    let mut big = looping(7.0, 1.0);
    let mut small = looping(3.0, 2.5);
    let mut glue = GlueSynchronizer::new(GlueConfig::default());
    assert!(glue.toggle(&big, Some(&small)));
    let offset = glue.offset_secs();

    let corrections = run(&mut big, &mut small, &mut glue, 30.0);
    assert!(corrections > 0);

    // Play on to just before BIG's loop point, then across it.
    while big.current_time() < 6.0 {
        run(&mut big, &mut small, &mut glue, 0.1);
    }
    let until_big_wrap = 7.0 - big.current_time() + 0.05;
    big.advance(until_big_wrap);
    small.advance(until_big_wrap);
    let fix = glue.on_big_time_update(&mut big, Some(&mut small), false);
    assert_eq!(fix.map(|f| f.target), Some(TrackRole::Small));

    let expected = wrap_position(big.current_time() + offset, small.duration());
    assert!((expected - small.current_time()).abs() < 1e-6);
}

#[test]
fn unloaded_small_leaves_big_alone() {
    let mut big = looping(2.0, 1.9);
    let mut glue = GlueSynchronizer::new(GlueConfig::default());
    assert!(!glue.toggle(&big, None));

    glue.on_big_time_update(&mut big, None, false);
    big.advance(0.2);
    assert!(glue.on_big_time_update(&mut big, None, false).is_none());
}
