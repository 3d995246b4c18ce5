#![no_main]

use libfuzzer_sys::fuzz_target;
use nebula::model::TrackId;
use nebula::queue::PlaybackQueue;

fuzz_target!(|data: &[u8]| {
    let Some((first, rest)) = data.split_first() else {
        return;
    };
    let len = usize::from(*first % 32).max(1);
    // Small id space so duplicate ids get exercised too.
    let order: Vec<TrackId> = (0..len).map(|idx| TrackId((idx % 7) as i64)).collect();

    let mut queue = PlaybackQueue::with_seed(u64::from(*first));
    queue.start_playback(&order, usize::from(*first));

    for byte in rest {
        match byte % 8 {
            0 => {
                queue.next();
            }
            1 => {
                queue.previous();
            }
            2 => {
                queue.toggle_shuffle();
            }
            3 => {
                queue.toggle_repeat();
            }
            4 => {
                queue.track_finished();
            }
            5 => {
                queue.skip_to(usize::from(*byte >> 3));
            }
            6 => queue.seek_to(u64::from(*byte)),
            _ => {
                let drop_id = TrackId(i64::from(*byte >> 5));
                queue.retain(|id| id != drop_id);
            }
        }

        if !queue.is_empty() {
            assert!(queue.position() < queue.len());
        }
        let mut current = queue.current_order().to_vec();
        let mut original = queue.original_order().to_vec();
        current.sort();
        original.sort();
        assert_eq!(current, original);
    }
});
