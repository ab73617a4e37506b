//! Round-trip signals: a `Both`-sided send wakes waiters on the far side
//! directly and waiters on the sending side via the peer's bounce.

use std::sync::atomic::Ordering;
use std::time::Duration;

use vsoc_shm::{RegionSignals, RegionView, Sides};
use vsoc_testkit::{standard_world, BounceLayout};

fn await_one(view: &RegionView<BounceLayout>) -> u32 {
    let word = &view.layout().word;
    loop {
        let value = word.load(Ordering::Acquire);
        if value != 0 {
            return value;
        }
        view.wait_for_signal(word, 0);
    }
}

#[test]
fn both_sides_wake_on_a_round_trip_signal() {
    let world = standard_world();
    let (host, guest) = world.view_pair::<BounceLayout>();

    std::thread::scope(|scope| {
        let host_waiter = scope.spawn(|| await_one(&host));
        let guest_waiter = scope.spawn(|| await_one(&guest));

        // Let both waiters reach their futex sleep on the 0 value.
        std::thread::sleep(Duration::from_millis(50));

        // The guest writes and signals both sides: the host is woken by the
        // posted signal, the guest's own waiter by the bounced one.
        guest.layout().word.store(1, Ordering::Release);
        guest.send_signal(Sides::Both, &guest.layout().word);

        assert_eq!(host_waiter.join().unwrap(), 1);
        assert_eq!(guest_waiter.join().unwrap(), 1);
    });
}

#[test]
fn peer_signal_wakes_only_the_far_side() {
    let world = standard_world();
    let (host, guest) = world.view_pair::<BounceLayout>();

    std::thread::scope(|scope| {
        let host_waiter = scope.spawn(|| await_one(&host));

        std::thread::sleep(Duration::from_millis(20));
        guest.layout().word.store(3, Ordering::Release);
        guest.send_signal(Sides::Peer, &guest.layout().word);

        assert_eq!(host_waiter.join().unwrap(), 3);
    });
}

#[test]
fn local_signal_stays_on_this_side() {
    let world = standard_world();
    let (host, _guest) = world.view_pair::<BounceLayout>();

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| await_one(&host));

        std::thread::sleep(Duration::from_millis(20));
        host.layout().word.store(9, Ordering::Release);
        host.send_signal(Sides::Local, &host.layout().word);

        assert_eq!(waiter.join().unwrap(), 9);
    });
}
